//! Call frames
//!
//! One [`CallFrame`] per active invocation. Frames live in a per-context
//! vector indexed by [`FrameId`]; index 0 is the base frame of the context.
//! Records above the current frame are kept as a free pool and reused by the
//! next call, so a frame id stays valid while its invocation is active.
//! All positions are stack indices, which stay valid across stack
//! reallocation.

use core_types::Status;

use crate::context::ExecutionContext;
use crate::error::{CallResult, RuntimeError};

/// Index of a frame in its context's frame vector
pub type FrameId = usize;

/// The base frame every context starts with
pub const BASE_FRAME: FrameId = 0;

/// Opaque value handed back to a continuation
pub type KContext = isize;

/// Resumption point of a native function.
///
/// Called instead of returning into the native function's Rust body when the
/// function was suspended (its callee yielded) or when an error inside a
/// yieldable protected call was recovered. Receives the status of the
/// interrupted operation and returns the number of results, like a native
/// function body.
pub type Continuation = fn(&mut ExecutionContext, Status, KContext) -> CallResult<usize>;

/// How many results the caller wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Results {
    /// Exactly this many; missing results are nil
    Fixed(usize),
    /// All of them; the stack top marks the end
    #[default]
    All,
}

/// State specific to native frames
#[derive(Debug, Clone, Default)]
pub struct NativeState {
    /// Continuation to run when the frame is resumed
    pub continuation: Option<Continuation>,
    /// Context value passed to the continuation
    pub kctx: KContext,
    /// Message handler active before a yieldable protected call
    pub old_errfunc: Option<usize>,
    /// Function slot of a yieldable protected call
    pub pcall_func: usize,
    /// Error to recover from when the frame is unrolled
    pub recover: Option<RuntimeError>,
}

/// State specific to interpreted frames
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpretedState {
    /// Index of the next instruction
    pub saved_pc: usize,
    /// Extra arguments of a vararg function, stored below the frame
    pub extra_args: usize,
}

/// Native or interpreted frame data
#[derive(Debug, Clone)]
pub enum FrameKind {
    /// Host function frame
    Native(NativeState),
    /// Bytecode function frame
    Interpreted(InterpretedState),
}

impl Default for FrameKind {
    fn default() -> Self {
        FrameKind::Native(NativeState::default())
    }
}

/// Record of one active invocation
#[derive(Debug, Clone, Default)]
pub struct CallFrame {
    /// Slot holding the callee; arguments start right after it
    pub func: usize,
    /// Limit of the slots reserved for this frame
    pub top: usize,
    /// Results the caller wants
    pub nresults: Results,
    /// Native or interpreted data
    pub kind: FrameKind,
    /// Started directly by the dispatcher; its interpreter activation ends
    /// when this frame returns
    pub fresh: bool,
    /// Entered through a tail call
    pub tail: bool,
    /// A hook is running for this frame
    pub hooked: bool,
    /// A protected call that may yield is active in this frame
    pub yieldable_pcall: bool,
    /// Hook permission to restore when recovering a yieldable protected call
    pub saved_allow_hook: bool,
    /// A native frame registered to-be-closed slots
    pub closes_on_return: bool,
    /// The frame is closing slots while returning (or before a tail call)
    pub closing_return: bool,
    /// The native callee of this frame's tail call finished after a yield;
    /// its results are still to be returned
    pub tail_call_done: bool,
    /// Number of values being returned while closing
    pub n_res: usize,
    /// Number of values yielded by this frame
    pub n_yield: usize,
    /// Offset of the first value transferred to a hook
    pub first_transfer: usize,
    /// Number of values transferred to a hook
    pub transfer_count: usize,
}

impl CallFrame {
    /// Whether this frame runs a native function
    pub fn is_native(&self) -> bool {
        matches!(self.kind, FrameKind::Native(_))
    }

    /// Native data, if native
    pub fn native(&self) -> Option<&NativeState> {
        match &self.kind {
            FrameKind::Native(state) => Some(state),
            FrameKind::Interpreted(_) => None,
        }
    }

    /// Mutable native data, if native
    pub fn native_mut(&mut self) -> Option<&mut NativeState> {
        match &mut self.kind {
            FrameKind::Native(state) => Some(state),
            FrameKind::Interpreted(_) => None,
        }
    }

    /// Interpreted data, if interpreted
    pub fn interpreted(&self) -> Option<&InterpretedState> {
        match &self.kind {
            FrameKind::Interpreted(state) => Some(state),
            FrameKind::Native(_) => None,
        }
    }

    /// Mutable interpreted data, if interpreted
    pub fn interpreted_mut(&mut self) -> Option<&mut InterpretedState> {
        match &mut self.kind {
            FrameKind::Interpreted(state) => Some(state),
            FrameKind::Native(_) => None,
        }
    }

    /// Saved program counter (0 for native frames)
    pub fn saved_pc(&self) -> usize {
        self.interpreted().map_or(0, |s| s.saved_pc)
    }

    /// Extra vararg arguments (0 for native frames)
    pub fn extra_args(&self) -> usize {
        self.interpreted().map_or(0, |s| s.extra_args)
    }

    /// Reset the record for a new invocation
    pub(crate) fn prepare(&mut self, func: usize, nresults: Results, kind: FrameKind, top: usize) {
        *self = CallFrame {
            func,
            top,
            nresults,
            kind,
            ..CallFrame::default()
        };
    }
}

/// Stack range of a live frame, as seen by a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    /// Callee slot
    pub func: usize,
    /// Limit of the frame's slots
    pub top: usize,
    /// Native frame
    pub native: bool,
}
