//! Execution contexts
//!
//! An [`ExecutionContext`] is one thread of execution: a growable value
//! stack, a chain of call frames, a protection stack and coroutine state.
//! Every context of a runtime shares one [`GlobalState`].
//!
//! The host stack API addresses slots of the current frame with 0-based
//! indices: slot 0 is the first argument of a native function.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use bytecode_system::Proto;
use core_types::{ContextStatus, RuntimeConfig, Status};
use tracing::debug;

use crate::call_frame::{CallFrame, FrameId, FrameKind, NativeState, Results, BASE_FRAME};
use crate::closing::CloseMode;
use crate::coroutine::ThreadRef;
use crate::error::{CallResult, RuntimeError};
use crate::hooks::HookState;
use crate::metatable::MetaEvent;
use crate::protect::ProtectionRecord;
use crate::runtime::GlobalState;
use crate::value::Value;

/// One thread of execution
pub struct ExecutionContext {
    pub(crate) global: Rc<GlobalState>,
    pub(crate) shared_status: Rc<Cell<ContextStatus>>,
    pub(crate) is_main: bool,
    /// Value slots; empty until first use
    pub(crate) stack: Vec<Value>,
    /// Logical end of the stack; slots past it are the extra margin
    pub(crate) stack_last: usize,
    /// First free slot
    pub(crate) top: usize,
    pub(crate) relocating: bool,
    /// Frame records; slots above `ci` form the reuse pool
    pub(crate) frames: Vec<CallFrame>,
    /// Current frame
    pub(crate) ci: FrameId,
    pub(crate) status: Status,
    /// Error that terminated this context
    pub(crate) error: Option<RuntimeError>,
    pub(crate) n_native_calls: u32,
    pub(crate) non_yieldable: u32,
    pub(crate) protection: Vec<ProtectionRecord>,
    /// Stack indices of pending to-be-closed slots, ascending
    pub(crate) tbc: Vec<usize>,
    /// Stack index of the active message handler
    pub(crate) errfunc: Option<usize>,
    pub(crate) hook: Option<HookState>,
    pub(crate) allow_hook: bool,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("is_main", &self.is_main)
            .field("status", &self.status)
            .field("context_status", &self.shared_status.get())
            .field("stack_size", &self.stack_last)
            .field("top", &self.top)
            .field("frame_depth", &self.ci)
            .field("n_native_calls", &self.n_native_calls)
            .field("non_yieldable", &self.non_yieldable)
            .field("protection_depth", &self.protection.len())
            .field("pending_closes", &self.tbc.len())
            .field("has_hook", &self.hook.is_some())
            .finish()
    }
}

impl ExecutionContext {
    pub(crate) fn new(global: Rc<GlobalState>, is_main: bool) -> Self {
        let initial = if is_main {
            ContextStatus::Running
        } else {
            ContextStatus::Initial
        };
        Self {
            global,
            shared_status: Rc::new(Cell::new(initial)),
            is_main,
            stack: Vec::new(),
            stack_last: 0,
            top: 0,
            relocating: false,
            frames: vec![CallFrame::default()],
            ci: BASE_FRAME,
            status: Status::Ok,
            error: None,
            n_native_calls: 0,
            // the main context can never yield
            non_yieldable: u32::from(is_main),
            protection: Vec::new(),
            tbc: Vec::new(),
            errfunc: None,
            hook: None,
            allow_hook: true,
        }
    }

    /// Allocate the stack on first use.
    pub(crate) fn stack_ready(&mut self) {
        if !self.stack.is_empty() {
            return;
        }
        let config = &self.global.config;
        let (basic, extra, min_stack) =
            (config.basic_stack_size, config.extra_stack, config.min_stack);
        self.stack = vec![Value::Nil; basic + extra];
        self.stack_last = basic;
        // slot 0 is the "function" of the base frame
        self.top = 1;
        self.frames[BASE_FRAME].prepare(
            0,
            Results::Fixed(0),
            FrameKind::Native(NativeState::default()),
            1 + min_stack,
        );
    }

    /// Shared state of the runtime
    pub fn global(&self) -> &Rc<GlobalState> {
        &self.global
    }

    /// Limits in effect
    pub fn config(&self) -> &RuntimeConfig {
        &self.global.config
    }

    /// Whether this is the runtime's root context
    pub fn is_main(&self) -> bool {
        self.is_main
    }

    /// Raw status: `Ok`, `Yield` while suspended, or the error that killed it
    pub fn status(&self) -> Status {
        self.status
    }

    /// Lifecycle state
    pub fn context_status(&self) -> ContextStatus {
        self.shared_status.get()
    }

    /// Error that terminated this context, if any
    pub fn terminal_error(&self) -> Option<&RuntimeError> {
        self.error.as_ref()
    }

    /// Number of frames above the base frame
    pub fn frame_depth(&self) -> usize {
        self.ci
    }

    /// Number of protection records currently installed
    pub fn protection_depth(&self) -> usize {
        self.protection.len()
    }

    /// Current native nesting
    pub fn native_calls(&self) -> u32 {
        self.n_native_calls
    }

    /// Create a context sharing this runtime's global state
    pub fn new_thread(&self) -> ThreadRef {
        ThreadRef::new(ExecutionContext::new(Rc::clone(&self.global), false))
    }

    /// Metamethod of `value` for `event`
    pub fn metamethod(&self, value: &Value, event: MetaEvent) -> Option<Value> {
        self.global.metamethods.lookup(value, event)
    }

    // ---- host stack API ----

    fn base(&self) -> usize {
        self.frames[self.ci].func + 1
    }

    /// Absolute stack index of frame slot `idx`
    pub fn abs_index(&self, idx: usize) -> usize {
        self.base() + idx
    }

    /// Number of values in the current frame
    pub fn get_top(&self) -> usize {
        self.top.saturating_sub(self.base())
    }

    /// Set the number of values in the current frame, filling with nil or
    /// dropping values. Dropped to-be-closed slots are closed.
    pub fn set_top(&mut self, n: usize) -> CallResult<()> {
        self.stack_ready();
        let new_top = self.base() + n;
        assert!(
            new_top <= self.frames[self.ci].top,
            "set_top beyond the frame's reserved slots"
        );
        while self.top < new_top {
            self.set_slot(self.top, Value::Nil);
            self.top += 1;
        }
        if new_top < self.top && self.tbc.last().is_some_and(|&slot| slot >= new_top) {
            self.close_upto(new_top, CloseMode::Return, false)?;
        }
        self.top = new_top;
        Ok(())
    }

    /// Push a value. The frame must have room (see [`check_stack`](Self::check_stack)).
    pub fn push(&mut self, value: impl Into<Value>) {
        self.stack_ready();
        assert!(
            self.top < self.frames[self.ci].top,
            "stack overflow: push beyond the frame's reserved slots"
        );
        let top = self.top;
        self.set_slot(top, value.into());
        self.top += 1;
    }

    /// Pop the topmost value of the frame
    pub fn pop(&mut self) -> Value {
        assert!(self.get_top() > 0, "pop from an empty frame");
        self.top -= 1;
        std::mem::take(&mut self.stack[self.top])
    }

    /// Pop the topmost `n` values, bottom first
    pub fn pop_n(&mut self, n: usize) -> Vec<Value> {
        assert!(self.get_top() >= n, "pop beyond the frame's values");
        let first = self.top - n;
        let values = self.stack[first..self.top]
            .iter_mut()
            .map(std::mem::take)
            .collect();
        self.top = first;
        values
    }

    /// Value in frame slot `idx`; nil past the top
    pub fn value(&self, idx: usize) -> Value {
        let abs = self.abs_index(idx);
        if abs < self.top {
            self.stack[abs].clone()
        } else {
            Value::Nil
        }
    }

    /// Replace the value in frame slot `idx`
    pub fn replace(&mut self, idx: usize, value: impl Into<Value>) {
        let abs = self.abs_index(idx);
        assert!(abs < self.top, "replace beyond the frame's values");
        self.stack[abs] = value.into();
    }

    /// All values of the current frame
    pub fn frame_values(&self) -> &[Value] {
        let base = self.base().min(self.top);
        &self.stack[base..self.top]
    }

    /// Move the topmost `n` values of this context onto `to`
    pub fn xmove(&mut self, to: &mut ExecutionContext, n: usize) {
        let values = self.pop_n(n);
        to.stack_ready();
        assert!(
            to.top + n <= to.frames[to.ci].top,
            "xmove beyond the target frame's reserved slots"
        );
        for value in values {
            to.push(value);
        }
    }

    /// Validate a prototype and push a closure over it. On failure, push the
    /// validation message and return [`Status::SyntaxError`].
    pub fn load(&mut self, proto: Proto) -> Status {
        match proto.validate() {
            Ok(()) => {
                self.push(Value::closure(proto));
                Status::Ok
            }
            Err(err) => {
                debug!(error = %err, "rejected prototype");
                self.push(Value::from(err.to_string()));
                Status::SyntaxError
            }
        }
    }

    // ---- interpreter-loop API ----

    /// Current frame
    pub fn current_frame(&self) -> FrameId {
        self.ci
    }

    /// Frame record
    pub fn frame(&self, id: FrameId) -> &CallFrame {
        &self.frames[id]
    }

    /// Mutable frame record
    pub fn frame_mut(&mut self, id: FrameId) -> &mut CallFrame {
        &mut self.frames[id]
    }

    /// Slot by absolute index
    pub fn stack_slot(&self, idx: usize) -> &Value {
        &self.stack[idx]
    }

    /// Write a slot by absolute index
    pub fn set_stack_slot(&mut self, idx: usize, value: Value) {
        self.set_slot(idx, value);
    }

    /// Absolute index of the first free slot
    pub fn stack_top(&self) -> usize {
        self.top
    }

    /// Move the stack top to an absolute index
    pub fn set_stack_top(&mut self, idx: usize) {
        self.top = idx;
    }
}
