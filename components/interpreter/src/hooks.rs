//! Debug hooks
//!
//! A hook is a host callback run on call and return events. While it runs,
//! hooks are disabled and the context cannot yield. The values transferred
//! by the event (arguments of a call, results of a return) are visible
//! through [`ExecutionContext::transferred_values`].

use std::rc::Rc;

use tracing::trace;

use crate::call_frame::{FrameId, FrameKind};
use crate::context::ExecutionContext;
use crate::error::CallResult;
use crate::value::{Function, Value};

/// Events a hook is called for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HookMask {
    /// Function entry
    pub call: bool,
    /// Function exit
    pub ret: bool,
}

impl HookMask {
    /// Call events only
    pub const CALL: HookMask = HookMask { call: true, ret: false };
    /// Return events only
    pub const RETURN: HookMask = HookMask { call: false, ret: true };
    /// Both events
    pub const ALL: HookMask = HookMask { call: true, ret: true };

    /// Whether no event is selected
    pub fn is_empty(self) -> bool {
        !self.call && !self.ret
    }
}

/// Event being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// A function was entered
    Call,
    /// A function was entered through a tail call
    TailCall,
    /// A function is returning
    Return,
}

/// What a hook is told about the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookRecord {
    /// The event
    pub event: HookEvent,
    /// Offset of the first transferred value from the frame's function slot
    pub first_transfer: usize,
    /// Number of transferred values
    pub transfer_count: usize,
}

/// Hook callback
pub type HookFn = dyn Fn(&mut ExecutionContext, &HookRecord) -> CallResult<()>;

#[derive(Clone)]
pub(crate) struct HookState {
    mask: HookMask,
    callback: Rc<HookFn>,
}

impl ExecutionContext {
    /// Install a hook for the events in `mask`; an empty mask removes it.
    pub fn set_hook<F>(&mut self, mask: HookMask, hook: F)
    where
        F: Fn(&mut ExecutionContext, &HookRecord) -> CallResult<()> + 'static,
    {
        self.hook = if mask.is_empty() {
            None
        } else {
            Some(HookState {
                mask,
                callback: Rc::new(hook),
            })
        };
    }

    /// Remove the hook
    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    /// Events the installed hook listens to
    pub fn hook_mask(&self) -> HookMask {
        self.hook.as_ref().map_or(HookMask::default(), |h| h.mask)
    }

    /// Values transferred by the event being reported; empty outside a hook.
    pub fn transferred_values(&self) -> &[Value] {
        let frame = &self.frames[self.ci];
        if !frame.hooked || frame.transfer_count == 0 {
            return &[];
        }
        let start = frame.func + frame.first_transfer;
        &self.stack[start..start + frame.transfer_count]
    }

    /// Run the hook for `event` in the current frame.
    pub(crate) fn run_hook(
        &mut self,
        event: HookEvent,
        first_transfer: usize,
        transfer_count: usize,
    ) -> CallResult<()> {
        let Some(hook) = self.hook.as_ref().map(|h| Rc::clone(&h.callback)) else {
            return Ok(());
        };
        if !self.allow_hook {
            return Ok(());
        }
        let ci = self.ci;
        let saved_top = self.top;
        let saved_frame_top = self.frames[ci].top;
        if transfer_count != 0 {
            let frame = &mut self.frames[ci];
            frame.first_transfer = first_transfer;
            frame.transfer_count = transfer_count;
        }
        if !self.frames[ci].is_native() && self.top < self.frames[ci].top {
            // protect the interpreted frame's registers
            self.top = self.frames[ci].top;
        }
        let min_stack = self.global.config.min_stack;
        self.ensure_stack(min_stack)?;
        if self.frames[ci].top < self.top + min_stack {
            self.frames[ci].top = self.top + min_stack;
        }
        trace!(?event, transfer_count, "running hook");
        self.allow_hook = false;
        self.frames[ci].hooked = true;
        self.non_yieldable += 1;
        let record = HookRecord {
            event,
            first_transfer,
            transfer_count,
        };
        let result = hook(self, &record);
        self.non_yieldable -= 1;
        result?;
        self.allow_hook = true;
        let frame = &mut self.frames[ci];
        frame.top = saved_frame_top;
        frame.hooked = false;
        frame.transfer_count = 0;
        self.top = saved_top;
        Ok(())
    }

    /// Report entry into interpreted frame `ci`, with its fixed parameters
    /// as transferred values.
    pub fn hook_call(&mut self, ci: FrameId) -> CallResult<()> {
        if !self.hook_mask().call {
            return Ok(());
        }
        let event = if self.frames[ci].tail {
            HookEvent::TailCall
        } else {
            HookEvent::Call
        };
        let num_params = match &self.stack[self.frames[ci].func] {
            Value::Function(Function::Closure(closure)) => closure.proto.num_params as usize,
            _ => 0,
        };
        self.run_hook(event, 1, num_params)
    }

    /// Report a return from frame `ci` with `nres` results on the top.
    pub(crate) fn ret_hook(&mut self, ci: FrameId, nres: usize) -> CallResult<()> {
        let first_result = self.top - nres;
        let delta = match &self.frames[ci].kind {
            FrameKind::Interpreted(state) => match &self.stack[self.frames[ci].func] {
                Value::Function(Function::Closure(closure)) if closure.proto.is_vararg => {
                    state.extra_args + closure.proto.num_params as usize + 1
                }
                _ => 0,
            },
            FrameKind::Native(_) => 0,
        };
        // the hook sees the frame where its function was called
        self.frames[ci].func += delta;
        let first_transfer = first_result - self.frames[ci].func;
        let result = self.run_hook(HookEvent::Return, first_transfer, nres);
        self.frames[ci].func -= delta;
        result
    }
}
