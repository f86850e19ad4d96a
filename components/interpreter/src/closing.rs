//! To-be-closed slots
//!
//! A slot marked to-be-closed has its `__close` metamethod called, with the
//! value and an error object, when the slot goes out of scope: a frame
//! returns past it, the stack top is lowered below it, or an error unwinds
//! past it. Slots close in reverse order of marking.

use tracing::trace;

use crate::call_frame::Results;
use crate::context::ExecutionContext;
use crate::error::{CallResult, RuntimeError};
use crate::metatable::MetaEvent;
use crate::value::Value;

/// Why pending slots are being closed
#[derive(Debug, Clone, Copy)]
pub enum CloseMode<'a> {
    /// Normal scope exit; closers get a nil error object and the stack is
    /// left untouched below the closer call
    Return,
    /// Unwinding after an error (`None` once a protected region ended
    /// without one); the error object is also written above the slot
    Error(Option<&'a RuntimeError>),
}

impl ExecutionContext {
    /// Register the value at absolute index `level` as to-be-closed.
    ///
    /// `nil` and `false` are accepted and never closed. Any other value must
    /// have a `__close` metamethod.
    pub(crate) fn mark_to_be_closed(&mut self, level: usize) -> CallResult<()> {
        let value = self.stack[level].clone();
        if value.is_falsy() {
            return Ok(());
        }
        if self.metamethod(&value, MetaEvent::Close).is_none() {
            return Err(self.runtime_error(format!(
                "variable got a non-closable value ({})",
                value.type_name()
            )));
        }
        debug_assert!(self.tbc.last().map_or(true, |&last| last < level));
        self.tbc.push(level);
        Ok(())
    }

    /// Mark frame slot `idx` of the running native function as
    /// to-be-closed. It is closed when the function returns, when
    /// [`set_top`](Self::set_top) drops it, or by [`close_slot`](Self::close_slot).
    pub fn to_be_closed(&mut self, idx: usize) -> CallResult<()> {
        let level = self.abs_index(idx);
        assert!(level < self.top, "to_be_closed beyond the frame's values");
        assert!(
            self.tbc.last().map_or(true, |&last| last < level),
            "to-be-closed slots must be marked in stack order"
        );
        self.mark_to_be_closed(level)?;
        let ci = self.ci;
        self.frames[ci].closes_on_return = true;
        Ok(())
    }

    /// Close frame slot `idx` (and any pending slot above it) now, then set
    /// it to nil.
    pub fn close_slot(&mut self, idx: usize) -> CallResult<()> {
        let level = self.abs_index(idx);
        self.close_upto(level, CloseMode::Return, false)?;
        self.stack[level] = Value::Nil;
        Ok(())
    }

    /// Whether some pending slot lies at or above `level`
    pub fn has_pending_close(&self, level: usize) -> bool {
        self.tbc.last().is_some_and(|&slot| slot >= level)
    }

    /// Close every pending slot at or above absolute index `level`, topmost
    /// first. With `yieldable` set, closers may yield.
    pub fn close_upto(
        &mut self,
        level: usize,
        mode: CloseMode<'_>,
        yieldable: bool,
    ) -> CallResult<()> {
        while let Some(&slot) = self.tbc.last() {
            if slot < level {
                break;
            }
            self.tbc.pop();
            trace!(slot, "closing to-be-closed slot");
            self.call_close_method(slot, mode, yieldable)?;
        }
        Ok(())
    }

    fn call_close_method(
        &mut self,
        slot: usize,
        mode: CloseMode<'_>,
        yieldable: bool,
    ) -> CallResult<()> {
        let object = self.stack[slot].clone();
        let err_obj = match mode {
            CloseMode::Return => Value::Nil,
            CloseMode::Error(err) => {
                self.set_error_obj(err, slot + 1);
                self.stack[slot + 1].clone()
            }
        };
        let method = self.metamethod(&object, MetaEvent::Close).unwrap_or_default();
        let func = self.top;
        self.set_slot(func, method);
        self.set_slot(func + 1, object);
        self.set_slot(func + 2, err_obj);
        self.top = func + 3;
        if yieldable {
            self.ccall(func, Results::Fixed(0), 1, 0)
        } else {
            self.call_no_yield(func, Results::Fixed(0))
        }
    }
}
