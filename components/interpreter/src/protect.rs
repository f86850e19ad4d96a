//! Protection boundaries
//!
//! Errors propagate as `Err(Unwind)` up the Rust call chain. A protection
//! boundary is any place that stops that propagation: [`ExecutionContext::pcall`],
//! [`ExecutionContext::run_protected`], a coroutine resume and the closing of
//! pending slots after an error. Each boundary pushes a [`ProtectionRecord`]
//! saving the counters it must restore.
//!
//! Raising goes through [`ExecutionContext::error`], which calls the active
//! message handler at the raise site, while the failing frames are still
//! live.

use core_types::{ContextStatus, Status};
use tracing::{debug, error};

use crate::call_frame::{FrameKind, NativeState, Results, BASE_FRAME};
use crate::context::ExecutionContext;
use crate::error::{CallResult, RuntimeError, Unwind};
use crate::value::Value;

/// Counters saved by a protection boundary
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProtectionRecord {
    saved_native_calls: u32,
    saved_non_yieldable: u32,
}

impl ExecutionContext {
    fn sync_main_protection(&self) {
        if self.is_main {
            self.global.main_protection.set(self.protection.len());
        }
    }

    /// Run `f` inside a protection record. The native nesting and
    /// non-yieldable counters are restored whatever `f` returns.
    pub(crate) fn raw_run_protected<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CallResult<T>,
    ) -> CallResult<T> {
        let record = ProtectionRecord {
            saved_native_calls: self.n_native_calls,
            saved_non_yieldable: self.non_yieldable,
        };
        self.protection.push(record);
        self.sync_main_protection();
        let result = f(self);
        self.protection.pop();
        self.sync_main_protection();
        self.n_native_calls = record.saved_native_calls;
        self.non_yieldable = record.saved_non_yieldable;
        result
    }

    /// Run `f` as a protected region starting at stack index `old_top`.
    ///
    /// On error the frame and hook permission are restored and pending slots
    /// above `old_top` are closed; an error raised by a closer replaces the
    /// original one.
    pub(crate) fn protected_region<T>(
        &mut self,
        old_top: usize,
        errfunc: Option<usize>,
        f: impl FnOnce(&mut Self) -> CallResult<T>,
    ) -> Result<T, RuntimeError> {
        let old_ci = self.ci;
        let old_allow_hook = self.allow_hook;
        let old_errfunc = self.errfunc;
        self.errfunc = errfunc;
        let outcome = match self.raw_run_protected(f) {
            Ok(value) => Ok(value),
            Err(unwind) => {
                self.ci = old_ci;
                self.allow_hook = old_allow_hook;
                let err = unwind.into_error();
                debug!(status = %err.status, error = %err.value, "protected call caught an error");
                Err(self.close_protected(old_top, Some(err.clone())).unwrap_or(err))
            }
        };
        self.errfunc = old_errfunc;
        outcome
    }

    /// Close pending slots down to `level` while an error is being handled,
    /// retrying until no closer raises. Returns the error that survives.
    pub(crate) fn close_protected(
        &mut self,
        level: usize,
        mut err: Option<RuntimeError>,
    ) -> Option<RuntimeError> {
        let old_ci = self.ci;
        let old_allow_hook = self.allow_hook;
        loop {
            let current = err.clone();
            let closed = self.raw_run_protected(|ctx| {
                ctx.close_upto(level, crate::closing::CloseMode::Error(current.as_ref()), false)
            });
            match closed {
                Ok(()) => return err,
                Err(unwind) => {
                    self.ci = old_ci;
                    self.allow_hook = old_allow_hook;
                    let raised = unwind.into_error();
                    debug!(error = %raised.value, "closer raised while unwinding");
                    err = Some(raised);
                }
            }
        }
    }

    /// Store the error object for `err` (nil for none) at stack index `at`
    /// and make it the last value on the stack.
    pub(crate) fn set_error_obj(&mut self, err: Option<&RuntimeError>, at: usize) {
        let value = err.map_or(Value::Nil, |err| err.value.clone());
        self.set_slot(at, value);
        self.top = at + 1;
    }

    /// Sentinel error of a status, without running the message handler.
    pub(crate) fn throw(&self, status: Status) -> Unwind {
        let value = self.global.sentinel_message(status);
        Unwind::error(RuntimeError::new(status, value))
    }

    /// Raise `value` as a runtime error.
    ///
    /// The active message handler, if any, is called first with the value
    /// and its result becomes the error object. A failing handler yields an
    /// error-in-error-handling once the native nesting limit is exceeded.
    pub fn error(&mut self, value: impl Into<Value>) -> Unwind {
        let value = value.into();
        let Some(errfunc) = self.errfunc else {
            return Unwind::error(RuntimeError::new(Status::RuntimeError, value));
        };
        self.stack_ready();
        if self.free_slots() <= 2 && self.grow_stack(2, false).ok() != Some(true) {
            return self.throw(Status::ErrorInErrorHandling);
        }
        let handler = self.stack[errfunc].clone();
        let func = self.top;
        self.set_slot(func, handler);
        self.set_slot(func + 1, value);
        self.top = func + 2;
        match self.ccall(func, Results::Fixed(1), 1, 1) {
            Ok(()) => {
                let handled = self.stack[func].clone();
                Unwind::error(RuntimeError::new(Status::RuntimeError, handled))
            }
            Err(unwind) => unwind,
        }
    }

    /// Raise a runtime error with a message
    pub fn runtime_error(&mut self, message: impl Into<String>) -> Unwind {
        self.error(Value::from(message.into()))
    }

    /// Call the function below the topmost `nargs` values in protected mode.
    ///
    /// On success behaves like [`call`](Self::call). On error the function
    /// and arguments are replaced by the error object and its status is
    /// returned. `msgh` is the frame slot of a message handler.
    pub fn pcall(&mut self, nargs: usize, nresults: Results, msgh: Option<usize>) -> Status {
        match self.pcall_k(nargs, nresults, msgh, 0, None) {
            Ok(status) => status,
            Err(unwind) => unwind.status(),
        }
    }

    /// Yieldable variant of [`pcall`](Self::pcall).
    ///
    /// When the context is yieldable and `k` is given, the callee may yield.
    /// An error is then not caught here: the resume boundary recovers it,
    /// restores this frame and calls `k` with the error status. `Err` is
    /// returned only for that suspension path.
    pub fn pcall_k(
        &mut self,
        nargs: usize,
        nresults: Results,
        msgh: Option<usize>,
        kctx: crate::call_frame::KContext,
        k: Option<crate::call_frame::Continuation>,
    ) -> CallResult<Status> {
        assert!(
            self.get_top() > nargs,
            "pcall needs a function and {} arguments on the stack",
            nargs
        );
        self.check_results(nargs, nresults);
        let errfunc = msgh.map(|idx| self.abs_index(idx));
        let func = self.top - (nargs + 1);
        let status = match k {
            Some(k) if self.is_yieldable() => {
                let ci = self.ci;
                let old_errfunc = self.errfunc;
                let allow_hook = self.allow_hook;
                let frame = &mut self.frames[ci];
                frame.saved_allow_hook = allow_hook;
                frame.yieldable_pcall = true;
                if let Some(native) = frame.native_mut() {
                    native.continuation = Some(k);
                    native.kctx = kctx;
                    native.pcall_func = func;
                    native.old_errfunc = old_errfunc;
                }
                self.errfunc = errfunc;
                self.ccall(func, nresults, 1, 0)?;
                self.frames[ci].yieldable_pcall = false;
                self.errfunc = old_errfunc;
                Status::Ok
            }
            _ => match self.protected_region(func, errfunc, |ctx| {
                ctx.call_no_yield(func, nresults)
            }) {
                Ok(()) => Status::Ok,
                Err(err) => {
                    let status = err.status;
                    self.set_error_obj(Some(&err), func);
                    self.shrink_stack();
                    status
                }
            },
        };
        self.adjust_results(nresults);
        Ok(status)
    }

    /// Run host code as a protected region.
    ///
    /// Errors raised inside `f` are caught: pending slots opened inside are
    /// closed, the stack top is restored and the error is returned. `f` may
    /// not yield.
    pub fn run_protected<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CallResult<T>,
    ) -> Result<T, RuntimeError> {
        self.stack_ready();
        let old_top = self.top;
        let errfunc = self.errfunc;
        let result = self.protected_region(old_top, errfunc, |ctx| {
            ctx.non_yieldable += 1;
            let result = f(ctx);
            ctx.non_yieldable -= 1;
            result
        });
        if result.is_err() {
            self.top = old_top;
            self.shrink_stack();
        }
        result
    }

    /// Put the context back to its base frame, closing every pending slot.
    /// Returns the error that survives closing.
    pub(crate) fn reset_thread(&mut self, err: Option<RuntimeError>) -> Option<RuntimeError> {
        self.stack_ready();
        self.ci = BASE_FRAME;
        let min_stack = self.global.config.min_stack;
        let top = self.top;
        self.frames[BASE_FRAME].prepare(
            0,
            Results::Fixed(0),
            FrameKind::Native(NativeState::default()),
            top + min_stack,
        );
        self.status = Status::Ok;
        self.errfunc = None;
        self.allow_hook = true;
        let survived = self.close_protected(1, err);
        match &survived {
            Some(err) => self.set_error_obj(Some(err), 1),
            None => self.top = 1,
        }
        let frame_top = self.top + min_stack;
        self.frames[BASE_FRAME].top = frame_top;
        let _ = self.realloc_stack(frame_top.max(self.global.config.basic_stack_size), false);
        survived
    }

    /// Handle an error that reached a public call with no protection record.
    ///
    /// A coroutine is killed and keeps the error; the error is handed to the
    /// main context if that one is inside a protected region. Otherwise the
    /// panic hook runs and the process panics.
    pub(crate) fn unprotected(&mut self, unwind: Unwind) -> Unwind {
        if unwind.is_yield() {
            return unwind;
        }
        let err = unwind.into_error();
        let err = self.reset_thread(Some(err.clone())).unwrap_or(err);
        if !self.is_main {
            self.status = err.status;
            self.error = Some(err.clone());
            self.shared_status.set(ContextStatus::ErrorDone);
            if self.global.main_protection.get() > 0 {
                debug!(
                    status = %err.status,
                    error = %err.value,
                    "forwarding unprotected coroutine error"
                );
                return Unwind::error(err);
            }
        }
        error!(status = %err.status, error = %err.value, "unprotected error");
        let hook = self.global.panic_hook.borrow().clone();
        if let Some(hook) = hook {
            hook(self, &err);
        }
        panic!("unprotected error in runtime call ({}): {}", err.status, err.value);
    }
}
