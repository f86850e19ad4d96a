//! Coroutines
//!
//! Every non-main [`ExecutionContext`] is a coroutine. Yielding unwinds the
//! Rust call chain back to the resume boundary with a suspension signal;
//! the frames stay in the context's frame vector. Resuming finishes the
//! suspended frames one by one ("unrolling"): interpreted frames continue at
//! their saved program counter and native frames through their
//! continuation.
//!
//! An error raised inside a yieldable protected call also unwinds to the
//! resume boundary, which then recovers it in the frame that made the call.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use core_types::{ContextStatus, Status};
use tracing::{debug, trace};

use crate::call_frame::{Continuation, FrameId, KContext, Results, BASE_FRAME};
use crate::closing::CloseMode;
use crate::context::ExecutionContext;
use crate::error::{CallResult, RuntimeError, Unwind};
use crate::value::Value;

struct ThreadCell {
    status: Rc<Cell<ContextStatus>>,
    context: RefCell<ExecutionContext>,
}

/// Shared handle to an execution context
#[derive(Clone)]
pub struct ThreadRef(Rc<ThreadCell>);

impl ThreadRef {
    pub(crate) fn new(context: ExecutionContext) -> Self {
        let status = Rc::clone(&context.shared_status);
        ThreadRef(Rc::new(ThreadCell {
            status,
            context: RefCell::new(context),
        }))
    }

    /// Lifecycle state; readable even while the context is running
    pub fn status(&self) -> ContextStatus {
        self.0.status.get()
    }

    /// Borrow the context
    ///
    /// # Panics
    ///
    /// Panics if the context is running.
    pub fn borrow(&self) -> Ref<'_, ExecutionContext> {
        self.0.context.borrow()
    }

    /// Borrow the context mutably
    ///
    /// # Panics
    ///
    /// Panics if the context is running or borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, ExecutionContext> {
        self.0.context.borrow_mut()
    }

    /// Borrow the context mutably unless it is in use
    pub fn try_borrow_mut(&self) -> Option<RefMut<'_, ExecutionContext>> {
        self.0.context.try_borrow_mut().ok()
    }

    /// Identity of the handle
    pub fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast()
    }

    /// Resume the coroutine with `args`.
    ///
    /// Returns the status and the values yielded or returned, or the error
    /// object alone when the coroutine failed. `from` is the context doing
    /// the resume, if any; it is marked normal while the coroutine runs.
    pub fn resume(
        &self,
        from: Option<&ExecutionContext>,
        args: Vec<Value>,
    ) -> (Status, Vec<Value>) {
        let Some(mut ctx) = self.try_borrow_mut() else {
            return (
                Status::RuntimeError,
                vec![Value::from("cannot resume non-suspended coroutine")],
            );
        };
        let nargs = args.len();
        if !ctx.check_stack(nargs) {
            return (
                Status::RuntimeError,
                vec![Value::from("too many arguments to resume")],
            );
        }
        for arg in args {
            ctx.push(arg);
        }
        let (status, n) = ctx.resume(from, nargs);
        let values = if status.is_error() {
            vec![ctx.pop()]
        } else {
            ctx.pop_n(n)
        };
        (status, values)
    }

    /// Close the coroutine: run its pending closers and mark it dead.
    ///
    /// Fails if the coroutine is running or normal. For a coroutine killed
    /// by an error, that error (or one raised by a closer) is returned.
    pub fn close(&self, from: Option<&ExecutionContext>) -> Result<(), RuntimeError> {
        let status = self.status();
        let not_closable = || RuntimeError::message(format!("cannot close a {} coroutine", status));
        if !status.is_closable() {
            return Err(not_closable());
        }
        let Some(mut ctx) = self.try_borrow_mut() else {
            return Err(not_closable());
        };
        match ctx.close_thread(from) {
            Status::Ok => Ok(()),
            status => {
                let value = ctx.pop();
                Err(RuntimeError::new(status, value))
            }
        }
    }
}

impl PartialEq for ThreadRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRef")
            .field("ptr", &self.as_ptr())
            .field("status", &self.status())
            .finish()
    }
}

impl ExecutionContext {
    /// Whether a yield is currently allowed
    pub fn is_yieldable(&self) -> bool {
        self.non_yieldable == 0
    }

    fn resume_error(&mut self, message: &str, nargs: usize) -> (Status, usize) {
        self.top -= nargs;
        self.set_slot(self.top, Value::from(message));
        self.top += 1;
        debug!(message, "resume refused");
        (Status::RuntimeError, 1)
    }

    /// Start or continue this coroutine with the topmost `nargs` values.
    ///
    /// On the first resume the function below the arguments is the body.
    /// Returns the status and how many values on the top are the yielded or
    /// returned values (or 1, the error object, on failure).
    pub fn resume(&mut self, from: Option<&ExecutionContext>, nargs: usize) -> (Status, usize) {
        self.stack_ready();
        match self.status {
            Status::Ok => {
                if self.is_main || self.ci != BASE_FRAME {
                    return self.resume_error("cannot resume non-suspended coroutine", nargs);
                }
                let dead = !self.shared_status.get().is_resumable();
                if dead || self.top - (self.frames[self.ci].func + 1) == nargs {
                    return self.resume_error("cannot resume dead coroutine", nargs);
                }
            }
            Status::Yield => {}
            _ => return self.resume_error("cannot resume dead coroutine", nargs),
        }
        self.n_native_calls = from.map_or(0, |from| from.n_native_calls);
        if self.n_native_calls >= self.global.config.max_native_calls {
            return self.resume_error("native call stack overflow", nargs);
        }
        self.n_native_calls += 1;
        self.non_yieldable = 0;
        if let Some(from) = from {
            from.shared_status.set(ContextStatus::Normal);
        }
        self.shared_status.set(ContextStatus::Running);
        trace!(nargs, "resuming coroutine");

        let result = self.raw_run_protected(|ctx| ctx.resume_body(nargs));
        let status = match self.recover(result) {
            Ok(()) => {
                self.shared_status.set(ContextStatus::Dead);
                Status::Ok
            }
            Err(unwind) if unwind.is_yield() => {
                self.shared_status.set(ContextStatus::Suspended);
                Status::Yield
            }
            Err(unwind) => {
                let err = unwind.into_error();
                debug!(status = %err.status, error = %err.value, "coroutine died");
                self.status = err.status;
                let top = self.top;
                self.set_error_obj(Some(&err), top);
                let ci = self.ci;
                self.frames[ci].top = self.top;
                self.error = Some(err);
                self.shared_status.set(ContextStatus::ErrorDone);
                self.status
            }
        };
        if let Some(from) = from {
            from.shared_status.set(ContextStatus::Running);
        }
        let n = match status {
            Status::Yield => self.frames[self.ci].n_yield,
            _ if status.is_error() => 1,
            _ => self.top - (self.frames[self.ci].func + 1),
        };
        (status, n)
    }

    fn resume_body(&mut self, nargs: usize) -> CallResult<()> {
        let first_arg = self.top - nargs;
        if self.status == Status::Ok {
            return self.ccall(first_arg - 1, Results::All, 0, 0);
        }
        self.status = Status::Ok;
        let ci = self.ci;
        match self.frames[ci].native().map(|native| (native.continuation, native.kctx)) {
            Some((continuation, kctx)) => {
                let n = match continuation {
                    Some(k) => k(self, Status::Yield, kctx)?,
                    None => nargs,
                };
                self.poscall(ci, n)?;
            }
            None => {
                let executor = Rc::clone(&self.global.executor);
                executor.execute(self, ci)?;
            }
        }
        self.unroll()
    }

    /// Finish every frame interrupted by a yield or a recovered error.
    fn unroll(&mut self) -> CallResult<()> {
        while self.ci != BASE_FRAME {
            let ci = self.ci;
            if self.frames[ci].is_native() {
                self.finish_native_call(ci)?;
            } else {
                let executor = Rc::clone(&self.global.executor);
                executor.finish_op(self, ci);
                executor.execute(self, ci)?;
            }
        }
        Ok(())
    }

    fn finish_native_call(&mut self, ci: FrameId) -> CallResult<()> {
        let n = if self.frames[ci].closing_return {
            // redo the interrupted return
            self.frames[ci].n_res
        } else {
            let status = if self.frames[ci].yieldable_pcall {
                self.finish_pcall_k(ci)?
            } else {
                Status::Yield
            };
            self.adjust_results(Results::All);
            let (continuation, kctx) = self.frames[ci]
                .native()
                .map_or((None, 0), |native| (native.continuation, native.kctx));
            match continuation {
                Some(k) => k(self, status, kctx)?,
                None => self.get_top(),
            }
        };
        self.poscall(ci, n)
    }

    fn finish_pcall_k(&mut self, ci: FrameId) -> CallResult<Status> {
        let pending = self.frames[ci].native().and_then(|native| native.recover.clone());
        let func = self.frames[ci].native().map_or(0, |native| native.pcall_func);
        let status = match pending {
            None => Status::Yield,
            Some(err) => {
                self.allow_hook = self.frames[ci].saved_allow_hook;
                self.close_upto(func, CloseMode::Error(Some(&err)), true)?;
                self.set_error_obj(Some(&err), func);
                self.shrink_stack();
                if let Some(native) = self.frames[ci].native_mut() {
                    native.recover = None;
                }
                err.status
            }
        };
        self.frames[ci].yieldable_pcall = false;
        self.errfunc = self.frames[ci].native().and_then(|native| native.old_errfunc);
        Ok(status)
    }

    fn find_pcall(&self) -> Option<FrameId> {
        (1..=self.ci).rev().find(|&id| self.frames[id].yieldable_pcall)
    }

    /// Recover errors caught by yieldable protected calls, for as long as
    /// there is one to catch them.
    fn recover(&mut self, mut result: CallResult<()>) -> CallResult<()> {
        loop {
            let err = match result {
                Err(unwind) if !unwind.is_yield() => unwind.into_error(),
                other => return other,
            };
            let Some(ci) = self.find_pcall() else {
                return Err(Unwind::error(err));
            };
            debug!(frame = ci, error = %err.value, "recovering in yieldable protected call");
            self.ci = ci;
            if let Some(native) = self.frames[ci].native_mut() {
                native.recover = Some(err);
            }
            result = self.raw_run_protected(|ctx| ctx.unroll());
        }
    }

    /// Suspend the running coroutine, handing the topmost `nresults` values
    /// to the resumer.
    ///
    /// Always returns `Err`; a native function returns it directly. When the
    /// coroutine is resumed, the running native function finishes through
    /// `k` (or returns the resume arguments when there is none).
    pub fn yield_k(
        &mut self,
        nresults: usize,
        kctx: KContext,
        k: Option<Continuation>,
    ) -> CallResult<usize> {
        if !self.is_yieldable() {
            let message = if self.is_main {
                "attempt to yield from outside a coroutine"
            } else {
                "attempt to yield across a native-call boundary"
            };
            return Err(self.runtime_error(message));
        }
        assert!(self.get_top() >= nresults, "not enough values to yield");
        let ci = self.ci;
        self.status = Status::Yield;
        self.frames[ci].n_yield = nresults;
        if let Some(native) = self.frames[ci].native_mut() {
            native.continuation = k;
            native.kctx = kctx;
        }
        trace!(nresults, "coroutine yielding");
        Err(Unwind::suspend())
    }

    /// [`yield_k`](Self::yield_k) without a continuation
    pub fn yield_values(&mut self, nresults: usize) -> CallResult<usize> {
        self.yield_k(nresults, 0, None)
    }

    /// Close a suspended, finished or failed coroutine.
    ///
    /// Pending slots are closed (with the coroutine's error, if it died of
    /// one) and the context returns to its base frame, dead. Returns the
    /// status of the error that survives closing, with the error object on
    /// the stack, or `Ok`.
    pub fn close_thread(&mut self, from: Option<&ExecutionContext>) -> Status {
        self.n_native_calls = from.map_or(0, |from| from.n_native_calls);
        let pending = if self.status.is_error() {
            self.error.take()
        } else {
            None
        };
        let survived = self.reset_thread(pending);
        self.error = None;
        if !self.is_main {
            self.shared_status.set(ContextStatus::Dead);
        }
        match survived {
            Some(err) => {
                debug!(status = %err.status, error = %err.value, "coroutine closed with an error");
                err.status
            }
            None => Status::Ok,
        }
    }
}
