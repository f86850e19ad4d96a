//! Call dispatcher
//!
//! Prepares frames for native functions, interpreted closures and
//! `__call` targets, runs native bodies, and moves results into the
//! caller's expected positions.
//!
//! Interpreted-to-interpreted calls never recurse on the Rust stack: the
//! bytecode executor asks [`ExecutionContext::precall`] for a new frame and
//! keeps looping. Only calls made through [`ExecutionContext::call`] and
//! friends (from native code, hooks, handlers and closers) start a new
//! executor activation, and those count against the native nesting limit.

use std::rc::Rc;

use core_types::Status;
use tracing::warn;

use crate::call_frame::{
    CallFrame, Continuation, FrameId, FrameKind, InterpretedState, KContext, NativeState, Results,
};
use crate::closing::CloseMode;
use crate::context::ExecutionContext;
use crate::error::CallResult;
use crate::hooks::HookEvent;
use crate::metatable::MetaEvent;
use crate::value::{Function, NativeFunction, Value};

impl ExecutionContext {
    fn next_frame(&mut self) -> CallResult<FrameId> {
        let id = self.ci + 1;
        if id == self.frames.len() {
            if self.frames.try_reserve(1).is_err() {
                return Err(self.throw(Status::MemoryError));
            }
            self.frames.push(CallFrame::default());
        }
        Ok(id)
    }

    fn prep_frame(
        &mut self,
        func: usize,
        nresults: Results,
        kind: FrameKind,
        top: usize,
    ) -> CallResult<FrameId> {
        let id = self.next_frame()?;
        self.frames[id].prepare(func, nresults, kind, top);
        self.ci = id;
        Ok(id)
    }

    /// Insert the `__call` handler of the value at `func` below it, so the
    /// original callee becomes the first argument.
    fn try_call_metamethod(&mut self, func: usize, chain: &mut usize) -> CallResult<usize> {
        self.ensure_stack_gc(1)?;
        let callee = self.stack[func].clone();
        let Some(handler) = self.metamethod(&callee, MetaEvent::Call) else {
            return Err(self.runtime_error(format!(
                "attempt to call a {} value",
                callee.type_name()
            )));
        };
        *chain += 1;
        if *chain > self.global.config.max_call_chain {
            return Err(self.runtime_error("'__call' chain too long"));
        }
        let top = self.top;
        self.stack[func..=top].rotate_right(1);
        self.stack[func] = handler;
        self.top += 1;
        Ok(func)
    }

    fn precall_native(
        &mut self,
        func: usize,
        nresults: Results,
        native: &NativeFunction,
    ) -> CallResult<usize> {
        let min_stack = self.global.config.min_stack;
        self.ensure_stack_gc(min_stack)?;
        let top = self.top + min_stack;
        let ci = self.prep_frame(
            func,
            nresults,
            FrameKind::Native(NativeState::default()),
            top,
        )?;
        if self.hook_mask().call {
            let narg = self.top - func - 1;
            self.run_hook(HookEvent::Call, 1, narg)?;
        }
        let n = native.invoke(self)?;
        let available = self.top - (self.frames[ci].func + 1);
        if n > available {
            return Err(self.runtime_error(format!(
                "native function '{}' returned {} results but pushed {}",
                native.name(),
                n,
                available
            )));
        }
        self.poscall(ci, n)?;
        Ok(n)
    }

    /// Prepare a call to the value at stack index `func` with the arguments
    /// above it.
    ///
    /// A native function runs to completion and `None` is returned with its
    /// results already moved. For an interpreted closure the new frame is
    /// returned for the executor to run. Other values go through `__call`.
    pub fn precall(&mut self, func: usize, nresults: Results) -> CallResult<Option<FrameId>> {
        let mut func = func;
        let mut chain = 0;
        loop {
            match &self.stack[func] {
                Value::Function(Function::Native(native)) => {
                    let native = native.clone();
                    self.precall_native(func, nresults, &native)?;
                    return Ok(None);
                }
                Value::Function(Function::Closure(closure)) => {
                    let proto = Rc::clone(&closure.proto);
                    let narg = self.top - func - 1;
                    let nfix = proto.num_params as usize;
                    let fsize = proto.max_stack as usize;
                    self.ensure_stack_gc(fsize)?;
                    let ci = self.prep_frame(
                        func,
                        nresults,
                        FrameKind::Interpreted(InterpretedState::default()),
                        func + 1 + fsize,
                    )?;
                    for _ in narg..nfix {
                        let top = self.top;
                        self.set_slot(top, Value::Nil);
                        self.top += 1;
                    }
                    return Ok(Some(ci));
                }
                _ => func = self.try_call_metamethod(func, &mut chain)?,
            }
        }
    }

    /// Prepare a tail call from interpreted frame `ci` to the value at `func`
    /// with `narg1 - 1` arguments.
    ///
    /// An interpreted callee replaces frame `ci` in place (moved down by
    /// `delta` for a vararg caller) and `None` is returned. A native callee
    /// runs in a new frame and the number of its results is returned; the
    /// executor then finishes `ci` with them.
    pub fn pretailcall(
        &mut self,
        ci: FrameId,
        func: usize,
        narg1: usize,
        delta: usize,
    ) -> CallResult<Option<usize>> {
        let mut func = func;
        let mut narg1 = narg1;
        let mut chain = 0;
        loop {
            match &self.stack[func] {
                Value::Function(Function::Native(native)) => {
                    let native = native.clone();
                    let n = self.precall_native(func, Results::All, &native)?;
                    return Ok(Some(n));
                }
                Value::Function(Function::Closure(closure)) => {
                    let proto = Rc::clone(&closure.proto);
                    let fsize = proto.max_stack as usize;
                    let nfix = proto.num_params as usize;
                    self.ensure_stack_gc(fsize.saturating_sub(delta))?;
                    let new_func = self.frames[ci].func - delta;
                    for i in 0..narg1 {
                        let value = self.stack[func + i].clone();
                        self.stack[new_func + i] = value;
                    }
                    while narg1 <= nfix {
                        self.set_slot(new_func + narg1, Value::Nil);
                        narg1 += 1;
                    }
                    let frame = &mut self.frames[ci];
                    frame.func = new_func;
                    frame.top = new_func + 1 + fsize;
                    frame.kind = FrameKind::Interpreted(InterpretedState::default());
                    frame.tail = true;
                    self.top = new_func + narg1;
                    return Ok(None);
                }
                _ => {
                    func = self.try_call_metamethod(func, &mut chain)?;
                    narg1 += 1;
                }
            }
        }
    }

    fn check_native_stack(&mut self) -> CallResult<()> {
        let limit = self.global.config.max_native_calls;
        if self.n_native_calls == limit {
            warn!(limit, "native call nesting limit reached");
            return Err(self.runtime_error("native call stack overflow"));
        }
        if self.n_native_calls >= self.global.config.native_calls_hard_limit() {
            // error while handling the overflow
            return Err(self.throw(Status::ErrorInErrorHandling));
        }
        Ok(())
    }

    /// Call the value at `func`, running an interpreted callee in a fresh
    /// executor activation. `calls` and `nny` are added to the native nesting
    /// and non-yieldable counters for the duration of the call.
    pub(crate) fn ccall(
        &mut self,
        func: usize,
        nresults: Results,
        calls: u32,
        nny: u32,
    ) -> CallResult<()> {
        self.n_native_calls += calls;
        self.non_yieldable += nny;
        if self.n_native_calls >= self.global.config.max_native_calls {
            self.ensure_stack(0)?;
            self.check_native_stack()?;
        }
        if let Some(ci) = self.precall(func, nresults)? {
            self.frames[ci].fresh = true;
            let executor = Rc::clone(&self.global.executor);
            executor.execute(self, ci)?;
        }
        self.n_native_calls -= calls;
        self.non_yieldable -= nny;
        Ok(())
    }

    /// Call that the callee may not yield across.
    pub(crate) fn call_no_yield(&mut self, func: usize, nresults: Results) -> CallResult<()> {
        self.ccall(func, nresults, 1, 1)
    }

    /// Finish the call in frame `ci`, whose `nres` results are on the top of
    /// the stack: run the return hook, move the results and pop the frame.
    pub fn poscall(&mut self, ci: FrameId, nres: usize) -> CallResult<()> {
        let wanted = self.frames[ci].nresults;
        if self.hook_mask().ret && !self.frames[ci].closes_on_return {
            self.ret_hook(ci, nres)?;
        }
        self.move_results(ci, nres, wanted)?;
        self.ci = ci - 1;
        Ok(())
    }

    fn move_results(&mut self, ci: FrameId, nres: usize, wanted: Results) -> CallResult<()> {
        let res = self.frames[ci].func;
        let wanted = if self.frames[ci].closes_on_return {
            let frame = &mut self.frames[ci];
            frame.closing_return = true;
            frame.n_res = nres;
            self.close_upto(res, CloseMode::Return, true)?;
            self.frames[ci].closing_return = false;
            if self.hook_mask().ret {
                self.ret_hook(ci, nres)?;
            }
            match wanted {
                Results::Fixed(n) => n,
                Results::All => nres,
            }
        } else {
            match wanted {
                Results::Fixed(0) => {
                    self.top = res;
                    return Ok(());
                }
                Results::Fixed(1) => {
                    let value = if nres == 0 {
                        Value::Nil
                    } else {
                        self.stack[self.top - nres].clone()
                    };
                    self.stack[res] = value;
                    self.top = res + 1;
                    return Ok(());
                }
                Results::Fixed(n) => n,
                Results::All => nres,
            }
        };
        let first = self.top - nres;
        let copied = nres.min(wanted);
        for i in 0..copied {
            let value = self.stack[first + i].clone();
            self.set_slot(res + i, value);
        }
        for i in copied..wanted {
            self.set_slot(res + i, Value::Nil);
        }
        self.top = res + wanted;
        Ok(())
    }

    /// Fixed results must fit in the current frame once the function and its
    /// `nargs` arguments are gone.
    pub(crate) fn check_results(&self, nargs: usize, nresults: Results) {
        if let Results::Fixed(n) = nresults {
            let room = self.frames[self.ci].top - self.top;
            assert!(
                n <= nargs || room >= n - nargs,
                "{} results overflow the frame's reserved slots (see check_stack)",
                n
            );
        }
    }

    pub(crate) fn adjust_results(&mut self, nresults: Results) {
        let ci = self.ci;
        if nresults == Results::All && self.frames[ci].top < self.top {
            self.frames[ci].top = self.top;
        }
    }

    /// Call the function below the topmost `nargs` values.
    ///
    /// The function and arguments are replaced by its results, adjusted to
    /// `nresults`. An error with no protection boundary in this context is
    /// escalated (see [`RuntimeBuilder::panic_hook`](crate::RuntimeBuilder::panic_hook)).
    pub fn call(&mut self, nargs: usize, nresults: Results) -> CallResult<()> {
        self.call_k(nargs, nresults, 0, None)
    }

    /// Like [`call`](Self::call), but the callee may yield when the context
    /// is yieldable: the running native function is then resumed through `k`
    /// instead of returning from this call.
    pub fn call_k(
        &mut self,
        nargs: usize,
        nresults: Results,
        kctx: KContext,
        k: Option<Continuation>,
    ) -> CallResult<()> {
        assert!(
            self.get_top() > nargs,
            "call needs a function and {} arguments on the stack",
            nargs
        );
        self.check_results(nargs, nresults);
        let func = self.top - (nargs + 1);
        let result = match k {
            Some(k) if self.is_yieldable() => {
                let ci = self.ci;
                if let Some(native) = self.frames[ci].native_mut() {
                    native.continuation = Some(k);
                    native.kctx = kctx;
                }
                self.ccall(func, nresults, 1, 0)
            }
            _ => self.call_no_yield(func, nresults),
        };
        match result {
            Ok(()) => {
                self.adjust_results(nresults);
                Ok(())
            }
            Err(unwind) if self.protection.is_empty() => Err(self.unprotected(unwind)),
            Err(unwind) => Err(unwind),
        }
    }
}
