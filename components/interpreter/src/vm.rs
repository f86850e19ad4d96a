//! Bytecode execution
//!
//! The dispatcher hands interpreted frames to a [`BytecodeExecutor`].
//! [`RegisterVm`] is the reference executor for the register instruction
//! set of `bytecode_system`.
//!
//! Calls between interpreted functions stay inside one `execute` activation:
//! a `Call` switches to the callee's frame and a `Return` switches back to
//! the caller. The activation ends when a frame flagged `fresh` returns,
//! that is, the frame the dispatcher started it for.

use std::rc::Rc;

use bytecode_system::{Instruction, Proto};
use tracing::trace;

use crate::call_frame::{FrameId, Results};
use crate::closing::CloseMode;
use crate::context::ExecutionContext;
use crate::error::CallResult;
use crate::value::{Function, Value};

/// Runs interpreted frames
pub trait BytecodeExecutor {
    /// Run frame `frame` (and the interpreted frames it calls) until a
    /// fresh frame returns.
    fn execute(&self, ctx: &mut ExecutionContext, frame: FrameId) -> CallResult<()>;

    /// Complete the instruction of `frame` that was interrupted by a yield,
    /// before the frame is executed again.
    fn finish_op(&self, _ctx: &mut ExecutionContext, _frame: FrameId) {}
}

/// Reference register machine
#[derive(Debug, Default, Clone, Copy)]
pub struct RegisterVm;

fn frame_proto(ctx: &mut ExecutionContext, ci: FrameId) -> CallResult<Rc<Proto>> {
    match ctx.stack_slot(ctx.frame(ci).func) {
        Value::Function(Function::Closure(closure)) => Ok(Rc::clone(&closure.proto)),
        other => {
            let type_name = other.type_name();
            Err(ctx.runtime_error(format!(
                "interpreted frame is running a {} value",
                type_name
            )))
        }
    }
}

fn set_pc(ctx: &mut ExecutionContext, ci: FrameId, pc: usize) {
    if let Some(state) = ctx.frame_mut(ci).interpreted_mut() {
        state.saved_pc = pc;
    }
}

/// Offset between the frame's function slot and where it was called, for a
/// vararg function.
fn vararg_delta(ctx: &ExecutionContext, ci: FrameId, proto: &Proto) -> usize {
    if proto.is_vararg {
        ctx.frame(ci).extra_args() + proto.num_params as usize + 1
    } else {
        0
    }
}

/// Move the function and its fixed parameters above the actual arguments,
/// leaving the extra arguments below the frame.
fn adjust_varargs(ctx: &mut ExecutionContext, ci: FrameId, proto: &Proto) -> CallResult<()> {
    let func = ctx.frame(ci).func;
    let nfix = proto.num_params as usize;
    let actual = ctx.stack_top() - func - 1;
    let nextra = actual - nfix;
    ctx.ensure_stack(proto.max_stack as usize + 1)?;
    let mut top = ctx.stack_top();
    for i in 0..=nfix {
        let value = ctx.stack_slot(func + i).clone();
        ctx.set_stack_slot(top, value);
        top += 1;
        if i > 0 {
            ctx.set_stack_slot(func + i, Value::Nil);
        }
    }
    ctx.set_stack_top(top);
    let frame = ctx.frame_mut(ci);
    frame.func += actual + 1;
    frame.top += actual + 1;
    if let Some(state) = frame.interpreted_mut() {
        state.extra_args = nextra;
    }
    Ok(())
}

fn arith(
    ctx: &mut ExecutionContext,
    ci: FrameId,
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> CallResult<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
        return Ok(Value::Integer(int_op(*a, *b)));
    }
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => Ok(Value::Number(float_op(a, b))),
        _ => {
            let bad = if lhs.as_number().is_none() { lhs } else { rhs };
            let message = format!("attempt to perform arithmetic on a {} value", bad.type_name());
            // keep live registers out of the handler's way
            let top = ctx.frame(ci).top;
            ctx.set_stack_top(top);
            Err(ctx.runtime_error(message))
        }
    }
}

impl RegisterVm {
    fn enter(&self, ctx: &mut ExecutionContext, ci: FrameId, proto: &Proto) -> CallResult<()> {
        if proto.is_vararg {
            adjust_varargs(ctx, ci, proto)?;
        }
        ctx.hook_call(ci)?;
        let top = ctx.frame(ci).top;
        ctx.set_stack_top(top);
        Ok(())
    }
}

impl BytecodeExecutor for RegisterVm {
    fn execute(&self, ctx: &mut ExecutionContext, frame: FrameId) -> CallResult<()> {
        let mut ci = frame;
        'frames: loop {
            let proto = frame_proto(ctx, ci)?;
            if ctx.frame(ci).saved_pc() == 0 {
                trace!(function = %proto.name, frame = ci, "entering function");
                self.enter(ctx, ci, &proto)?;
            } else if ctx.frame(ci).tail_call_done {
                // return what the tail-called native function left on the top
                let n = ctx.frame(ci).n_res;
                ctx.frame_mut(ci).tail_call_done = false;
                let delta = vararg_delta(ctx, ci, &proto);
                ctx.frame_mut(ci).func -= delta;
                match self.finish_return(ctx, ci, n)? {
                    Some(caller) => {
                        ci = caller;
                        continue 'frames;
                    }
                    None => return Ok(()),
                }
            }
            loop {
                let pc = ctx.frame(ci).saved_pc();
                let instruction = proto.code[pc];
                set_pc(ctx, ci, pc + 1);
                let base = ctx.frame(ci).func + 1;
                let reg = |r: u8| base + r as usize;
                match instruction {
                    Instruction::LoadK { dst, constant } => {
                        let value = Value::from(&proto.constants[constant as usize]);
                        ctx.set_stack_slot(reg(dst), value);
                    }
                    Instruction::LoadNil { dst, count } => {
                        for i in 0..count {
                            ctx.set_stack_slot(reg(dst) + i as usize, Value::Nil);
                        }
                    }
                    Instruction::LoadSelf { dst } => {
                        let closure = ctx.stack_slot(base - 1).clone();
                        ctx.set_stack_slot(reg(dst), closure);
                    }
                    Instruction::LoadClosure { dst, proto: nested } => {
                        let closure = Value::closure(Rc::clone(&proto.protos[nested as usize]));
                        ctx.set_stack_slot(reg(dst), closure);
                    }
                    Instruction::Move { dst, src } => {
                        let value = ctx.stack_slot(reg(src)).clone();
                        ctx.set_stack_slot(reg(dst), value);
                    }
                    Instruction::Add { dst, lhs, rhs } => {
                        let a = ctx.stack_slot(reg(lhs)).clone();
                        let b = ctx.stack_slot(reg(rhs)).clone();
                        let value = arith(ctx, ci, &a, &b, i64::wrapping_add, |x, y| x + y)?;
                        ctx.set_stack_slot(reg(dst), value);
                    }
                    Instruction::Sub { dst, lhs, rhs } => {
                        let a = ctx.stack_slot(reg(lhs)).clone();
                        let b = ctx.stack_slot(reg(rhs)).clone();
                        let value = arith(ctx, ci, &a, &b, i64::wrapping_sub, |x, y| x - y)?;
                        ctx.set_stack_slot(reg(dst), value);
                    }
                    Instruction::EqK { reg: r, constant } => {
                        let k = Value::from(&proto.constants[constant as usize]);
                        if ctx.stack_slot(reg(r)).raw_equals(&k) {
                            set_pc(ctx, ci, pc + 2);
                        }
                    }
                    Instruction::Jump { offset } => {
                        let target = (pc as i64 + 1 + offset as i64) as usize;
                        set_pc(ctx, ci, target);
                    }
                    Instruction::Call { base: r, args, results } => {
                        let ra = reg(r);
                        if let Some(n) = args {
                            ctx.set_stack_top(ra + n as usize + 1);
                        }
                        let nresults = results.map_or(Results::All, |n| Results::Fixed(n as usize));
                        if let Some(callee) = ctx.precall(ra, nresults)? {
                            ci = callee;
                            continue 'frames;
                        }
                        if results.is_some() {
                            let top = ctx.frame(ci).top;
                            ctx.set_stack_top(top);
                        }
                    }
                    Instruction::TailCall { base: r, args } => {
                        let ra = reg(r);
                        if let Some(n) = args {
                            ctx.set_stack_top(ra + n as usize + 1);
                        }
                        if ctx.has_pending_close(base) {
                            ctx.frame_mut(ci).closing_return = true;
                            ctx.close_upto(base, CloseMode::Return, true)?;
                            ctx.frame_mut(ci).closing_return = false;
                        }
                        let narg1 = ctx.stack_top() - ra;
                        let delta = vararg_delta(ctx, ci, &proto);
                        match ctx.pretailcall(ci, ra, narg1, delta)? {
                            None => continue 'frames,
                            Some(n) => {
                                ctx.frame_mut(ci).func -= delta;
                                match self.finish_return(ctx, ci, n)? {
                                    Some(caller) => {
                                        ci = caller;
                                        continue 'frames;
                                    }
                                    None => return Ok(()),
                                }
                            }
                        }
                    }
                    Instruction::Return { base: r, count } => {
                        let ra = reg(r);
                        let n = count.map_or_else(|| ctx.stack_top() - ra, |n| n as usize);
                        if ctx.has_pending_close(base) {
                            ctx.frame_mut(ci).n_res = n;
                            let frame_top = ctx.frame(ci).top;
                            if ctx.stack_top() < frame_top {
                                ctx.set_stack_top(frame_top);
                            }
                            ctx.close_upto(base, CloseMode::Return, true)?;
                        }
                        let delta = vararg_delta(ctx, ci, &proto);
                        ctx.frame_mut(ci).func -= delta;
                        ctx.set_stack_top(ra + n);
                        match self.finish_return(ctx, ci, n)? {
                            Some(caller) => {
                                ci = caller;
                                continue 'frames;
                            }
                            None => return Ok(()),
                        }
                    }
                    Instruction::VarArg { dst, count } => {
                        let nextra = ctx.frame(ci).extra_args();
                        let func = ctx.frame(ci).func;
                        let ra = reg(dst);
                        let wanted = match count {
                            Some(n) => n as usize,
                            None => {
                                ctx.ensure_stack(nextra)?;
                                ctx.set_stack_top(ra + nextra);
                                nextra
                            }
                        };
                        for i in 0..wanted {
                            let value = if i < nextra {
                                ctx.stack_slot(func - nextra + i).clone()
                            } else {
                                Value::Nil
                            };
                            ctx.set_stack_slot(ra + i, value);
                        }
                    }
                    Instruction::ToBeClosed { reg: r } => {
                        ctx.mark_to_be_closed(reg(r))?;
                    }
                    Instruction::Close { reg: r } => {
                        ctx.close_upto(reg(r), CloseMode::Return, true)?;
                    }
                }
            }
        }
    }

    fn finish_op(&self, ctx: &mut ExecutionContext, frame: FrameId) {
        let pc = ctx.frame(frame).saved_pc();
        let instruction = match ctx.stack_slot(ctx.frame(frame).func) {
            Value::Function(Function::Closure(closure)) => {
                pc.checked_sub(1).and_then(|last| closure.proto.code.get(last).copied())
            }
            _ => None,
        };
        let base = ctx.frame(frame).func + 1;
        match instruction {
            Some(Instruction::Return { base: r, .. }) => {
                // redo the return to close the remaining slots
                let n = ctx.frame(frame).n_res;
                ctx.set_stack_top(base + r as usize + n);
                set_pc(ctx, frame, pc - 1);
            }
            Some(Instruction::Close { .. }) => set_pc(ctx, frame, pc - 1),
            Some(Instruction::TailCall { base: r, .. }) => {
                let top = ctx.stack_top();
                let state = ctx.frame_mut(frame);
                if state.closing_return {
                    // a closer yielded before the call was made
                    state.closing_return = false;
                    set_pc(ctx, frame, pc - 1);
                } else {
                    state.n_res = top - (base + r as usize);
                    state.tail_call_done = true;
                }
            }
            Some(Instruction::Call { results: Some(_), .. }) => {
                let top = ctx.frame(frame).top;
                ctx.set_stack_top(top);
            }
            _ => {}
        }
    }
}

impl RegisterVm {
    /// Pop frame `ci` with its `n` results on the top. Returns the caller
    /// to continue with, or `None` when the activation ends.
    fn finish_return(
        &self,
        ctx: &mut ExecutionContext,
        ci: FrameId,
        n: usize,
    ) -> CallResult<Option<FrameId>> {
        let fresh = ctx.frame(ci).fresh;
        let wanted = ctx.frame(ci).nresults;
        ctx.poscall(ci, n)?;
        if fresh {
            return Ok(None);
        }
        let caller = ctx.current_frame();
        if wanted != Results::All {
            let top = ctx.frame(caller).top;
            ctx.set_stack_top(top);
        }
        Ok(Some(caller))
    }
}
