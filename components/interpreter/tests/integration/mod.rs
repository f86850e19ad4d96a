//! Integration tests for interpreter
//!
//! Bytecode, native functions, coroutines and to-be-closed slots working
//! together through the reference register machine.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use bytecode_system::{Constant, Instruction, Proto};
use core_types::{ContextStatus, Status};
use interpreter::{
    CallResult, ExecutionContext, KContext, MetaEvent, Results, Runtime, UserData, Value,
};

type Log = Rc<RefCell<Vec<String>>>;

/// Userdata whose `__close` records "<name>:<error object>"
fn closer(log: &Log, name: &str) -> Value {
    let log = Rc::clone(log);
    let name = name.to_string();
    let close = Value::native("close", move |ctx| {
        log.borrow_mut().push(format!("{}:{}", name, ctx.value(1)));
        Ok(0)
    });
    Value::userdata(UserData::new(()).with_metamethod(MetaEvent::Close, close))
}

fn yield_all() -> Value {
    Value::native("yield", |ctx| {
        let n = ctx.get_top();
        ctx.yield_values(n)
    })
}

/// countdown(n) = n == 0 and "done" or countdown(n - 1), as a tail call
fn countdown() -> Proto {
    let mut proto = Proto::new("countdown", 1, 3);
    let zero = proto.add_constant(Constant::Integer(0));
    let one = proto.add_constant(Constant::Integer(1));
    let done = proto.add_constant("done");
    proto.emit(Instruction::EqK { reg: 0, constant: zero });
    proto.emit(Instruction::Jump { offset: 2 });
    proto.emit(Instruction::LoadK { dst: 1, constant: done });
    proto.emit(Instruction::Return { base: 1, count: Some(1) });
    proto.emit(Instruction::LoadSelf { dst: 1 });
    proto.emit(Instruction::LoadK { dst: 2, constant: one });
    proto.emit(Instruction::Sub { dst: 2, lhs: 0, rhs: 2 });
    proto.emit(Instruction::TailCall { base: 1, args: Some(1) });
    proto
}

/// gen(yield, n): yields n, n - 1, ..., 1 and returns nothing
fn generator() -> Proto {
    let mut proto = Proto::new("gen", 2, 4);
    let zero = proto.add_constant(Constant::Integer(0));
    let one = proto.add_constant(Constant::Integer(1));
    proto.emit(Instruction::EqK { reg: 1, constant: zero }); // 0
    proto.emit(Instruction::Jump { offset: 1 }); // 1
    proto.emit(Instruction::Return { base: 1, count: Some(0) }); // 2
    proto.emit(Instruction::Move { dst: 2, src: 0 }); // 3
    proto.emit(Instruction::Move { dst: 3, src: 1 }); // 4
    proto.emit(Instruction::Call { base: 2, args: Some(1), results: Some(0) }); // 5
    proto.emit(Instruction::LoadK { dst: 2, constant: one }); // 6
    proto.emit(Instruction::Sub { dst: 1, lhs: 1, rhs: 2 }); // 7
    proto.emit(Instruction::Jump { offset: -9 }); // 8
    proto
}

// ============================================================================
// Tail calls
// ============================================================================

#[test]
fn test_tail_recursion_million_deep() {
    let rt = Runtime::new();
    let mut ctx = rt.main_thread().borrow_mut();
    assert_eq!(ctx.load(countdown()), Status::Ok);
    ctx.push(1_000_000i64);
    ctx.call(1, Results::Fixed(1)).unwrap();
    assert_eq!(ctx.pop(), Value::from("done"));
    assert_eq!(ctx.frame_depth(), 0);
}

#[test]
fn test_tail_call_into_native() {
    // f(g, x) = g(x) as a tail call
    let mut proto = Proto::new("forward", 2, 3);
    proto.emit(Instruction::Move { dst: 2, src: 1 });
    proto.emit(Instruction::Move { dst: 1, src: 0 });
    proto.emit(Instruction::Move { dst: 0, src: 2 });
    proto.emit(Instruction::TailCall { base: 1, args: Some(1) });
    let rt = Runtime::new();
    let mut ctx = rt.main_thread().borrow_mut();
    ctx.push("below");
    assert_eq!(ctx.load(proto), Status::Ok);
    ctx.push(Value::native("twice", |ctx| {
        let v = ctx.value(0);
        ctx.push(v.clone());
        ctx.push(v);
        Ok(2)
    }));
    ctx.push(9i64);
    ctx.call(2, Results::All).unwrap();
    assert_eq!(
        ctx.frame_values(),
        &[Value::from("below"), Value::Integer(9), Value::Integer(9)]
    );
}

// ============================================================================
// Varargs
// ============================================================================

#[test]
fn test_vararg_function_returns_its_arguments() {
    let mut proto = Proto::new("pack", 0, 1).vararg();
    proto.emit(Instruction::VarArg { dst: 0, count: None });
    proto.emit(Instruction::Return { base: 0, count: None });
    let rt = Runtime::new();
    let mut ctx = rt.main_thread().borrow_mut();
    assert_eq!(ctx.load(proto), Status::Ok);
    ctx.push(1i64);
    ctx.push("two");
    ctx.push(3.0f64);
    ctx.call(3, Results::All).unwrap();
    assert_eq!(
        ctx.frame_values(),
        &[Value::Integer(1), Value::from("two"), Value::Number(3.0)]
    );
}

#[test]
fn test_vararg_with_fixed_parameter() {
    // second(a, ...) = a, (first extra argument)
    let mut proto = Proto::new("second", 1, 2).vararg();
    proto.emit(Instruction::VarArg { dst: 1, count: Some(1) });
    proto.emit(Instruction::Return { base: 0, count: Some(2) });
    let rt = Runtime::new();
    let mut ctx = rt.main_thread().borrow_mut();
    ctx.load(proto);
    ctx.push("a");
    ctx.push("b");
    ctx.push("c");
    ctx.call(3, Results::All).unwrap();
    assert_eq!(ctx.frame_values(), &[Value::from("a"), Value::from("b")]);

    // missing extra arguments read as nil
    let mut proto = Proto::new("second", 1, 2).vararg();
    proto.emit(Instruction::VarArg { dst: 1, count: Some(1) });
    proto.emit(Instruction::Return { base: 1, count: Some(1) });
    ctx.set_top(0).unwrap();
    ctx.load(proto);
    ctx.push("a");
    ctx.call(1, Results::All).unwrap();
    assert_eq!(ctx.frame_values(), &[Value::Nil]);
}

// ============================================================================
// To-be-closed slots
// ============================================================================

#[test]
fn test_bytecode_closes_in_reverse_order() {
    // f(a, b): mark both, return "x"
    let mut proto = Proto::new("scoped", 2, 3);
    let x = proto.add_constant("x");
    proto.emit(Instruction::ToBeClosed { reg: 0 });
    proto.emit(Instruction::ToBeClosed { reg: 1 });
    proto.emit(Instruction::LoadK { dst: 2, constant: x });
    proto.emit(Instruction::Return { base: 2, count: Some(1) });
    let rt = Runtime::new();
    let log: Log = Rc::default();
    let mut ctx = rt.main_thread().borrow_mut();
    ctx.load(proto);
    ctx.push(closer(&log, "a"));
    ctx.push(closer(&log, "b"));
    ctx.call(2, Results::Fixed(1)).unwrap();
    assert_eq!(ctx.pop(), Value::from("x"));
    assert_eq!(*log.borrow(), vec!["b:nil", "a:nil"]);
}

#[test]
fn test_close_instruction_closes_block() {
    let mut proto = Proto::new("block", 1, 2);
    let after = proto.add_constant("after");
    proto.emit(Instruction::ToBeClosed { reg: 0 });
    proto.emit(Instruction::Close { reg: 0 });
    proto.emit(Instruction::LoadK { dst: 1, constant: after });
    proto.emit(Instruction::Return { base: 1, count: Some(1) });
    let rt = Runtime::new();
    let log: Log = Rc::default();
    let mut ctx = rt.main_thread().borrow_mut();
    ctx.load(proto);
    ctx.push(closer(&log, "r"));
    ctx.call(1, Results::Fixed(1)).unwrap();
    assert_eq!(ctx.pop(), Value::from("after"));
    assert_eq!(*log.borrow(), vec!["r:nil"]);
}

#[test]
fn test_error_passes_error_object_to_closers() {
    let mut proto = Proto::new("faulty", 1, 2);
    proto.emit(Instruction::ToBeClosed { reg: 0 });
    proto.emit(Instruction::Add { dst: 1, lhs: 0, rhs: 0 });
    proto.emit(Instruction::Return { base: 1, count: Some(1) });
    let rt = Runtime::new();
    let log: Log = Rc::default();
    let mut ctx = rt.main_thread().borrow_mut();
    ctx.load(proto);
    ctx.push(closer(&log, "r"));
    assert_eq!(ctx.pcall(1, Results::Fixed(1), None), Status::RuntimeError);
    let expected = "attempt to perform arithmetic on a userdata value";
    assert_eq!(ctx.pop(), Value::from(expected));
    assert_eq!(*log.borrow(), vec![format!("r:{}", expected)]);
}

#[test]
fn test_error_closes_both_slots_before_installing_error() {
    let mut proto = Proto::new("faulty_pair", 2, 3);
    proto.emit(Instruction::ToBeClosed { reg: 0 });
    proto.emit(Instruction::ToBeClosed { reg: 1 });
    proto.emit(Instruction::Add { dst: 2, lhs: 0, rhs: 1 });
    proto.emit(Instruction::Return { base: 2, count: Some(1) });
    let rt = Runtime::new();
    let log: Log = Rc::default();
    let mut ctx = rt.main_thread().borrow_mut();
    ctx.push("keep");
    let saved_top = ctx.get_top();
    ctx.load(proto);
    ctx.push(closer(&log, "a"));
    ctx.push(closer(&log, "b"));
    assert_eq!(ctx.pcall(2, Results::Fixed(1), None), Status::RuntimeError);
    let expected = "attempt to perform arithmetic on a userdata value";
    assert_eq!(
        *log.borrow(),
        vec![format!("b:{}", expected), format!("a:{}", expected)]
    );
    assert_eq!(ctx.get_top(), saved_top + 1);
    assert_eq!(ctx.pop(), Value::from(expected));
    assert_eq!(ctx.pop(), Value::from("keep"));
}

// ============================================================================
// Coroutines
// ============================================================================

#[test]
fn test_bytecode_generator() {
    let rt = Runtime::new();
    let co = rt.new_thread();
    co.borrow_mut().push(Value::closure(generator()));
    let (status, values) = co.resume(None, vec![yield_all(), Value::Integer(3)]);
    assert_eq!((status, values), (Status::Yield, vec![Value::Integer(3)]));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!((status, values), (Status::Yield, vec![Value::Integer(2)]));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!((status, values), (Status::Yield, vec![Value::Integer(1)]));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!((status, values), (Status::Ok, Vec::new()));
    assert_eq!(co.status(), ContextStatus::Dead);
}

#[test]
fn test_tail_called_native_yields() {
    // forward(g, x) = g(x) as a tail call, the last instruction
    let mut proto = Proto::new("forward", 2, 3);
    proto.emit(Instruction::Move { dst: 2, src: 1 });
    proto.emit(Instruction::Move { dst: 1, src: 0 });
    proto.emit(Instruction::Move { dst: 0, src: 2 });
    proto.emit(Instruction::TailCall { base: 1, args: Some(1) });
    let rt = Runtime::new();
    let co = rt.new_thread();
    co.borrow_mut().push(Value::closure(proto));
    let (status, values) = co.resume(None, vec![yield_all(), Value::Integer(9)]);
    assert_eq!((status, values), (Status::Yield, vec![Value::Integer(9)]));
    let (status, values) = co.resume(None, vec![Value::from("back")]);
    assert_eq!((status, values), (Status::Ok, vec![Value::from("back")]));
    assert_eq!(co.status(), ContextStatus::Dead);
}

#[test]
fn test_vararg_tail_call_yields() {
    // relay(f, ...) = f(...) as a tail call
    let mut proto = Proto::new("relay", 0, 2).vararg();
    proto.emit(Instruction::VarArg { dst: 0, count: None });
    proto.emit(Instruction::TailCall { base: 0, args: None });
    let rt = Runtime::new();
    let co = rt.new_thread();
    co.borrow_mut().push(Value::closure(proto));
    let (status, values) = co.resume(None, vec![yield_all(), Value::Integer(9)]);
    assert_eq!((status, values), (Status::Yield, vec![Value::Integer(9)]));
    let (status, values) = co.resume(None, vec![Value::from("x"), Value::from("y")]);
    assert_eq!(status, Status::Ok);
    assert_eq!(values, vec![Value::from("x"), Value::from("y")]);
}

#[test]
fn test_closer_yields_before_tail_call() {
    // scoped(r, f): mark r, return f()
    let mut proto = Proto::new("scoped_tail", 2, 2);
    proto.emit(Instruction::ToBeClosed { reg: 0 });
    proto.emit(Instruction::TailCall { base: 1, args: Some(0) });
    let close = Value::native("close", |ctx| {
        ctx.push("closing");
        ctx.yield_values(1)
    });
    let resource = Value::userdata(UserData::new(()).with_metamethod(MetaEvent::Close, close));
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let finish = Value::native("finish", move |ctx| {
        *counter.borrow_mut() += 1;
        ctx.push("done");
        Ok(1)
    });
    let rt = Runtime::new();
    let co = rt.new_thread();
    co.borrow_mut().push(Value::closure(proto));
    let (status, values) = co.resume(None, vec![resource, finish]);
    assert_eq!((status, values), (Status::Yield, vec![Value::from("closing")]));
    assert_eq!(*calls.borrow(), 0);
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!((status, values), (Status::Ok, vec![Value::from("done")]));
    assert_eq!(*calls.borrow(), 1);
}

fn after_call(ctx: &mut ExecutionContext, status: Status, kctx: KContext) -> CallResult<usize> {
    ctx.push(format!("{} {}", status, kctx));
    Ok(ctx.get_top())
}

#[test]
fn test_call_k_continues_after_yield() {
    let rt = Runtime::new();
    let co = rt.new_thread();
    co.borrow_mut().push(Value::native("body", |ctx| {
        ctx.push(yield_all());
        ctx.push("out");
        ctx.call_k(1, Results::All, 7, Some(after_call))?;
        // not reached when the callee yields
        ctx.push("direct");
        Ok(1)
    }));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!((status, values), (Status::Yield, vec![Value::from("out")]));
    let (status, values) = co.resume(None, vec![Value::from("in")]);
    assert_eq!(status, Status::Ok);
    assert_eq!(values, vec![Value::from("in"), Value::from("yield 7")]);
}

#[test]
fn test_call_without_continuation_cannot_be_yielded_across() {
    let rt = Runtime::new();
    let co = rt.new_thread();
    co.borrow_mut().push(Value::native("body", |ctx| {
        ctx.push(yield_all());
        ctx.call(0, Results::Fixed(0))?;
        Ok(0)
    }));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!(status, Status::RuntimeError);
    assert_eq!(
        values,
        vec![Value::from("attempt to yield across a native-call boundary")]
    );
    assert_eq!(co.status(), ContextStatus::ErrorDone);
}

#[test]
fn test_pcall_k_recovers_in_coroutine() {
    let rt = Runtime::new();
    let co = rt.new_thread();
    co.borrow_mut().push(Value::native("body", |ctx| {
        ctx.push(Value::native("fails", |ctx| Err(ctx.runtime_error("boom"))));
        let status = ctx.pcall_k(0, Results::Fixed(1), None, 5, Some(after_call))?;
        // reached only without an error
        ctx.push(status.to_string());
        Ok(2)
    }));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!(status, Status::Ok);
    assert_eq!(
        values,
        vec![Value::from("boom"), Value::from("runtime error 5")]
    );
}

#[test]
fn test_pcall_k_with_yield_inside() {
    let rt = Runtime::new();
    let co = rt.new_thread();
    co.borrow_mut().push(Value::native("body", |ctx| {
        ctx.push(yield_all());
        ctx.push("paused");
        ctx.pcall_k(1, Results::Fixed(1), None, 1, Some(after_call))?;
        Ok(0)
    }));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!((status, values), (Status::Yield, vec![Value::from("paused")]));
    let (status, values) = co.resume(None, vec![Value::from("resumed")]);
    assert_eq!(status, Status::Ok);
    assert_eq!(values, vec![Value::from("resumed"), Value::from("yield 1")]);
}

#[test]
fn test_closer_may_yield_while_native_returns() {
    let rt = Runtime::new();
    let co = rt.new_thread();
    let close = Value::native("close", |ctx| {
        ctx.push("closing");
        ctx.yield_values(1)
    });
    let resource = Value::userdata(UserData::new(()).with_metamethod(MetaEvent::Close, close));
    co.borrow_mut().push(Value::native("body", move |ctx| {
        ctx.push(resource.clone());
        ctx.to_be_closed(0)?;
        ctx.push("result");
        Ok(1)
    }));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!((status, values), (Status::Yield, vec![Value::from("closing")]));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!(status, Status::Ok);
    assert_eq!(values, vec![Value::from("result")]);
}

#[test]
fn test_close_suspended_coroutine_runs_closers() {
    let rt = Runtime::new();
    let log: Log = Rc::default();
    let resource = closer(&log, "r");
    let co = rt.new_thread();
    co.borrow_mut().push(Value::native("body", move |ctx| {
        ctx.push(resource.clone());
        ctx.to_be_closed(0)?;
        ctx.yield_values(0)
    }));
    let (status, _) = co.resume(None, Vec::new());
    assert_eq!(status, Status::Yield);
    assert!(co.close(None).is_ok());
    assert_eq!(*log.borrow(), vec!["r:nil"]);
    assert_eq!(co.status(), ContextStatus::Dead);
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!(status, Status::RuntimeError);
    assert_eq!(values, vec![Value::from("cannot resume dead coroutine")]);
}

#[test]
fn test_running_coroutine_cannot_be_closed() {
    let rt = Runtime::new();
    let co = rt.new_thread();
    let handle = co.clone();
    co.borrow_mut().push(Value::native("body", move |ctx| {
        let err = handle.close(Some(&*ctx)).unwrap_err();
        ctx.push(err.value);
        Ok(1)
    }));
    let (status, values) = co.resume(None, Vec::new());
    assert_eq!(status, Status::Ok);
    assert_eq!(values, vec![Value::from("cannot close a running coroutine")]);
}

#[test]
fn test_nested_resume_inherits_native_depth() {
    let rt = Runtime::new();
    let depth = Rc::new(RefCell::new(0));
    let seen = Rc::clone(&depth);
    let inner = rt.new_thread();
    inner.borrow_mut().push(Value::native("probe", move |ctx| {
        *seen.borrow_mut() = ctx.native_calls();
        Ok(0)
    }));
    let outer = rt.new_thread();
    outer.borrow_mut().push(Value::native("driver", move |ctx| {
        let (status, _) = inner.resume(Some(&*ctx), Vec::new());
        ctx.push(status == Status::Ok);
        Ok(1)
    }));
    let (status, values) = outer.resume(None, Vec::new());
    assert_eq!(status, Status::Ok);
    assert_eq!(values, vec![Value::Boolean(true)]);
    // one level per resume
    assert_eq!(*depth.borrow(), 2);
}

// ============================================================================
// Unprotected errors
// ============================================================================

#[test]
fn test_unprotected_error_runs_panic_hook_then_panics() {
    let seen: Log = Rc::default();
    let log = Rc::clone(&seen);
    let rt = Runtime::builder()
        .panic_hook(move |_, err| log.borrow_mut().push(err.to_string()))
        .build()
        .unwrap();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = rt.main_thread().borrow_mut();
        ctx.push(Value::native("fails", |ctx| Err(ctx.runtime_error("fatal"))));
        let _ = ctx.call(0, Results::Fixed(0));
    }));
    assert!(outcome.is_err());
    assert_eq!(*seen.borrow(), vec!["fatal"]);
}

#[test]
fn test_unprotected_coroutine_error_reaches_protected_main() {
    let rt = Runtime::new();
    let co = rt.new_thread();
    let mut ctx = rt.main_thread().borrow_mut();
    let err = ctx
        .run_protected(|_| -> CallResult<()> {
            let mut co_ctx = co.borrow_mut();
            co_ctx.push(Value::native("fails", |ctx| Err(ctx.runtime_error("lost"))));
            co_ctx.call(0, Results::Fixed(0))
        })
        .unwrap_err();
    assert_eq!(err.value, Value::from("lost"));
    assert_eq!(co.status(), ContextStatus::ErrorDone);
    assert_eq!(
        co.borrow().terminal_error().map(|e| e.value.clone()),
        Some(Value::from("lost"))
    );
}
