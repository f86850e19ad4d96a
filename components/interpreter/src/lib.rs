//! Execution core of the runtime
//!
//! This crate provides the machinery every call goes through:
//! - Execution contexts with a growable value stack and call frames
//! - A call dispatcher for native functions, interpreted closures and
//!   `__call` targets, with proper tail calls
//! - Protected calls, message handlers and to-be-closed slots
//! - Stackful coroutines with continuations for native functions
//! - Call/return hooks and a safe-point seam for a garbage collector
//! - A reference register machine for `bytecode_system` prototypes
//!
//! # Example
//!
//! ```
//! use bytecode_system::{Instruction, Proto};
//! use core_types::Status;
//! use interpreter::{Results, Runtime, Value};
//!
//! let rt = Runtime::new();
//! let mut ctx = rt.main_thread().borrow_mut();
//!
//! let mut proto = Proto::new("double", 1, 2);
//! proto.emit(Instruction::Add { dst: 1, lhs: 0, rhs: 0 });
//! proto.emit(Instruction::Return { base: 1, count: Some(1) });
//! assert_eq!(ctx.load(proto), Status::Ok);
//!
//! ctx.push(21i64);
//! ctx.call(1, Results::Fixed(1)).unwrap();
//! assert_eq!(ctx.pop(), Value::Integer(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call_frame;
pub mod closing;
pub mod context;
pub mod coroutine;
mod dispatch;
pub mod error;
pub mod gc_integration;
pub mod hooks;
pub mod metatable;
mod protect;
pub mod runtime;
mod stack;
pub mod value;
pub mod vm;

// Re-export main types at crate root
pub use call_frame::{CallFrame, Continuation, FrameId, FrameRange, KContext, Results};
pub use closing::CloseMode;
pub use context::ExecutionContext;
pub use coroutine::ThreadRef;
pub use error::{CallResult, RuntimeError, Unwind};
pub use gc_integration::{Collector, NoCollector};
pub use hooks::{HookEvent, HookFn, HookMask, HookRecord};
pub use metatable::{MetaEvent, MetamethodLookup, UserDataMetamethods};
pub use runtime::{GlobalState, PanicHook, Runtime, RuntimeBuilder};
pub use value::{Closure, Function, NativeFn, NativeFunction, UserData, Value};
pub use vm::{BytecodeExecutor, RegisterVm};
