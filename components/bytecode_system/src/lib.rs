//! Loaded callable format for the execution core
//!
//! An external compiler or loader produces [`Proto`] values (function
//! prototypes); the execution core turns them into closures and runs them
//! with its reference register machine.
//!
//! # Features
//!
//! - Register-based instruction set with explicit call/return result counts
//! - Constant pool and nested prototypes
//! - Structural validation before a prototype is handed to the runtime
//!
//! # Example
//!
//! ```
//! use bytecode_system::{Constant, Instruction, Proto};
//!
//! let mut proto = Proto::new("answer", 0, 1);
//! let k = proto.add_constant(Constant::Integer(42));
//! proto.emit(Instruction::LoadK { dst: 0, constant: k });
//! proto.emit(Instruction::Return { base: 0, count: Some(1) });
//!
//! assert!(proto.validate().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod opcode;
pub mod proto;
pub mod value;

// Re-export main types at crate root
pub use opcode::{Instruction, Register};
pub use proto::{Proto, ProtoError};
pub use value::Constant;
