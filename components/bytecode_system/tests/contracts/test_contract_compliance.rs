//! Contract compliance tests for bytecode_system
//!
//! Pins the prototype shape the execution core consumes.

use bytecode_system::{Constant, Instruction, Proto, Register};

#[test]
fn test_proto_fields() {
    let proto = Proto::new("main", 0, 2);
    assert_eq!(proto.name, "main");
    assert_eq!(proto.max_stack, 2);
    assert!(!proto.is_vararg);
    assert!(proto.code.is_empty());
    assert!(proto.constants.is_empty());
    assert!(proto.protos.is_empty());
}

#[test]
fn test_register_is_byte_sized() {
    let r: Register = 255;
    let _ = Instruction::Move { dst: r, src: 0 };
}

#[test]
fn test_constant_variants() {
    let _ = [
        Constant::Nil,
        Constant::Boolean(true),
        Constant::Integer(1),
        Constant::Number(1.5),
        Constant::String("s".into()),
    ];
}

#[test]
fn test_open_counts_are_none() {
    let call = Instruction::Call {
        base: 0,
        args: None,
        results: None,
    };
    assert!(matches!(
        call,
        Instruction::Call {
            args: None,
            results: None,
            ..
        }
    ));
}
