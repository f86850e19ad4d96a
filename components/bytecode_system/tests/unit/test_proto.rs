//! Unit tests for Proto construction and validation

use bytecode_system::{Constant, Instruction, Proto, ProtoError};

fn countdown() -> Proto {
    let mut proto = Proto::new("countdown", 1, 3);
    let zero = proto.add_constant(0i64);
    let one = proto.add_constant(1i64);
    proto.emit(Instruction::EqK {
        reg: 0,
        constant: zero,
    });
    proto.emit(Instruction::Jump { offset: 1 });
    proto.emit(Instruction::Return {
        base: 0,
        count: Some(1),
    });
    proto.emit(Instruction::LoadK { dst: 2, constant: one });
    proto.emit(Instruction::Sub { dst: 2, lhs: 0, rhs: 2 });
    proto.emit(Instruction::LoadSelf { dst: 1 });
    proto.emit(Instruction::Move { dst: 0, src: 2 });
    proto.emit(Instruction::Return {
        base: 0,
        count: Some(1),
    });
    proto
}

#[test]
fn test_valid_proto() {
    assert_eq!(countdown().validate(), Ok(()));
}

#[test]
fn test_emit_returns_index() {
    let mut proto = Proto::new("f", 0, 1);
    assert_eq!(proto.emit(Instruction::LoadNil { dst: 0, count: 1 }), 0);
    assert_eq!(
        proto.emit(Instruction::Return {
            base: 0,
            count: None
        }),
        1
    );
}

#[test]
fn test_vararg_builder() {
    let proto = Proto::new("f", 2, 4).vararg();
    assert!(proto.is_vararg);
    assert_eq!(proto.num_params, 2);
}

#[test]
fn test_too_many_params() {
    let mut proto = Proto::new("f", 4, 2);
    proto.emit(Instruction::Return {
        base: 0,
        count: Some(0),
    });
    assert!(matches!(
        proto.validate(),
        Err(ProtoError::TooManyParams { num_params: 4, .. })
    ));
}

#[test]
fn test_missing_constant() {
    let mut proto = Proto::new("f", 0, 1);
    proto.emit(Instruction::LoadK { dst: 0, constant: 7 });
    proto.emit(Instruction::Return {
        base: 0,
        count: Some(1),
    });
    assert!(matches!(
        proto.validate(),
        Err(ProtoError::ConstantOutOfRange { index: 7, .. })
    ));
}

#[test]
fn test_missing_nested_proto() {
    let mut proto = Proto::new("f", 0, 1);
    proto.emit(Instruction::LoadClosure { dst: 0, proto: 0 });
    proto.emit(Instruction::Return {
        base: 0,
        count: Some(1),
    });
    assert!(matches!(
        proto.validate(),
        Err(ProtoError::ProtoOutOfRange { .. })
    ));
}

#[test]
fn test_eqk_followed_by_instruction_is_valid() {
    let mut proto = Proto::new("f", 0, 1);
    let k = proto.add_constant(Constant::Nil);
    proto.emit(Instruction::Return {
        base: 0,
        count: Some(0),
    });
    proto.code.insert(0, Instruction::EqK { reg: 0, constant: k });
    assert_eq!(proto.validate(), Ok(()));
}
