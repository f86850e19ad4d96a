//! Unit tests for Instruction helpers

use bytecode_system::Instruction;

#[test]
fn test_fall_through() {
    assert!(Instruction::LoadNil { dst: 0, count: 1 }.falls_through());
    assert!(Instruction::Call {
        base: 0,
        args: None,
        results: None
    }
    .falls_through());
    assert!(!Instruction::TailCall {
        base: 0,
        args: Some(1)
    }
    .falls_through());
    assert!(!Instruction::Jump { offset: -2 }.falls_through());
}

#[test]
fn test_load_nil_registers() {
    assert_eq!(
        Instruction::LoadNil { dst: 3, count: 3 }.registers(),
        vec![3, 4, 5]
    );
}

#[test]
fn test_vararg_registers() {
    assert_eq!(
        Instruction::VarArg {
            dst: 1,
            count: Some(2)
        }
        .registers(),
        vec![1, 2]
    );
    assert!(Instruction::Jump { offset: 0 }.registers().is_empty());
}
