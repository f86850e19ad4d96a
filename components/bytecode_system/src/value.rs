//! Constant pool values
//!
//! Literal values a prototype can load with [`Instruction::LoadK`](crate::Instruction::LoadK).

use std::fmt;

/// A literal stored in a prototype's constant pool
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// The nil value
    Nil,
    /// Boolean literal
    Boolean(bool),
    /// Integer literal
    Integer(i64),
    /// Floating-point literal
    Number(f64),
    /// String literal
    String(String),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => write!(f, "nil"),
            Constant::Boolean(b) => write!(f, "{}", b),
            Constant::Integer(n) => write!(f, "{}", n),
            Constant::Number(n) => write!(f, "{}", n),
            Constant::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Constant {
    fn from(n: i64) -> Self {
        Constant::Integer(n)
    }
}

impl From<f64> for Constant {
    fn from(n: f64) -> Self {
        Constant::Number(n)
    }
}

impl From<bool> for Constant {
    fn from(b: bool) -> Self {
        Constant::Boolean(b)
    }
}

impl From<&str> for Constant {
    fn from(s: &str) -> Self {
        Constant::String(s.to_string())
    }
}
