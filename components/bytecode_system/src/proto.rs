//! Function prototypes
//!
//! A [`Proto`] is the immutable description of an interpreted function:
//! parameter shape, frame size, code, constants and nested prototypes.

use std::rc::Rc;

use thiserror::Error;

use crate::opcode::Instruction;
use crate::value::Constant;

/// Structural defects found by [`Proto::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// Fixed parameters do not fit in the frame
    #[error("{name}: {num_params} parameters exceed frame size {max_stack}")]
    TooManyParams {
        /// Prototype name
        name: String,
        /// Declared parameters
        num_params: u8,
        /// Declared frame size
        max_stack: u8,
    },
    /// A register lies outside the frame
    #[error("{name}: instruction {pc} uses register {register} beyond frame size {max_stack}")]
    RegisterOutOfRange {
        /// Prototype name
        name: String,
        /// Instruction index
        pc: usize,
        /// Offending register
        register: u8,
        /// Declared frame size
        max_stack: u8,
    },
    /// A constant index is past the constant pool
    #[error("{name}: instruction {pc} references missing constant {index}")]
    ConstantOutOfRange {
        /// Prototype name
        name: String,
        /// Instruction index
        pc: usize,
        /// Offending index
        index: u16,
    },
    /// A nested prototype index is past the prototype list
    #[error("{name}: instruction {pc} references missing prototype {index}")]
    ProtoOutOfRange {
        /// Prototype name
        name: String,
        /// Instruction index
        pc: usize,
        /// Offending index
        index: u16,
    },
    /// A jump lands outside the code
    #[error("{name}: jump at {pc} lands outside the code")]
    JumpOutOfRange {
        /// Prototype name
        name: String,
        /// Instruction index
        pc: usize,
    },
    /// Control can run past the last instruction
    #[error("{name}: code does not end with a return")]
    MissingReturn {
        /// Prototype name
        name: String,
    },
}

/// Function prototype produced by a compiler or loader
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Proto {
    /// Name used in diagnostics
    pub name: String,
    /// Number of fixed parameters
    pub num_params: u8,
    /// Whether extra arguments are kept for `VarArg`
    pub is_vararg: bool,
    /// Registers the frame needs
    pub max_stack: u8,
    /// Instruction sequence
    pub code: Vec<Instruction>,
    /// Constant pool
    pub constants: Vec<Constant>,
    /// Nested prototypes instantiated by `LoadClosure`
    pub protos: Vec<Rc<Proto>>,
}

impl Proto {
    /// Create an empty prototype
    pub fn new(name: impl Into<String>, num_params: u8, max_stack: u8) -> Self {
        Self {
            name: name.into(),
            num_params,
            max_stack,
            ..Self::default()
        }
    }

    /// Mark the prototype as accepting extra arguments
    pub fn vararg(mut self) -> Self {
        self.is_vararg = true;
        self
    }

    /// Append an instruction and return its index
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        self.code.push(instruction);
        self.code.len() - 1
    }

    /// Add a constant and return its index
    pub fn add_constant(&mut self, constant: impl Into<Constant>) -> u16 {
        let constant = constant.into();
        if let Some(idx) = self.constants.iter().position(|c| *c == constant) {
            return idx as u16;
        }
        self.constants.push(constant);
        (self.constants.len() - 1) as u16
    }

    /// Add a nested prototype and return its index
    pub fn add_proto(&mut self, proto: Proto) -> u16 {
        self.protos.push(Rc::new(proto));
        (self.protos.len() - 1) as u16
    }

    /// Check register, constant, prototype and jump references
    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.num_params > self.max_stack {
            return Err(ProtoError::TooManyParams {
                name: self.name.clone(),
                num_params: self.num_params,
                max_stack: self.max_stack,
            });
        }
        match self.code.last() {
            Some(last) if !last.falls_through() => {}
            _ => {
                return Err(ProtoError::MissingReturn {
                    name: self.name.clone(),
                })
            }
        }
        for (pc, instruction) in self.code.iter().enumerate() {
            if let Some(&register) = instruction
                .registers()
                .iter()
                .find(|&&r| r >= self.max_stack)
            {
                return Err(ProtoError::RegisterOutOfRange {
                    name: self.name.clone(),
                    pc,
                    register,
                    max_stack: self.max_stack,
                });
            }
            match *instruction {
                Instruction::LoadK { constant, .. } | Instruction::EqK { constant, .. }
                    if constant as usize >= self.constants.len() =>
                {
                    return Err(ProtoError::ConstantOutOfRange {
                        name: self.name.clone(),
                        pc,
                        index: constant,
                    });
                }
                Instruction::LoadClosure { proto, .. } if proto as usize >= self.protos.len() => {
                    return Err(ProtoError::ProtoOutOfRange {
                        name: self.name.clone(),
                        pc,
                        index: proto,
                    });
                }
                Instruction::Jump { offset } => {
                    let target = pc as i64 + 1 + offset as i64;
                    if target < 0 || target >= self.code.len() as i64 {
                        return Err(ProtoError::JumpOutOfRange {
                            name: self.name.clone(),
                            pc,
                        });
                    }
                }
                Instruction::EqK { .. } if pc + 1 >= self.code.len() => {
                    return Err(ProtoError::JumpOutOfRange {
                        name: self.name.clone(),
                        pc,
                    });
                }
                _ => {}
            }
        }
        self.protos.iter().try_for_each(|p| p.validate())
    }
}
