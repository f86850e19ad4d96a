//! Instruction set of the reference register machine
//!
//! Registers are numbered from the first slot after the callee of the
//! running frame. Counts given as `Option` use `None` for "up to the stack
//! top" (arguments) or "all of them" (results).

/// Register index relative to the frame base
pub type Register = u8;

/// One instruction of a [`Proto`](crate::Proto)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// R[dst] = K[constant]
    LoadK {
        /// Destination register
        dst: Register,
        /// Constant pool index
        constant: u16,
    },
    /// R[dst], ..., R[dst + count - 1] = nil
    LoadNil {
        /// First register
        dst: Register,
        /// Number of registers cleared
        count: u8,
    },
    /// R[dst] = the running closure
    LoadSelf {
        /// Destination register
        dst: Register,
    },
    /// R[dst] = new closure over nested prototype `proto`
    LoadClosure {
        /// Destination register
        dst: Register,
        /// Nested prototype index
        proto: u16,
    },
    /// R[dst] = R[src]
    Move {
        /// Destination register
        dst: Register,
        /// Source register
        src: Register,
    },
    /// R[dst] = R[lhs] + R[rhs]
    Add {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// R[dst] = R[lhs] - R[rhs]
    Sub {
        /// Destination register
        dst: Register,
        /// Left operand
        lhs: Register,
        /// Right operand
        rhs: Register,
    },
    /// Skip the next instruction when R[reg] equals K[constant]
    EqK {
        /// Tested register
        reg: Register,
        /// Constant pool index
        constant: u16,
    },
    /// pc += offset
    Jump {
        /// Signed offset from the next instruction
        offset: i32,
    },
    /// R[base], ... = R[base](R[base + 1], ...)
    Call {
        /// Register holding the callee; arguments follow it
        base: Register,
        /// Argument count, or `None` to pass everything up to the stack top
        args: Option<u8>,
        /// Result count, or `None` to keep all results (stack top marks the end)
        results: Option<u8>,
    },
    /// return R[base](R[base + 1], ...)
    TailCall {
        /// Register holding the callee; arguments follow it
        base: Register,
        /// Argument count, or `None` to pass everything up to the stack top
        args: Option<u8>,
    },
    /// return R[base], ..., R[base + count - 1]
    Return {
        /// First returned register
        base: Register,
        /// Value count, or `None` for everything up to the stack top
        count: Option<u8>,
    },
    /// R[dst], ... = extra arguments of a vararg function
    VarArg {
        /// First destination register
        dst: Register,
        /// Values wanted, or `None` for all of them (stack top marks the end)
        count: Option<u8>,
    },
    /// Mark R[reg] as a to-be-closed variable
    ToBeClosed {
        /// Register holding the resource
        reg: Register,
    },
    /// Close every to-be-closed variable at or above R[reg]
    Close {
        /// Lowest register closed
        reg: Register,
    },
}

impl Instruction {
    /// Registers this instruction reads or writes directly
    pub fn registers(&self) -> Vec<Register> {
        match *self {
            Instruction::LoadK { dst, .. }
            | Instruction::LoadSelf { dst }
            | Instruction::LoadClosure { dst, .. } => vec![dst],
            Instruction::LoadNil { dst, count } => {
                (0..count).map(|i| dst.saturating_add(i)).collect()
            }
            Instruction::Move { dst, src } => vec![dst, src],
            Instruction::Add { dst, lhs, rhs } | Instruction::Sub { dst, lhs, rhs } => {
                vec![dst, lhs, rhs]
            }
            Instruction::EqK { reg, .. }
            | Instruction::ToBeClosed { reg }
            | Instruction::Close { reg } => vec![reg],
            Instruction::Call { base, args, .. } | Instruction::TailCall { base, args } => {
                let mut regs = vec![base];
                if let Some(n) = args {
                    regs.extend((1..=n).map(|i| base.saturating_add(i)));
                }
                regs
            }
            Instruction::Return { base, count } => match count {
                Some(n) => (0..n).map(|i| base.saturating_add(i)).collect(),
                None => vec![base],
            },
            Instruction::VarArg { dst, count } => match count {
                Some(n) => (0..n).map(|i| dst.saturating_add(i)).collect(),
                None => vec![dst],
            },
            Instruction::Jump { .. } => Vec::new(),
        }
    }

    /// Whether control can continue with the next instruction
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instruction::Return { .. } | Instruction::TailCall { .. } | Instruction::Jump { .. }
        )
    }
}
