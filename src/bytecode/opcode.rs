// Papyrus Bytecode Instructions

use serde::{Deserialize, Serialize};

/// Bytecode operation codes, numbered as in compiled scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    Nop, // Do nothing

    // Arithmetic operations
    IAdd, // dest = a + b (int)
    FAdd, // dest = a + b (float)
    ISub, // dest = a - b (int)
    FSub, // dest = a - b (float)
    IMul, // dest = a * b (int)
    FMul, // dest = a * b (float)
    IDiv, // dest = a / b (int)
    FDiv, // dest = a / b (float)
    IMod, // dest = a % b

    // Logical operations
    Not,  // dest = !a
    INeg, // dest = -a (int)
    FNeg, // dest = -a (float)

    // Assignment
    Assign, // dest = a
    Cast,   // dest = a as typeof(dest)

    // Comparison operations
    CmpEq, // dest = a == b
    CmpLt, // dest = a < b
    CmpLe, // dest = a <= b
    CmpGt, // dest = a > b
    CmpGe, // dest = a >= b

    // Control flow
    Jmp,  // Relative jump
    Jmpt, // Relative jump if cond is true
    Jmpf, // Relative jump if cond is false

    // Calls
    CallMethod, // name, object, result, argc, args...
    CallParent, // name, result, argc, args...
    CallStatic, // class, name, result, argc, args...
    Return,     // Return value

    // Strings
    StrCat, // dest = a .. b

    // Properties
    PropGet, // name, object, result
    PropSet, // name, object, value

    // Arrays
    ArrayCreate,       // array, size
    ArrayLength,       // dest, array
    ArrayGetElement,   // dest, array, index
    ArraySetElement,   // array, index, value
    ArrayFindElement,  // array, dest, value, start
    ArrayRFindElement, // array, dest, value, start
}

impl OpCode {
    const ALL: [OpCode; 36] = [
        OpCode::Nop,
        OpCode::IAdd,
        OpCode::FAdd,
        OpCode::ISub,
        OpCode::FSub,
        OpCode::IMul,
        OpCode::FMul,
        OpCode::IDiv,
        OpCode::FDiv,
        OpCode::IMod,
        OpCode::Not,
        OpCode::INeg,
        OpCode::FNeg,
        OpCode::Assign,
        OpCode::Cast,
        OpCode::CmpEq,
        OpCode::CmpLt,
        OpCode::CmpLe,
        OpCode::CmpGt,
        OpCode::CmpGe,
        OpCode::Jmp,
        OpCode::Jmpt,
        OpCode::Jmpf,
        OpCode::CallMethod,
        OpCode::CallParent,
        OpCode::CallStatic,
        OpCode::Return,
        OpCode::StrCat,
        OpCode::PropGet,
        OpCode::PropSet,
        OpCode::ArrayCreate,
        OpCode::ArrayLength,
        OpCode::ArrayGetElement,
        OpCode::ArraySetElement,
        OpCode::ArrayFindElement,
        OpCode::ArrayRFindElement,
    ];

    /// Number of fixed operands the opcode reads
    pub fn operand_count(&self) -> usize {
        match self {
            OpCode::Nop => 0,

            OpCode::Jmp | OpCode::Return => 1,

            OpCode::Not
            | OpCode::INeg
            | OpCode::FNeg
            | OpCode::Assign
            | OpCode::Cast
            | OpCode::Jmpt
            | OpCode::Jmpf
            | OpCode::ArrayCreate
            | OpCode::ArrayLength => 2,

            OpCode::IAdd
            | OpCode::FAdd
            | OpCode::ISub
            | OpCode::FSub
            | OpCode::IMul
            | OpCode::FMul
            | OpCode::IDiv
            | OpCode::FDiv
            | OpCode::IMod
            | OpCode::CmpEq
            | OpCode::CmpLt
            | OpCode::CmpLe
            | OpCode::CmpGt
            | OpCode::CmpGe
            | OpCode::StrCat
            | OpCode::PropGet
            | OpCode::PropSet
            | OpCode::ArrayGetElement
            | OpCode::ArraySetElement
            | OpCode::CallParent => 3,

            OpCode::CallMethod
            | OpCode::CallStatic
            | OpCode::ArrayFindElement
            | OpCode::ArrayRFindElement => 4,
        }
    }

    /// Leading operands that are names and must never be resolved
    pub fn dereference_start(&self) -> usize {
        match self {
            // functionName
            OpCode::CallMethod | OpCode::CallParent => 1,
            // className and functionName
            OpCode::CallStatic => 2,
            // property name
            OpCode::PropGet | OpCode::PropSet => 1,
            _ => 0,
        }
    }

    /// Operand that receives a call result, sync or resumed
    pub fn call_result_index(&self) -> Option<usize> {
        match self {
            OpCode::CallParent => Some(1),
            OpCode::CallMethod | OpCode::CallStatic => Some(2),
            _ => None,
        }
    }

    /// First operand forwarded to the callee as an argument
    pub fn call_args_offset(&self) -> usize {
        match self {
            OpCode::CallParent => 3,
            _ => 4,
        }
    }

    pub fn is_call(&self) -> bool {
        self.call_result_index().is_some()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        OpCode::ALL.get(byte as usize).copied().ok_or(byte)
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}
