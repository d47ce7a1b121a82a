pub mod chunk;
pub mod opcode;

pub use chunk::{
    FunctionInfo, Instruction, LazyScript, NamedFunction, ObjectInfo, Operand, PropInfo, Script,
    StateInfo, StringTable, VarInfo, VariableInfo,
};
pub use opcode::OpCode;
