// Papyrus VM
// Bytecode interpreter for compiled, class-based game scripts

pub mod bytecode;
pub mod config;
pub mod error;
pub mod vm;

pub use bytecode::{FunctionInfo, Instruction, LazyScript, OpCode, Operand, Script};
pub use config::VmConfig;
pub use error::{StorageError, VmError, VmResult};
pub use vm::{
    ActiveInstance, GameObject, Promise, PropertyStorage, ScriptHost, StackData, Value, ValueType,
    VariablesHolder,
};
