// Papyrus VM Configuration
// Execution limits shared by an instance and its whole parent chain

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_STACK_DEPTH: usize = 128;
pub const DEFAULT_OPCODE_QUOTA: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Nested `start_function` calls allowed on one logical call chain
    pub max_stack_depth: usize,

    /// Opcode dispatches allowed per `execute_all` run
    pub opcode_quota: usize,
}

impl VmConfig {
    /// Parse a JSON document, missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            opcode_quota: DEFAULT_OPCODE_QUOTA,
        }
    }
}
