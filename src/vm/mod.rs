pub mod caller;
pub mod cast;
pub mod executor;
pub mod guard;
pub mod instance;
pub mod interner;
pub mod promise;
pub mod resolver;
pub mod router;
pub mod value;
pub mod variables;

#[cfg(test)]
pub(crate) mod testing;

pub use caller::{GameObject, ScriptHost};
pub use cast::CastKind;
pub use executor::ExecutionContext;
pub use guard::{DepthGuard, StackData};
pub use instance::{ActiveInstance, PropAccess};
pub use promise::Promise;
pub use resolver::{Local, Locals};
pub use router::{CallSiteKey, CallTarget};
pub use value::{slot, ArrayRef, ObjectHandle, Slot, Value, ValueType};
pub use variables::{PropertyStorage, VariablesHolder, STATE_VARIABLE};
