// Papyrus Active Instance
// One loaded script bound to one owning object, with its parent class chain

use crate::bytecode::{FunctionInfo, LazyScript, PropInfo, Script};
use crate::config::VmConfig;
use crate::error::StorageError;
use crate::vm::caller::ScriptHost;
use crate::vm::interner::IdentifierCache;
use crate::vm::router::{CallSiteKey, CallTarget};
use crate::vm::value::{slot, Slot, Value};
use crate::vm::variables::{VariablesHolder, STATE_VARIABLE};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropAccess {
    Read,
    Write,
}

pub struct ActiveInstance {
    pub(crate) host: Rc<dyn ScriptHost>,
    script: LazyScript,
    /// Owning object, or a string sentinel standing for the call receiver
    pub(crate) owner: Slot,
    parent: Option<Rc<ActiveInstance>>,
    children_name: String,
    pub(crate) variables: Rc<dyn VariablesHolder>,
    pub(crate) identifiers: IdentifierCache,
    pub(crate) call_targets: RefCell<FxHashMap<CallSiteKey, CallTarget>>,
    pub(crate) config: Rc<VmConfig>,
}

impl ActiveInstance {
    /// Load `script` for `owner`, creating the whole parent chain eagerly
    pub fn new(
        host: Rc<dyn ScriptHost>,
        script: LazyScript,
        variables: Rc<dyn VariablesHolder>,
        owner: Value,
        children_name: impl Into<String>,
        config: Rc<VmConfig>,
    ) -> Rc<Self> {
        let mut lineage = Vec::new();
        Self::build(
            host,
            script,
            variables,
            owner,
            children_name.into(),
            config,
            &mut lineage,
        )
    }

    fn build(
        host: Rc<dyn ScriptHost>,
        script: LazyScript,
        variables: Rc<dyn VariablesHolder>,
        owner: Value,
        children_name: String,
        config: Rc<VmConfig>,
        lineage: &mut Vec<String>,
    ) -> Rc<Self> {
        lineage.push(script.source().to_string());

        let parent_name = script.get().parent_class_name().to_string();
        let parent = if parent_name.is_empty() {
            None
        } else if lineage.iter().any(|n| n.eq_ignore_ascii_case(&parent_name)) {
            error!(
                "ActiveInstance::new - inheritance cycle {} -> {}, parent chain cut",
                lineage.join(" -> "),
                parent_name
            );
            None
        } else {
            match host.script_by_name(&parent_name) {
                Some(parent_script) => {
                    // Parents remember the most derived class of the chain
                    let most_derived = if children_name.is_empty() {
                        script.source().to_string()
                    } else {
                        children_name.clone()
                    };
                    Some(Self::build(
                        Rc::clone(&host),
                        parent_script,
                        Rc::clone(&variables),
                        owner.clone(),
                        most_derived,
                        Rc::clone(&config),
                        lineage,
                    ))
                }
                None => {
                    warn!(
                        "ActiveInstance::new - parent script {} of {} not found",
                        parent_name,
                        script.source()
                    );
                    None
                }
            }
        };

        Rc::new(Self {
            host,
            script,
            owner: slot(owner),
            parent,
            children_name,
            variables,
            identifiers: IdentifierCache::new(),
            call_targets: RefCell::new(FxHashMap::default()),
            config,
        })
    }

    pub fn source_name(&self) -> &str {
        self.script.source()
    }

    pub fn script(&self) -> &Rc<Script> {
        self.script.get()
    }

    pub fn lazy_script(&self) -> &LazyScript {
        &self.script
    }

    pub fn owner(&self) -> Value {
        self.owner.borrow().clone()
    }

    pub fn parent(&self) -> Option<&Rc<ActiveInstance>> {
        self.parent.as_ref()
    }

    pub fn children_name(&self) -> &str {
        &self.children_name
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn variables(&self) -> &Rc<dyn VariablesHolder> {
        &self.variables
    }

    pub fn is_valid(&self) -> bool {
        self.script().main_object().is_some()
    }

    /// Function `name` declared in `state_name`, searched case-insensitively
    pub fn function_by_name(&self, name: &str, state_name: &str) -> Option<&FunctionInfo> {
        self.script()
            .objects
            .iter()
            .flat_map(|object| object.states.iter())
            .filter(|state| state.name == state_name)
            .flat_map(|state| state.functions.iter())
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| &f.function)
    }

    /// Current state as stored in the `::State` variable, empty on failure
    pub fn active_state_name(&self) -> String {
        let state = match self.checked_variable(STATE_VARIABLE, "ActiveInstance::active_state_name")
        {
            Ok(Some(state)) => state,
            Ok(None) => {
                error!(
                    "ActiveInstance::active_state_name - {} variable doesn't exist in {}",
                    STATE_VARIABLE,
                    self.source_name()
                );
                return String::new();
            }
            Err(_) => return String::new(),
        };
        let value = state.borrow();
        value.to_script_string()
    }

    /// Property with a handler function for the requested access
    pub fn property(&self, name: &str, access: PropAccess) -> Option<&PropInfo> {
        if !self.is_valid() {
            return None;
        }
        self.script()
            .objects
            .iter()
            .flat_map(|object| object.properties.iter())
            .filter(|prop| prop.name.eq_ignore_ascii_case(name))
            .find(|prop| match access {
                PropAccess::Read => prop.read_handler().is_some(),
                PropAccess::Write => prop.write_handler().is_some(),
            })
    }

    /// Auto-generated backing variable of a property declared by this class
    pub fn backing_variable(&self, property_name: &str) -> Option<Slot> {
        let prop = self.script().main_object().and_then(|object| {
            object
                .properties
                .iter()
                .find(|prop| prop.name.eq_ignore_ascii_case(property_name))
        });
        let Some(prop) = prop else {
            trace!("property {} not found in {}", property_name, self.source_name());
            return None;
        };

        match self.checked_variable(&prop.auto_var_name, "ActiveInstance::backing_variable") {
            Ok(Some(var)) => Some(var),
            _ => {
                trace!("backing variable {} not found", prop.auto_var_name);
                None
            }
        }
    }

    /// Is `name` this class or one of its ancestors
    pub fn has_parent(&self, name: &str) -> bool {
        if self.source_name().eq_ignore_ascii_case(name) {
            return true;
        }
        match &self.parent {
            Some(parent) if !parent.source_name().is_empty() => parent.has_parent(name),
            _ => false,
        }
    }

    /// Is `name` this class or the most derived class of its chain
    pub fn has_child(&self, name: &str) -> bool {
        self.source_name().eq_ignore_ascii_case(name)
            || (!self.children_name.is_empty() && self.children_name.eq_ignore_ascii_case(name))
    }

    /// Variable lookup with the storage fault policy applied.
    ///
    /// A recoverable fault is logged and returned as `Err`; a corrupted
    /// storage cannot be recovered from and brings the process down.
    pub(crate) fn checked_variable(
        &self,
        name: &str,
        context: &str,
    ) -> Result<Option<Slot>, StorageError> {
        match self.variables.variable(name, self.script()) {
            Ok(var) => Ok(var),
            Err(StorageError::Lookup(reason)) => {
                error!(
                    "{} - variable({}) errored with '{}'",
                    context, name, reason
                );
                Err(StorageError::Lookup(reason))
            }
            Err(StorageError::Internal(reason)) => {
                error!(
                    critical = true,
                    "{} - variable({}) errored with unrecoverable error '{}'",
                    context,
                    name,
                    reason
                );
                panic!("{}: variable storage is corrupted: {}", context, reason);
            }
        }
    }
}

impl fmt::Debug for ActiveInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveInstance")
            .field("source", &self.source_name())
            .field("owner", &self.owner.borrow())
            .field("parent", &self.parent.as_ref().map(|p| p.source_name().to_string()))
            .field("children_name", &self.children_name)
            .finish()
    }
}
