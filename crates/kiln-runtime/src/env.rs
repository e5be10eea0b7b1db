use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Environment variables injected into the sandbox by invocation requests.
///
/// Variables persist for the life of the sandbox process until a later
/// request overwrites them. Agents read a snapshot taken when their
/// invocation started.
#[derive(Clone, Default)]
pub struct SandboxEnv {
    vars: Arc<RwLock<HashMap<String, String>>>,
}

impl SandboxEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `vars` into the environment, overwriting existing keys.
    pub fn apply(&self, vars: &HashMap<String, String>) {
        if vars.is_empty() {
            return;
        }
        let mut guard = self.vars.write();
        for (key, value) in vars {
            guard.insert(key.clone(), value.clone());
        }
        debug!(count = vars.len(), "sandbox environment updated");
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars.read().get(key).cloned()
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, String>> {
        Arc::new(self.vars.read().clone())
    }
}
