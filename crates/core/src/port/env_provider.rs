// Environment Provider Port (for deterministic testing)

/// Environment lookup interface (allows injecting values in tests)
pub trait EnvProvider: Send + Sync {
    /// Value of `key`, `None` if unset or not valid unicode
    fn var(&self, key: &str) -> Option<String>;

    /// Value of `key` if set and not blank
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key).filter(|v| !v.trim().is_empty())
    }
}

/// Process environment (production)
pub struct ProcessEnvProvider;

impl EnvProvider for ProcessEnvProvider {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;

    /// Fixed set of environment values
    #[derive(Debug, Clone, Default)]
    pub struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.vars.insert(key.into(), value.into());
            self
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn var(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }
}
