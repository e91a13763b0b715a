use serde::{Deserialize, Serialize};

/// Options for a single instrumentation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentOptions {
    /// Source identifier recorded in every position record.
    pub url: String,
    /// Rewrite each function to a single exit point before instrumenting.
    #[serde(default = "default_unify_returns")]
    pub unify_returns: bool,
}

fn default_unify_returns() -> bool {
    true
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        InstrumentOptions {
            url: "<anonymous>".to_string(),
            unify_returns: default_unify_returns(),
        }
    }
}

impl InstrumentOptions {
    pub fn with_url(url: impl Into<String>) -> Self {
        InstrumentOptions {
            url: url.into(),
            ..InstrumentOptions::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Nesting depth of function activations before a `RangeError` is thrown.
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { max_call_depth: 256 }
    }
}
