//! Error taxonomy for the bridge
//!
//! Two families: link errors (a stale or mismatched binding between the host
//! type database and the foreign assemblies, fatal) and per-call foreign
//! exceptions (recoverable, the host call site sees a default result).

use std::path::PathBuf;

/// Binding failure detected while linking host metadata against the foreign runtime
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("foreign type `{full_name}` not found in assembly `{assembly}`")]
    MissingType { assembly: String, full_name: String },

    #[error("foreign method `{signature}` not found in assembly `{assembly}`")]
    MissingMethod { assembly: String, signature: String },

    #[error("host class `{class}` has no ancestor with a foreign proxy binding")]
    NoProxyClass { class: String },

    #[error("foreign runtime failed to allocate an instance of `{full_name}`")]
    AllocationFailed { full_name: String },

    #[error("foreign parameter `{parameter}` of `{method}` has no native counterpart in `{function}`")]
    MissingParameter {
        function: String,
        method: String,
        parameter: String,
    },

    #[error("native parameter `{parameter}` of `{function}` is bound more than once")]
    DuplicateParameter { function: String, parameter: String },

    #[error("return value of `{method}` does not match the native return of `{function}`")]
    ReturnMismatch { function: String, method: String },

    #[error("foreign method `{method}` takes {expected} parameters but its descriptor declares {found}")]
    ArityMismatch {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("no marshaller for {kind} property `{property}`")]
    UnsupportedKind { property: String, kind: &'static str },

    #[error("malformed method key: {0}")]
    Signature(#[from] SignatureError),
}

/// Exception raised inside the foreign runtime, captured at the boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ForeignException {
    pub message: String,
    pub stack_trace: String,
}

impl ForeignException {
    pub fn new(message: impl Into<String>, stack_trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: stack_trace.into(),
        }
    }
}

/// Any failure surfaced by a bridge operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("foreign exception: {0}")]
    Foreign(#[from] ForeignException),
}

impl BridgeError {
    /// Link errors mean the bridge cannot make safe progress
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Link(_))
    }

    pub fn as_foreign(&self) -> Option<&ForeignException> {
        match self {
            Self::Foreign(exception) => Some(exception),
            Self::Link(_) => None,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Malformed `Namespace.Class:Method (params)` lookup key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("`{0}` has no `:` between class and method")]
    MissingClassSeparator(String),

    #[error("`{0}` has an empty class name")]
    EmptyClassName(String),

    #[error("`{0}` has an empty method name")]
    EmptyMethodName(String),

    #[error("`{0}` has an unterminated parameter list")]
    UnterminatedParameters(String),
}

/// Configuration loading failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
