use thiserror::Error;

use crate::descriptor::BackendKind;

pub type Result<T> = std::result::Result<T, EthernetError>;

/// Errors surfaced by [`crate::EthernetMux`] to the guest device attach logic.
///
/// None of these are retried by the multiplexer; the caller owns recovery (falling back to another
/// backend, or not attaching a network device at all).
#[derive(Debug, Error)]
pub enum EthernetError {
    /// The descriptor's backend family has no engine in this build/process.
    #[error("backend `{name}` ({kind:?}) is not available")]
    Unsupported { name: String, kind: BackendKind },

    #[error("no network backend named `{0}`")]
    NotFound(String),

    /// Only one NAT-family session may be live at a time.
    #[error("a NAT session is already active")]
    NatSessionActive,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Failure reported by an opaque backend engine (NAT or raw capture).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine initialisation failed: {0}")]
    Init(String),

    #[error("redirect rejected: {0}")]
    Redirect(String),

    #[error("engine failed to start: {0}")]
    Start(String),

    #[error("device `{0}` does not support promiscuous mode")]
    PromiscuousUnsupported(String),

    #[error("device `{0}` is unavailable")]
    DeviceUnavailable(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("too many redirect rules: {got} (max {max})")]
    TooManyRedirects { got: usize, max: usize },

    #[error("invalid redirect `{rule}`: {reason}")]
    InvalidRedirect { rule: String, reason: &'static str },

    #[error("invalid network config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("environment variable {var} is not valid unicode")]
    Env { var: &'static str },
}
