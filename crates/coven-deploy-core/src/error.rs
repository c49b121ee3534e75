// ABOUTME: Error types for the coven-deploy control plane.
// ABOUTME: Covers protocol decoding, channels, tokens, handles, launches, and module definitions.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while encoding or decoding control messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A line could not be parsed as a control message.
    #[error("malformed control message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// A control message could not be serialized.
    #[error("failed to encode control message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The channel delivered bytes that are not a readable line.
    #[error("unreadable control frame: {0}")]
    Unreadable(String),
}

/// Errors on a control channel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("control channel closed")]
    Closed,
}

/// Errors while generating unique tokens.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("no free token after {attempts} attempts")]
    Exhausted { attempts: usize },
}

/// Errors waiting on a reply handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// The pending entry was dropped before a reply arrived.
    #[error("request {correlation_id} was abandoned before a reply arrived")]
    Abandoned { correlation_id: String },
}

/// Errors raised by the deployment-side handle inside a worker process.
#[derive(Error, Debug)]
pub enum HandleError {
    /// A control call was issued after `stop()` completed.
    #[error("deployment '{id}' has stopped; further commands are not accepted")]
    Stopped { id: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Errors loading a module definition from disk.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("failed to read module definition {}: {}", path.display(), source)]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse module definition {}: {}", path.display(), source)]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid module definition: {0}")]
    Definition(#[from] serde_json::Error),
}

/// Errors while launching a deployment.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// No workload with this name exists.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker {0} was not piped")]
    Stdio(&'static str),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Token(#[from] TokenError),

    /// The worker never signalled readiness.
    #[error("timed out after {timeout_units} time units")]
    Timeout { timeout_units: u32 },
}
