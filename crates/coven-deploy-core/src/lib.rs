// ABOUTME: Shared types for the coven-deploy supervisor and worker processes.
// ABOUTME: Re-exports config, protocol, channel, pending-request, token, and module types.

pub mod channel;
pub mod config;
pub mod error;
pub mod module;
pub mod pending;
pub mod protocol;
pub mod token;

pub use channel::{Channel, Inbound};
pub use config::{
    BootstrapConfig, Config, Timing, KILL_GRACE_UNITS, TERMINATE_GRACE_UNITS, TICK_UNITS,
};
pub use error::{
    ChannelError, HandleError, LaunchError, ModuleError, ProtocolError, ReplyError, TokenError,
};
pub use module::{ModuleCache, ModuleDefinition};
pub use pending::{PendingRequests, Reply};
pub use protocol::{ControlMessage, Kind, MANAGER_AUTHORITY};
pub use token::TokenGenerator;

/// Identifier of one deployment, unique among all starting and active deployments.
pub type DeploymentId = String;
