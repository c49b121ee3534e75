// ABOUTME: Deployment-side facade over the control channel, given to the running workload.
// ABOUTME: Issues correlated requests to the supervisor and resolves their replies.

use crate::workloads::Workload;
use coven_deploy_core::{
    Channel, ChannelError, ControlMessage, HandleError, Inbound, Kind, PendingRequests, Reply,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Whether the control channel can still deliver replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Open,
    Closed,
}

struct HandleState {
    channel: Channel,
    pending: PendingRequests,
    stopped: bool,
}

impl HandleState {
    fn send(&mut self, id: &str, kind: Kind, payload: &str) -> Result<Reply, HandleError> {
        let (correlation_id, reply) = self.pending.issue()?;
        let message = ControlMessage::new(id, correlation_id.as_str(), kind, payload);
        if let Err(e) = self.channel.send(message) {
            self.pending.forget(&correlation_id);
            return Err(e.into());
        }
        Ok(reply)
    }
}

/// Cheap to clone; every clone talks over the same channel and pending table.
#[derive(Clone)]
pub struct DeploymentHandle {
    id: Arc<str>,
    inner: Arc<Mutex<HandleState>>,
}

impl DeploymentHandle {
    pub fn new(id: impl Into<String>, channel: Channel) -> Self {
        Self {
            id: Arc::from(id.into()),
            inner: Arc::new(Mutex::new(HandleState {
                channel,
                pending: PendingRequests::new(),
                stopped: false,
            })),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> MutexGuard<'_, HandleState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a request and get a handle to its eventual "ok" reply.
    pub fn send_command(&self, kind: Kind, payload: &str) -> Result<Reply, HandleError> {
        let mut state = self.state();
        if state.stopped {
            return Err(HandleError::Stopped {
                id: self.id.to_string(),
            });
        }
        state.send(&self.id, kind, payload)
    }

    pub fn signal_running(&self) -> Result<Reply, HandleError> {
        self.send_command(Kind::Running, &self.id)
    }

    pub fn queue_full_update(&self) -> Result<Reply, HandleError> {
        self.send_command(Kind::Update, "")
    }

    pub fn queue_restart(&self) -> Result<Reply, HandleError> {
        self.send_command(Kind::Restart, "")
    }

    pub fn log(&self, message: &str) -> Result<Reply, HandleError> {
        self.send_command(Kind::Log, message)
    }

    /// Ask for the supervisor's listing; the reply payload is a JSON `{id: module}` object.
    pub fn list(&self) -> Result<Reply, HandleError> {
        self.send_command(Kind::List, "")
    }

    /// Tell the supervisor this deployment is done. Only the first call sends
    /// anything; later calls return `Ok(None)`.
    pub fn stop(&self) -> Result<Option<Reply>, HandleError> {
        let mut state = self.state();
        if state.stopped {
            return Ok(None);
        }
        let reply = state.send(&self.id, Kind::Stop, &self.id)?;
        state.stopped = true;
        Ok(Some(reply))
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    /// Pass a reload request through to the workload.
    pub fn reload<W: Workload + ?Sized>(
        &self,
        workload: &mut W,
        target: &str,
    ) -> Result<bool, HandleError> {
        if self.is_stopped() {
            return Err(HandleError::Stopped {
                id: self.id.to_string(),
            });
        }
        let reloaded = workload.reload(target);
        tracing::debug!(target_name = %target, reloaded, "Reload requested");
        Ok(reloaded)
    }

    /// Drain every queued frame, resolving replies in the pending table.
    pub fn check_for_responses(&self) -> ChannelStatus {
        let mut state = self.state();
        loop {
            match state.channel.try_recv() {
                Ok(Some(Inbound::Message(message))) if message.kind == Kind::Ok => {
                    if !state.pending.resolve(message) {
                        tracing::debug!("Reply for an unknown request");
                    }
                }
                Ok(Some(Inbound::Message(message))) => {
                    tracing::debug!(kind = %message.kind, "Ignoring unsolicited message");
                }
                Ok(Some(Inbound::Malformed(e))) => {
                    tracing::debug!(error = %e, "Dropping malformed frame");
                }
                Ok(None) => return ChannelStatus::Open,
                Err(ChannelError::Closed) => return ChannelStatus::Closed,
            }
        }
    }
}
