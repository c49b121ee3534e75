// ABOUTME: Pending-request table pairing outgoing commands with their replies.
// ABOUTME: Each entry is a oneshot slot resolved at most once by a matching correlation id.

use crate::error::{ReplyError, TokenError};
use crate::protocol::ControlMessage;
use crate::token::TokenGenerator;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Outstanding requests issued by one side of a channel.
#[derive(Debug)]
pub struct PendingRequests {
    entries: HashMap<String, oneshot::Sender<ControlMessage>>,
    tokens: TokenGenerator,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::with_tokens(TokenGenerator::correlation_ids())
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenGenerator) -> Self {
        Self {
            entries: HashMap::new(),
            tokens,
        }
    }

    /// Register a new request under a correlation id unique in this table.
    pub fn issue(&mut self) -> Result<(String, Reply), TokenError> {
        // Entries whose reply handle was dropped can never be observed.
        self.entries.retain(|_, slot| !slot.is_closed());

        let correlation_id = self
            .tokens
            .generate_unique(|candidate| self.entries.contains_key(candidate))?;
        let (tx, rx) = oneshot::channel();
        self.entries.insert(correlation_id.clone(), tx);
        Ok((correlation_id.clone(), Reply::new(correlation_id, rx)))
    }

    /// Drop an entry whose request never made it onto the wire.
    pub fn forget(&mut self, correlation_id: &str) {
        self.entries.remove(correlation_id);
    }

    /// Complete the entry matching the reply's correlation id. Returns false
    /// if no such entry is outstanding.
    pub fn resolve(&mut self, reply: ControlMessage) -> bool {
        match self.entries.remove(&reply.correlation_id) {
            Some(slot) => {
                let _ = slot.send(reply);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.entries.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Caller's view of one outstanding request.
#[derive(Debug)]
pub struct Reply {
    correlation_id: String,
    state: ReplyState,
}

#[derive(Debug)]
enum ReplyState {
    Waiting(oneshot::Receiver<ControlMessage>),
    Resolved(ControlMessage),
    Abandoned,
}

impl Reply {
    fn new(correlation_id: String, rx: oneshot::Receiver<ControlMessage>) -> Self {
        Self {
            correlation_id,
            state: ReplyState::Waiting(rx),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// The reply, if it has arrived. Does not wait.
    pub fn try_get(&mut self) -> Option<&ControlMessage> {
        let polled = match &mut self.state {
            ReplyState::Waiting(rx) => Some(rx.try_recv()),
            _ => None,
        };
        match polled {
            Some(Ok(message)) => self.state = ReplyState::Resolved(message),
            Some(Err(TryRecvError::Closed)) => self.state = ReplyState::Abandoned,
            Some(Err(TryRecvError::Empty)) | None => {}
        }

        match &self.state {
            ReplyState::Resolved(message) => Some(message),
            _ => None,
        }
    }

    /// Suspend until the reply arrives.
    pub async fn wait(self) -> Result<ControlMessage, ReplyError> {
        let abandoned = ReplyError::Abandoned {
            correlation_id: self.correlation_id,
        };
        match self.state {
            ReplyState::Waiting(rx) => rx.await.map_err(|_| abandoned),
            ReplyState::Resolved(message) => Ok(message),
            ReplyState::Abandoned => Err(abandoned),
        }
    }
}
