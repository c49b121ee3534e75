// ABOUTME: Duplex, ordered control channel between the supervisor and one worker.
// ABOUTME: Background tasks frame control messages as JSON lines over any async byte stream.

use crate::error::{ChannelError, ProtocolError};
use crate::protocol::ControlMessage;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

/// Buffer size for in-process channel pairs.
const PAIR_BUFFER: usize = 64 * 1024;

/// One frame received from the peer.
#[derive(Debug)]
pub enum Inbound {
    Message(ControlMessage),
    Malformed(ProtocolError),
}

/// One end of a control channel. Messages are delivered in send order.
#[derive(Debug)]
pub struct Channel {
    outbound: mpsc::UnboundedSender<ControlMessage>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl Channel {
    /// Start the framing tasks over a reader/writer pair. Cancelling `close`
    /// shuts the write half, which the peer observes as end of stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, W>(reader: R, writer: W, close: CancellationToken) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(read_frames(reader, inbound_tx));
        tokio::spawn(write_frames(writer, outbound_rx, close));
        Self { outbound, inbound }
    }

    /// Two connected in-process endpoints.
    pub fn pair() -> (Self, Self) {
        let (left, right) = tokio::io::duplex(PAIR_BUFFER);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        (
            Self::spawn(left_read, left_write, CancellationToken::new()),
            Self::spawn(right_read, right_write, CancellationToken::new()),
        )
    }

    pub fn send(&self, message: ControlMessage) -> Result<(), ChannelError> {
        self.outbound
            .send(message)
            .map_err(|_| ChannelError::Closed)
    }

    /// Next queued frame without waiting. `Ok(None)` means nothing is queued yet.
    pub fn try_recv(&mut self) -> Result<Option<Inbound>, ChannelError> {
        match self.inbound.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    /// Wait for the next frame. `None` once the peer has closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }
}

async fn read_frames<R>(reader: R, inbound: mpsc::UnboundedSender<Inbound>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let frame = match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match ControlMessage::decode(&line) {
                Ok(message) => Inbound::Message(message),
                Err(e) => Inbound::Malformed(e),
            },
            Ok(None) => break,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                Inbound::Malformed(ProtocolError::Unreadable(e.to_string()))
            }
            Err(e) => {
                tracing::debug!(error = %e, "Control channel read failed");
                break;
            }
        };
        if inbound.send(frame).is_err() {
            break;
        }
    }
}

async fn write_frames<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<ControlMessage>,
    close: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let message = tokio::select! {
            _ = close.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let mut line = match message.encode() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, kind = %message.kind, "Dropping unencodable control message");
                continue;
            }
        };
        line.push('\n');

        if let Err(e) = write_line(&mut writer, &line).await {
            tracing::debug!(error = %e, "Control channel write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Kind;
    use std::time::Duration;

    async fn next_message(channel: &mut Channel) -> ControlMessage {
        match channel.recv().await {
            Some(Inbound::Message(message)) => message,
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (left, mut right) = Channel::pair();
        for i in 0..5 {
            left.send(ControlMessage::new("a", format!("c{i}"), Kind::Log, format!("line {i}")))
                .unwrap();
        }
        for i in 0..5 {
            let message = next_message(&mut right).await;
            assert_eq!(message.correlation_id, format!("c{i}"));
            assert_eq!(message.payload, format!("line {i}"));
        }
    }

    #[tokio::test]
    async fn test_pair_is_duplex() {
        let (mut left, mut right) = Channel::pair();
        left.send(ControlMessage::new("a", "1", Kind::List, "")).unwrap();
        let request = next_message(&mut right).await;
        right.send(request.reply("manager", "{}")).unwrap();
        let reply = next_message(&mut left).await;
        assert_eq!(reply.kind, Kind::Ok);
        assert_eq!(reply.correlation_id, "1");
    }

    #[tokio::test]
    async fn test_try_recv_empty_then_message() {
        let (left, mut right) = Channel::pair();
        assert!(matches!(right.try_recv(), Ok(None)));

        left.send(ControlMessage::new("a", "1", Kind::Running, "a")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            right.try_recv(),
            Ok(Some(Inbound::Message(ref m))) if m.kind == Kind::Running
        ));
    }

    #[tokio::test]
    async fn test_malformed_lines_are_reported_not_fatal() {
        let (raw, remote) = tokio::io::duplex(1024);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let mut channel = Channel::spawn(remote_read, remote_write, CancellationToken::new());

        let (_, mut raw_write) = tokio::io::split(raw);
        raw_write.write_all(b"garbage\n\n").await.unwrap();
        let good = ControlMessage::new("a", "1", Kind::Stop, "a").encode().unwrap();
        raw_write
            .write_all(format!("{good}\n").as_bytes())
            .await
            .unwrap();

        assert!(matches!(channel.recv().await, Some(Inbound::Malformed(_))));
        assert!(matches!(
            channel.recv().await,
            Some(Inbound::Message(ref m)) if m.kind == Kind::Stop
        ));
    }

    #[tokio::test]
    async fn test_close_token_ends_peer_stream() {
        let (left, right) = tokio::io::duplex(1024);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        let close = CancellationToken::new();
        let _closing = Channel::spawn(left_read, left_write, close.clone());
        let mut peer = Channel::spawn(right_read, right_write, CancellationToken::new());

        close.cancel();
        assert!(peer.recv().await.is_none());
        assert_eq!(peer.try_recv().unwrap_err(), ChannelError::Closed);
    }

    #[tokio::test]
    async fn test_dropping_endpoint_closes_peer() {
        let (left, mut right) = Channel::pair();
        drop(left);
        assert!(right.recv().await.is_none());
    }
}
