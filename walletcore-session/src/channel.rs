//! The relay-transport seam.
//!
//! The wallet core never speaks the relay protocol itself; the embedding
//! application hands it something implementing [`PeerChannel`]. The session
//! manager and request pipeline only rely on this capability surface.

use crate::{manager::CloseReason, RequestId, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};
use thiserror::Error;

/// Error returned by a [`PeerChannel`] implementation.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The relay transport failed.
    #[error("channel transport error: {0}")]
    Transport(String),
}

/// What the remote peer told us about itself when proposing a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// A JSON-RPC style error relayed back to the peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerError {
    pub code: i64,
    pub message: String,
}

impl PeerError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Lifecycle notification pushed to the remote peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionNotice {
    /// The user approved the proposal; the session is live.
    Settled,
    /// The session ended and will accept no further requests.
    Closed { reason: CloseReason },
}

/// Capability surface of the relay-transport collaborator.
#[async_trait]
pub trait PeerChannel: Debug + Send + Sync {
    /// Establishes the relay connection. Callers bound this with the
    /// configured init timeout.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Relays the outcome of a signing request back to the peer.
    async fn respond(
        &self,
        request: RequestId,
        result: Result<Value, PeerError>,
    ) -> Result<(), ChannelError>;

    /// Pushes a session lifecycle notification to the peer.
    async fn notify(&self, session: SessionId, notice: SessionNotice)
        -> Result<(), ChannelError>;
}

#[derive(Debug, Default)]
struct MockChannelState {
    connect_failure: Option<String>,
    hang_connect: bool,
    responses: Vec<(RequestId, Result<Value, PeerError>)>,
    notices: Vec<(SessionId, SessionNotice)>,
}

/// Scripted relay channel used in test environments.
///
/// Everything relayed through the [`PeerChannel`] trait is recorded and can
/// be inspected afterwards, mirroring the scripted provider in
/// `walletcore-core`.
#[derive(Clone, Debug, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockChannelState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `connect` fail with the given transport error.
    pub fn fail_connect(&self, message: impl Into<String>) {
        self.state.lock().unwrap().connect_failure = Some(message.into());
    }

    /// Makes `connect` suspend forever, simulating a relay that never
    /// answers the handshake.
    pub fn hang_connect(&self) {
        self.state.lock().unwrap().hang_connect = true;
    }

    /// The request outcomes relayed so far, in order.
    pub fn responses(&self) -> Vec<(RequestId, Result<Value, PeerError>)> {
        self.state.lock().unwrap().responses.clone()
    }

    /// The lifecycle notices pushed so far, in order.
    pub fn notices(&self) -> Vec<(SessionId, SessionNotice)> {
        self.state.lock().unwrap().notices.clone()
    }
}

#[async_trait]
impl PeerChannel for MockChannel {
    async fn connect(&self) -> Result<(), ChannelError> {
        let (hang, failure) = {
            let state = self.state.lock().unwrap();
            (state.hang_connect, state.connect_failure.clone())
        };
        if hang {
            // the scripted relay never completes the handshake
            std::future::pending::<()>().await;
        }
        match failure {
            Some(message) => Err(ChannelError::Transport(message)),
            None => Ok(()),
        }
    }

    async fn respond(
        &self,
        request: RequestId,
        result: Result<Value, PeerError>,
    ) -> Result<(), ChannelError> {
        self.state.lock().unwrap().responses.push((request, result));
        Ok(())
    }

    async fn notify(
        &self,
        session: SessionId,
        notice: SessionNotice,
    ) -> Result<(), ChannelError> {
        self.state.lock().unwrap().notices.push((session, notice));
        Ok(())
    }
}
