//! The pairing lifecycle with a remote peer.

use crate::{
    channel::{ChannelError, PeerChannel, PeerMetadata, SessionNotice},
    SessionId,
};
use ethers_core::types::Address;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, warn};
use walletcore_core::WalletConfig;

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The user declined the proposal.
    Rejected,
    /// The proposal expired before the user decided.
    ProposalTimeout,
    /// The relay transport dropped.
    Disconnected,
    /// The remote peer ended the session.
    PeerTerminated,
    /// The user logged out of the wallet.
    Logout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::Rejected => "rejected by user",
            CloseReason::ProposalTimeout => "proposal timed out",
            CloseReason::Disconnected => "transport disconnected",
            CloseReason::PeerTerminated => "terminated by peer",
            CloseReason::Logout => "user logged out",
        };
        f.write_str(reason)
    }
}

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Proposed by the peer, awaiting the user's decision.
    Proposed,
    /// Approved and live; signing requests are accepted.
    Settled,
    /// Ended. Terminal.
    Closed(CloseReason),
}

/// One pairing with a remote peer.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub peer: PeerMetadata,
    /// The chains the peer asked for, in CAIP-2 notation.
    pub chains: Vec<String>,
    /// The accounts the user exposed at approval. Empty until settled.
    pub accounts: Vec<Address>,
    pub state: SessionState,
    pub created_at: Instant,
}

/// Error thrown by [`SessionManager`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    /// The operation needs a session that is still awaiting approval.
    #[error("session {0} is not awaiting approval")]
    SessionNotProposed(SessionId),
    /// The peer asked for a chain this wallet is not configured for.
    #[error("unsupported chain {0}")]
    UnsupportedChain(String),
    /// The relay handshake did not complete within the init timeout.
    #[error("transport did not come up in time")]
    TransportTimeout,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Broadcast to in-process listeners on session lifecycle edges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Settled(SessionId),
    Closed { session: SessionId, reason: CloseReason },
}

#[derive(Debug)]
struct Inner {
    config: Arc<WalletConfig>,
    channel: Arc<dyn PeerChannel>,
    sessions: Mutex<HashMap<SessionId, Session>>,
    events: broadcast::Sender<SessionEvent>,
    next_id: AtomicU64,
}

/// Runs the pairing lifecycle: proposed, settled, closed.
///
/// Cheap to clone; all clones share the same session table. State
/// transitions are one-way (a closed session never reopens) and every
/// transition is both pushed to the peer over the channel and broadcast to
/// in-process subscribers such as the request pipeline.
#[derive(Clone, Debug)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(config: Arc<WalletConfig>, channel: Arc<dyn PeerChannel>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                config,
                channel,
                sessions: Mutex::new(HashMap::new()),
                events,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Brings up the relay transport, bounded by the configured init
    /// timeout.
    ///
    /// On timeout or transport failure every session still awaiting
    /// approval is closed as disconnected; nothing useful can happen to a
    /// proposal whose transport never came up.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let deadline = self.inner.config.session_init_timeout;
        let result = match tokio::time::timeout(deadline, self.inner.channel.connect()).await {
            Err(_) => Err(SessionError::TransportTimeout),
            Ok(Err(err)) => Err(SessionError::Channel(err)),
            Ok(Ok(())) => Ok(()),
        };
        if let Err(err) = &result {
            warn!(%err, "relay transport did not come up");
            self.close_all(CloseReason::Disconnected).await;
        } else {
            info!("relay transport connected");
        }
        result
    }

    /// Registers a session proposal from the peer and starts its approval
    /// timer. The session stays `Proposed` until the user decides or the
    /// timer fires.
    pub fn propose(&self, peer: PeerMetadata, chains: Vec<String>) -> SessionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Session {
            id,
            peer,
            chains,
            accounts: Vec::new(),
            state: SessionState::Proposed,
            created_at: Instant::now(),
        };
        info!(session = id, peer = %session.peer.name, chains = ?session.chains, "session proposed");
        self.inner.sessions.lock().unwrap().insert(id, session);

        let manager = self.clone();
        let timeout = self.inner.config.session_proposal_timeout;
        tokio::spawn(async move {
            manager.expire_proposal(id, timeout).await;
        });
        id
    }

    async fn expire_proposal(&self, id: SessionId, timeout: Duration) {
        tokio::time::sleep(timeout).await;
        let still_proposed = matches!(
            self.inner.sessions.lock().unwrap().get(&id).map(|s| s.state),
            Some(SessionState::Proposed)
        );
        if still_proposed {
            debug!(session = id, "proposal expired without a decision");
            self.close(id, CloseReason::ProposalTimeout).await;
        }
    }

    /// Approves a proposed session with the accounts the user exposes; it
    /// becomes settled and starts accepting signing requests.
    ///
    /// At least one of the peer's requested chains must be the wallet's
    /// configured chain; a mismatch leaves the session proposed so the user
    /// may still reject it explicitly.
    pub async fn approve(
        &self,
        id: SessionId,
        accounts: Vec<Address>,
    ) -> Result<(), SessionError> {
        {
            let mut sessions = self.inner.sessions.lock().unwrap();
            let session =
                sessions.get_mut(&id).ok_or(SessionError::UnknownSession(id))?;
            if session.state != SessionState::Proposed {
                return Err(SessionError::SessionNotProposed(id));
            }
            let wallet_chain = self.inner.config.caip2();
            if !session.chains.iter().any(|chain| *chain == wallet_chain) {
                return Err(SessionError::UnsupportedChain(session.chains.join(", ")));
            }
            session.accounts = accounts;
            session.state = SessionState::Settled;
        }
        info!(session = id, "session settled");
        let _ = self.inner.events.send(SessionEvent::Settled(id));
        self.inner.channel.notify(id, SessionNotice::Settled).await?;
        Ok(())
    }

    /// Rejects a proposed session. A no-op when the session is already
    /// closed.
    pub async fn reject(&self, id: SessionId) -> Result<(), SessionError> {
        match self.inner.sessions.lock().unwrap().get(&id).map(|s| s.state) {
            None => return Err(SessionError::UnknownSession(id)),
            Some(SessionState::Settled) => return Err(SessionError::SessionNotProposed(id)),
            Some(SessionState::Closed(_)) => return Ok(()),
            Some(SessionState::Proposed) => {}
        }
        self.close(id, CloseReason::Rejected).await;
        Ok(())
    }

    /// Closes a session for the given reason. Idempotent; closing an
    /// already-closed or unknown session is a no-op.
    pub async fn close(&self, id: SessionId, reason: CloseReason) {
        let should_notify = {
            let mut sessions = self.inner.sessions.lock().unwrap();
            match sessions.get_mut(&id) {
                Some(session) if !matches!(session.state, SessionState::Closed(_)) => {
                    session.state = SessionState::Closed(reason);
                    true
                }
                _ => false,
            }
        };
        if !should_notify {
            return;
        }
        info!(session = id, %reason, "session closed");
        let _ = self.inner.events.send(SessionEvent::Closed { session: id, reason });
        if let Err(err) = self.inner.channel.notify(id, SessionNotice::Closed { reason }).await {
            // the peer may be long gone; the local close still stands
            debug!(session = id, %err, "close notice not delivered");
        }
    }

    /// Closes every session that is not already closed, e.g. on logout.
    pub async fn close_all(&self, reason: CloseReason) {
        let open: Vec<SessionId> = {
            let sessions = self.inner.sessions.lock().unwrap();
            sessions
                .values()
                .filter(|s| !matches!(s.state, SessionState::Closed(_)))
                .map(|s| s.id)
                .collect()
        };
        for id in open {
            self.close(id, reason).await;
        }
    }

    /// A snapshot of the session, if known.
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.inner.sessions.lock().unwrap().get(&id).cloned()
    }

    /// Snapshots of all known sessions.
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.lock().unwrap().values().cloned().collect()
    }

    /// Whether the session is live and accepting requests.
    pub fn is_settled(&self, id: SessionId) -> bool {
        matches!(
            self.inner.sessions.lock().unwrap().get(&id).map(|s| s.state),
            Some(SessionState::Settled)
        )
    }

    /// Subscribes to lifecycle events for all sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}
