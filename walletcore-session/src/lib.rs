//! Remote sessions and the signing-request pipeline.
//!
//! A remote dapp reaches the wallet over a relay; the transport itself is a
//! collaborator behind the [`PeerChannel`] trait. [`SessionManager`] runs
//! the pairing lifecycle (proposed, settled, closed) and
//! [`RequestPipeline`] runs the per-request lifecycle, serializing signing
//! requests so the user confirms one at a time.

mod channel;
mod manager;
mod pipeline;

pub use channel::{
    ChannelError, MockChannel, PeerChannel, PeerError, PeerMetadata, SessionNotice,
};
pub use manager::{
    CloseReason, Session, SessionError, SessionEvent, SessionManager, SessionState,
};
pub use pipeline::{
    FailureReason, RequestError, RequestMethod, RequestPipeline, RequestState, SigningRequest,
};

/// Identifier of one pairing with a remote peer.
pub type SessionId = u64;

/// Identifier of one signing request within a session.
pub type RequestId = u64;
