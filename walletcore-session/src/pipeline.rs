//! The per-request lifecycle within a settled session.
//!
//! A remote peer may fire several signing requests at once; the user
//! confirms one at a time. The pipeline keeps at most one request active
//! per session and runs the rest through a FIFO queue. Every request
//! resolves within its deadline, and its terminal state is recorded before
//! the outcome is relayed back to the peer.

use crate::{
    channel::{PeerChannel, PeerError},
    manager::{SessionEvent, SessionManager},
    RequestId, SessionId,
};
use ethers_core::types::{Bytes, TransactionRequest};
use serde_json::{json, Value};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, oneshot},
    time::Instant,
};
use tracing::{debug, info, warn};
use walletcore_core::WalletConfig;
use walletcore_signers::{Signer, SignerRegistry};
use walletcore_tx::{SubmitError, TransactionSubmitter};

// EIP-1193 provider error codes, plus the JSON-RPC standard ones.
const CODE_USER_REJECTED: i64 = 4001;
const CODE_DISCONNECTED: i64 = 4900;
const CODE_INVALID_PARAMS: i64 = -32602;
const CODE_INTERNAL: i64 = -32000;

/// The JSON-RPC methods a peer may invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestMethod {
    SendTransaction,
    SignTransaction,
    PersonalSign,
}

impl FromStr for RequestMethod {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eth_sendTransaction" => Ok(RequestMethod::SendTransaction),
            "eth_signTransaction" => Ok(RequestMethod::SignTransaction),
            "personal_sign" => Ok(RequestMethod::PersonalSign),
            other => Err(RequestError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestMethod::SendTransaction => "eth_sendTransaction",
            RequestMethod::SignTransaction => "eth_signTransaction",
            RequestMethod::PersonalSign => "personal_sign",
        };
        f.write_str(name)
    }
}

/// Why a request failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The session closed while the request was outstanding.
    SessionInvalid,
    /// The request did not resolve within its deadline.
    RequestTimedOut,
    /// The user rejected the operation on the hardware device.
    HardwareDeclined,
    /// Signing or broadcasting failed.
    Submission(String),
    /// The peer sent parameters the method cannot use.
    BadParams(String),
}

impl FailureReason {
    fn peer_error(&self) -> PeerError {
        match self {
            FailureReason::SessionInvalid => {
                PeerError::new(CODE_DISCONNECTED, "session is no longer active")
            }
            FailureReason::RequestTimedOut => {
                PeerError::new(CODE_INTERNAL, "request timed out")
            }
            FailureReason::HardwareDeclined => {
                PeerError::new(CODE_USER_REJECTED, "user declined on the hardware device")
            }
            FailureReason::Submission(message) => PeerError::new(CODE_INTERNAL, message.clone()),
            FailureReason::BadParams(message) => {
                PeerError::new(CODE_INVALID_PARAMS, message.clone())
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::SessionInvalid => f.write_str("session is no longer active"),
            FailureReason::RequestTimedOut => f.write_str("request timed out"),
            FailureReason::HardwareDeclined => f.write_str("declined on the hardware device"),
            FailureReason::Submission(message) => write!(f, "submission failed: {message}"),
            FailureReason::BadParams(message) => write!(f, "bad parameters: {message}"),
        }
    }
}

/// Where a request is in its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Received, waiting behind another request of the same session.
    Pending,
    /// Being executed; the user may be looking at a confirmation screen.
    Active,
    /// Resolved successfully. Terminal.
    Complete,
    /// Resolved unsuccessfully. Terminal.
    Failed(FailureReason),
    /// Withdrawn by the user before resolving. Terminal.
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestState::Pending | RequestState::Active)
    }
}

/// One signing request from a remote peer.
#[derive(Clone, Debug)]
pub struct SigningRequest {
    pub id: RequestId,
    pub session: SessionId,
    pub method: RequestMethod,
    pub params: Value,
    pub state: RequestState,
    /// The request must resolve by this point, queued or not.
    pub deadline: Instant,
}

/// Error thrown when accepting or cancelling a request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The session is unknown, not yet approved, or closed.
    #[error("session {0} is not accepting requests")]
    SessionInvalid(SessionId),
    #[error("unsupported method {0:?}")]
    UnsupportedMethod(String),
    #[error("unknown request {0}")]
    UnknownRequest(RequestId),
}

/// Why an active request's task is being interrupted.
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    SessionClosed,
}

#[derive(Debug, Default)]
struct SessionQueue {
    active: Option<RequestId>,
    queued: VecDeque<RequestId>,
}

#[derive(Debug)]
struct Inner {
    config: Arc<WalletConfig>,
    manager: SessionManager,
    registry: Arc<SignerRegistry>,
    submitter: TransactionSubmitter,
    channel: Arc<dyn PeerChannel>,
    requests: Mutex<HashMap<RequestId, SigningRequest>>,
    queues: Mutex<HashMap<SessionId, SessionQueue>>,
    cancels: Mutex<HashMap<RequestId, oneshot::Sender<Interrupt>>>,
    next_id: AtomicU64,
}

/// Serializes a session's signing requests and relays their outcomes.
///
/// Cheap to clone; all clones share the same request table. Must be created
/// inside a tokio runtime: the pipeline listens for session-close events and
/// runs each active request on its own task.
#[derive(Clone, Debug)]
pub struct RequestPipeline {
    inner: Arc<Inner>,
}

impl RequestPipeline {
    pub fn new(
        manager: SessionManager,
        registry: Arc<SignerRegistry>,
        channel: Arc<dyn PeerChannel>,
    ) -> Self {
        let config = registry.config().clone();
        let submitter = TransactionSubmitter::new(registry.clone());
        let pipeline = Self {
            inner: Arc::new(Inner {
                config,
                manager,
                registry,
                submitter,
                channel,
                requests: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                cancels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        };

        // a closed session takes its outstanding requests down with it
        let listener = pipeline.clone();
        let mut events = pipeline.inner.manager.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Closed { session, .. }) => {
                        listener.session_closed(session).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        pipeline
    }

    /// The submitter this pipeline signs and broadcasts through.
    pub fn submitter(&self) -> &TransactionSubmitter {
        &self.inner.submitter
    }

    /// Accepts a signing request from the peer.
    ///
    /// The session must be settled. The request starts immediately when
    /// nothing else is active in its session, otherwise it queues in FIFO
    /// order. The deadline runs from this call either way.
    pub fn on_request(
        &self,
        session: SessionId,
        method: &str,
        params: Value,
    ) -> Result<RequestId, RequestError> {
        if !self.inner.manager.is_settled(session) {
            return Err(RequestError::SessionInvalid(session));
        }
        let method: RequestMethod = method.parse()?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request = SigningRequest {
            id,
            session,
            method,
            params,
            state: RequestState::Pending,
            deadline: Instant::now() + self.inner.config.session_request_timeout,
        };
        self.inner.requests.lock().unwrap().insert(id, request);

        let start = {
            let mut queues = self.inner.queues.lock().unwrap();
            let queue = queues.entry(session).or_default();
            if queue.active.is_none() {
                queue.active = Some(id);
                true
            } else {
                queue.queued.push_back(id);
                false
            }
        };
        info!(request = id, session, %method, queued = !start, "signing request received");
        if start {
            self.spawn_execution(id);
        }
        Ok(id)
    }

    /// Withdraws a request on the user's behalf.
    ///
    /// A queued request resolves as cancelled right away; an active one is
    /// interrupted, and a hardware signer is asked to abort its in-flight
    /// device conversation. Cancelling a resolved request is a no-op.
    pub async fn cancel(&self, id: RequestId) -> Result<(), RequestError> {
        let found = self
            .inner
            .requests
            .lock()
            .unwrap()
            .get(&id)
            .map(|r| (r.state.clone(), r.session));
        let (state, session) = found.ok_or(RequestError::UnknownRequest(id))?;

        match state {
            RequestState::Pending => {
                {
                    let mut queues = self.inner.queues.lock().unwrap();
                    if let Some(queue) = queues.get_mut(&session) {
                        queue.queued.retain(|queued| *queued != id);
                    }
                }
                self.finish(id, Err(user_rejected()), RequestState::Cancelled).await;
            }
            RequestState::Active => {
                let sender = self.inner.cancels.lock().unwrap().remove(&id);
                match sender {
                    Some(interrupt) => {
                        let _ = interrupt.send(Interrupt::Cancelled);
                    }
                    // already finishing; recording the cancel is a no-op then
                    None => {
                        self.finish(id, Err(user_rejected()), RequestState::Cancelled).await
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// A snapshot of the request, if known.
    pub fn get(&self, id: RequestId) -> Option<SigningRequest> {
        self.inner.requests.lock().unwrap().get(&id).cloned()
    }

    /// The request's current state, if known.
    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        self.inner.requests.lock().unwrap().get(&id).map(|r| r.state.clone())
    }

    fn spawn_execution(&self, id: RequestId) {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.run(id).await });
    }

    async fn run(self, id: RequestId) {
        let (session, method, params, deadline) = {
            let requests = self.inner.requests.lock().unwrap();
            match requests.get(&id) {
                Some(request) if request.state == RequestState::Pending => {
                    (request.session, request.method, request.params.clone(), request.deadline)
                }
                // cancelled or failed while queued
                _ => return,
            }
        };
        // the session may have closed while this request waited its turn
        if !self.inner.manager.is_settled(session) {
            self.fail(id, FailureReason::SessionInvalid).await;
            return;
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.inner.cancels.lock().unwrap().insert(id, cancel_tx);
        let activated = {
            let mut requests = self.inner.requests.lock().unwrap();
            match requests.get_mut(&id) {
                Some(request) if request.state == RequestState::Pending => {
                    request.state = RequestState::Active;
                    true
                }
                // a cancel landed between the queue handoff and here
                _ => false,
            }
        };
        if !activated {
            self.inner.cancels.lock().unwrap().remove(&id);
            return;
        }
        debug!(request = id, %method, "request active");

        tokio::select! {
            interrupt = cancel_rx => match interrupt {
                Ok(Interrupt::Cancelled) => {
                    if self.inner.registry.is_hardware() {
                        if let Ok(signer) = self.inner.registry.signer() {
                            signer.abort().await;
                        }
                    }
                    self.finish(id, Err(user_rejected()), RequestState::Cancelled).await;
                }
                Ok(Interrupt::SessionClosed) | Err(_) => {
                    self.fail(id, FailureReason::SessionInvalid).await;
                }
            },
            outcome = tokio::time::timeout_at(deadline, self.handle(method, &params)) => {
                match outcome {
                    Ok(Ok(value)) => {
                        self.finish(id, Ok(value), RequestState::Complete).await;
                    }
                    Ok(Err(reason)) => self.fail(id, reason).await,
                    Err(_) => {
                        warn!(request = id, %method, "request deadline passed");
                        self.fail(id, FailureReason::RequestTimedOut).await;
                    }
                }
            }
        }
    }

    async fn handle(&self, method: RequestMethod, params: &Value) -> Result<Value, FailureReason> {
        match method {
            RequestMethod::SendTransaction => {
                let tx = parse_transaction(params)?;
                let receipt =
                    self.inner.submitter.submit(tx).await.map_err(submit_failure)?;
                Ok(json!(receipt.transaction_hash))
            }
            RequestMethod::SignTransaction => {
                let tx = parse_transaction(params)?;
                let raw = self.inner.submitter.sign_only(tx).await.map_err(submit_failure)?;
                Ok(json!(raw))
            }
            RequestMethod::PersonalSign => {
                let message = parse_message(params)?;
                let signer = self
                    .inner
                    .registry
                    .signer()
                    .map_err(|err| FailureReason::Submission(err.to_string()))?;
                let signature = signer.sign_message(&message).await.map_err(|err| {
                    if err.is_declined() {
                        FailureReason::HardwareDeclined
                    } else {
                        FailureReason::Submission(err.to_string())
                    }
                })?;
                Ok(json!(format!("0x{signature}")))
            }
        }
    }

    async fn fail(&self, id: RequestId, reason: FailureReason) {
        self.finish(id, Err(reason.peer_error()), RequestState::Failed(reason)).await;
    }

    // Records the terminal state and lets the session's next request start,
    // then relays the outcome after the dismiss delay. The request is
    // dropped once the peer has been told.
    async fn finish(&self, id: RequestId, result: Result<Value, PeerError>, state: RequestState) {
        let session = {
            let mut requests = self.inner.requests.lock().unwrap();
            match requests.get_mut(&id) {
                Some(request) if !request.state.is_terminal() => {
                    request.state = state.clone();
                    request.session
                }
                _ => return,
            }
        };
        self.inner.cancels.lock().unwrap().remove(&id);
        info!(request = id, session, state = ?state, "request resolved");

        // the successor starts right away; only the outcome waits out the
        // dismiss delay, which is cosmetic and must not eat into the next
        // request's deadline
        let next = {
            let mut queues = self.inner.queues.lock().unwrap();
            let mut next = None;
            let mut drained = false;
            if let Some(queue) = queues.get_mut(&session) {
                if queue.active == Some(id) {
                    queue.active = queue.queued.pop_front();
                    next = queue.active;
                    drained = next.is_none();
                }
            }
            if drained {
                queues.remove(&session);
            }
            next
        };
        if let Some(next) = next {
            self.spawn_execution(next);
        }

        // let the remote UI settle before the outcome lands
        tokio::time::sleep(self.inner.config.dismiss_delay).await;
        if let Err(err) = self.inner.channel.respond(id, result).await {
            debug!(request = id, %err, "outcome not delivered to peer");
        }
        // resolved and reported back; the request is done for good
        self.inner.requests.lock().unwrap().remove(&id);
    }

    // A closed session takes every outstanding request with it.
    async fn session_closed(&self, session: SessionId) {
        let (active, queued) = {
            let mut queues = self.inner.queues.lock().unwrap();
            match queues.remove(&session) {
                Some(queue) => (queue.active, queue.queued),
                None => return,
            }
        };
        for id in queued {
            let pipeline = self.clone();
            tokio::spawn(async move {
                pipeline.fail(id, FailureReason::SessionInvalid).await;
            });
        }
        if let Some(id) = active {
            let sender = self.inner.cancels.lock().unwrap().remove(&id);
            match sender {
                Some(interrupt) => {
                    let _ = interrupt.send(Interrupt::SessionClosed);
                }
                None => self.fail(id, FailureReason::SessionInvalid).await,
            }
        }
    }
}

fn user_rejected() -> PeerError {
    PeerError::new(CODE_USER_REJECTED, "user rejected the request")
}

fn parse_transaction(params: &Value) -> Result<TransactionRequest, FailureReason> {
    let tx = params
        .get(0)
        .ok_or_else(|| FailureReason::BadParams("missing transaction parameter".to_string()))?;
    serde_json::from_value(tx.clone()).map_err(|err| FailureReason::BadParams(err.to_string()))
}

fn parse_message(params: &Value) -> Result<Bytes, FailureReason> {
    let message = params
        .get(0)
        .ok_or_else(|| FailureReason::BadParams("missing message parameter".to_string()))?;
    serde_json::from_value(message.clone())
        .map_err(|err| FailureReason::BadParams(err.to_string()))
}

fn submit_failure(err: SubmitError) -> FailureReason {
    match err {
        SubmitError::HardwareDeclined => FailureReason::HardwareDeclined,
        other => FailureReason::Submission(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MockChannel, PeerMetadata};
    use crate::manager::CloseReason;
    use ethers_core::rand::thread_rng;
    use ethers_core::types::Address;
    use std::time::Duration;
    use walletcore_core::MockProvider;
    use walletcore_signers::{
        hardware::{DerivationType, MockTransport},
        AnySigner, HardwareWallet, LocalWallet,
    };

    const CHAIN_ID: u64 = 42220;

    struct Harness {
        pipeline: RequestPipeline,
        manager: SessionManager,
        channel: MockChannel,
        provider: MockProvider,
        registry: Arc<SignerRegistry>,
        session: SessionId,
    }

    async fn harness() -> Harness {
        let config = Arc::new(WalletConfig::new(CHAIN_ID));
        let registry = Arc::new(SignerRegistry::new(config.clone()));
        let provider = MockProvider::new();
        provider.set_gas_price(1_000_000_000u64);
        provider.set_gas_estimate(21_000u64);
        registry.set_provider(Arc::new(provider.clone()));
        registry
            .set_signer(AnySigner::Local(LocalWallet::new(&mut thread_rng()).with_chain_id(CHAIN_ID)))
            .unwrap();

        let channel = MockChannel::new();
        let manager = SessionManager::new(config, Arc::new(channel.clone()));
        let pipeline =
            RequestPipeline::new(manager.clone(), registry.clone(), Arc::new(channel.clone()));

        let session = manager.propose(PeerMetadata::default(), vec!["eip155:42220".into()]);
        manager.approve(session, vec![]).await.unwrap();
        Harness { pipeline, manager, channel, provider, registry, session }
    }

    async fn install_hardware(harness: &Harness) -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new(Address::random()));
        let device =
            HardwareWallet::new(transport.clone(), DerivationType::CeloLive(0), CHAIN_ID)
                .await
                .unwrap();
        harness.registry.set_signer(AnySigner::Hardware(device)).unwrap();
        transport
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        for _ in 0..1200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("never observed: {what}");
    }

    fn send_tx_params() -> Value {
        json!([{ "to": format!("{:?}", Address::random()), "value": "0x1" }])
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_requests_for_unsettled_sessions() {
        let h = harness().await;
        let proposed = h.manager.propose(PeerMetadata::default(), vec!["eip155:42220".into()]);
        let err = h.pipeline.on_request(proposed, "personal_sign", json!(["0x01"])).unwrap_err();
        assert!(matches!(err, RequestError::SessionInvalid(id) if id == proposed));

        h.manager.close(h.session, CloseReason::PeerTerminated).await;
        let err = h.pipeline.on_request(h.session, "personal_sign", json!(["0x01"])).unwrap_err();
        assert!(matches!(err, RequestError::SessionInvalid(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_unsupported_methods() {
        let h = harness().await;
        let err = h.pipeline.on_request(h.session, "eth_signTypedData_v4", json!([])).unwrap_err();
        assert!(matches!(err, RequestError::UnsupportedMethod(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn personal_sign_resolves_after_the_dismiss_delay() {
        let h = harness().await;
        let started = Instant::now();
        let id = h.pipeline.on_request(h.session, "personal_sign", json!(["0xdeadbeef"])).unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("request complete", || pipeline.state(id) == Some(RequestState::Complete))
            .await;
        // terminal state is recorded before the peer hears about it
        assert!(h.channel.responses().iter().all(|(r, _)| *r != id));

        let channel = h.channel.clone();
        wait_until("response relayed", || !channel.responses().is_empty()).await;
        assert!(started.elapsed() >= Duration::from_secs(2));

        let (responded, result) = h.channel.responses().pop().unwrap();
        assert_eq!(responded, id);
        let signature = result.unwrap();
        let signature = signature.as_str().unwrap();
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 2 + 65 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn send_transaction_broadcasts_and_reports_the_hash() {
        let h = harness().await;
        let id = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("request complete", || pipeline.state(id) == Some(RequestState::Complete))
            .await;
        let channel = h.channel.clone();
        wait_until("response relayed", || !channel.responses().is_empty()).await;
        assert_eq!(h.provider.broadcasts().len(), 1);

        let (_, result) = h.channel.responses().pop().unwrap();
        let hash = result.unwrap();
        assert!(hash.as_str().unwrap().starts_with("0x"));
    }

    #[tokio::test(start_paused = true)]
    async fn one_active_request_per_session() {
        let h = harness().await;
        h.provider.hang_confirmations();
        let first = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();
        let second = h.pipeline.on_request(h.session, "personal_sign", json!(["0x01"])).unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("first active", || pipeline.state(first) == Some(RequestState::Active)).await;
        assert_eq!(h.pipeline.state(second), Some(RequestState::Pending));

        // withdrawing the stuck one lets the queue advance
        h.pipeline.cancel(first).await.unwrap();
        let pipeline = h.pipeline.clone();
        wait_until("first cancelled", || {
            pipeline.state(first) == Some(RequestState::Cancelled)
        })
        .await;
        let pipeline = h.pipeline.clone();
        wait_until("second complete", || pipeline.state(second) == Some(RequestState::Complete))
            .await;

        let channel = h.channel.clone();
        wait_until("both responses relayed", || channel.responses().len() == 2).await;
        let responses = h.channel.responses();
        assert_eq!(responses[0].0, first);
        assert_eq!(responses[0].1.as_ref().unwrap_err().code, CODE_USER_REJECTED);
        assert_eq!(responses[1].0, second);
        assert!(responses[1].1.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_a_queued_request_skips_it() {
        let h = harness().await;
        h.provider.hang_confirmations();
        let first = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();
        let second = h.pipeline.on_request(h.session, "personal_sign", json!(["0x01"])).unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("first active", || pipeline.state(first) == Some(RequestState::Active)).await;
        h.pipeline.cancel(second).await.unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("second cancelled", || {
            pipeline.state(second) == Some(RequestState::Cancelled)
        })
        .await;
        // the active request is untouched
        assert_eq!(h.pipeline.state(first), Some(RequestState::Active));
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_requests_are_dropped_after_reporting() {
        let h = harness().await;
        let id = h.pipeline.on_request(h.session, "personal_sign", json!(["0x01"])).unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("request complete", || pipeline.state(id) == Some(RequestState::Complete))
            .await;
        // still inspectable while the outcome waits out the dismiss delay
        assert!(h.pipeline.get(id).is_some());

        let pipeline = h.pipeline.clone();
        wait_until("request dropped", || pipeline.get(id).is_none()).await;
        assert_eq!(h.channel.responses().len(), 1);
        assert!(matches!(
            h.pipeline.cancel(id).await.unwrap_err(),
            RequestError::UnknownRequest(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn queue_advances_before_the_dismiss_delay() {
        let h = harness().await;
        h.provider.hang_confirmations();
        let first = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();
        let second = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("first active", || pipeline.state(first) == Some(RequestState::Active)).await;
        h.pipeline.cancel(first).await.unwrap();

        // the successor starts without sitting out the first one's delay
        let pipeline = h.pipeline.clone();
        wait_until("second active", || pipeline.state(second) == Some(RequestState::Active)).await;
        assert!(h.channel.responses().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lands_before_the_execution_task_starts() {
        let h = harness().await;
        let id = h.pipeline.on_request(h.session, "personal_sign", json!(["0x01"])).unwrap();
        // the spawned execution task has not run yet
        assert_eq!(h.pipeline.state(id), Some(RequestState::Pending));
        h.pipeline.cancel(id).await.unwrap();

        let channel = h.channel.clone();
        wait_until("cancellation relayed", || !channel.responses().is_empty()).await;
        let (_, result) = h.channel.responses().pop().unwrap();
        assert_eq!(result.unwrap_err().code, CODE_USER_REJECTED);
        // it never ran, never completed, and is gone
        assert!(h.pipeline.get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_time_out() {
        let h = harness().await;
        h.provider.hang_confirmations();
        let id = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(h.pipeline.state(id), Some(RequestState::Active));

        let pipeline = h.pipeline.clone();
        wait_until("request timed out", || {
            pipeline.state(id) == Some(RequestState::Failed(FailureReason::RequestTimedOut))
        })
        .await;

        let channel = h.channel.clone();
        wait_until("timeout relayed", || !channel.responses().is_empty()).await;
        let (_, result) = h.channel.responses().pop().unwrap();
        assert_eq!(result.unwrap_err().code, CODE_INTERNAL);
        // a timed-out request does not take the session down
        assert!(h.manager.is_settled(h.session));
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_device_times_out_with_the_session_intact() {
        let h = harness().await;
        let transport = install_hardware(&h).await;
        transport.hang_signatures();

        let id = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();
        tokio::time::sleep(Duration::from_secs(301)).await;

        let pipeline = h.pipeline.clone();
        wait_until("device stall timed out", || {
            pipeline.state(id) == Some(RequestState::Failed(FailureReason::RequestTimedOut))
        })
        .await;
        assert!(h.manager.is_settled(h.session));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_session_fails_outstanding_requests() {
        let h = harness().await;
        h.provider.hang_confirmations();
        let first = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();
        let second = h.pipeline.on_request(h.session, "personal_sign", json!(["0x01"])).unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("first active", || pipeline.state(first) == Some(RequestState::Active)).await;
        h.manager.close(h.session, CloseReason::PeerTerminated).await;

        let pipeline = h.pipeline.clone();
        wait_until("both failed", || {
            [first, second].iter().all(|id| {
                pipeline.state(*id) == Some(RequestState::Failed(FailureReason::SessionInvalid))
            })
        })
        .await;

        let channel = h.channel.clone();
        wait_until("failures relayed", || channel.responses().len() == 2).await;
        for (_, result) in h.channel.responses() {
            assert_eq!(result.unwrap_err().code, CODE_DISCONNECTED);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_a_hardware_request_aborts_the_device() {
        let h = harness().await;
        let transport = install_hardware(&h).await;
        transport.hang_signatures();

        let id = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();
        let pipeline = h.pipeline.clone();
        wait_until("request active", || pipeline.state(id) == Some(RequestState::Active)).await;

        h.pipeline.cancel(id).await.unwrap();
        let pipeline = h.pipeline.clone();
        wait_until("request cancelled", || {
            pipeline.state(id) == Some(RequestState::Cancelled)
        })
        .await;
        let transport = transport.clone();
        wait_until("device aborted", || transport.was_aborted()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_decline_fails_the_request() {
        let h = harness().await;
        let transport = install_hardware(&h).await;
        transport.decline_signatures();

        let id = h.pipeline.on_request(h.session, "eth_sendTransaction", send_tx_params()).unwrap();
        let pipeline = h.pipeline.clone();
        wait_until("request failed", || {
            pipeline.state(id) == Some(RequestState::Failed(FailureReason::HardwareDeclined))
        })
        .await;

        let channel = h.channel.clone();
        wait_until("decline relayed", || !channel.responses().is_empty()).await;
        let (_, result) = h.channel.responses().pop().unwrap();
        assert_eq!(result.unwrap_err().code, CODE_USER_REJECTED);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_params_fail_the_request() {
        let h = harness().await;
        let id = h.pipeline.on_request(h.session, "eth_sendTransaction", json!([])).unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("request failed", || {
            matches!(pipeline.state(id), Some(RequestState::Failed(FailureReason::BadParams(_))))
        })
        .await;

        let channel = h.channel.clone();
        wait_until("failure relayed", || !channel.responses().is_empty()).await;
        let (_, result) = h.channel.responses().pop().unwrap();
        assert_eq!(result.unwrap_err().code, CODE_INVALID_PARAMS);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_transaction_returns_raw_rlp_without_broadcasting() {
        let h = harness().await;
        let id = h.pipeline.on_request(h.session, "eth_signTransaction", send_tx_params()).unwrap();

        let pipeline = h.pipeline.clone();
        wait_until("request complete", || pipeline.state(id) == Some(RequestState::Complete))
            .await;
        let channel = h.channel.clone();
        wait_until("response relayed", || !channel.responses().is_empty()).await;
        assert!(h.provider.broadcasts().is_empty());

        let (_, result) = h.channel.responses().pop().unwrap();
        assert!(result.unwrap().as_str().unwrap().starts_with("0x"));
    }
}
