//! End-to-end flows: pair a session and run signing requests through it.

use ethers_core::rand::thread_rng;
use ethers_core::types::{Address, TransactionRequest, U256};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use walletcore::prelude::*;
use walletcore::signers::hardware::{DerivationType, MockTransport};

const CHAIN_ID: u64 = 42220;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
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

struct Wallet {
    registry: Arc<SignerRegistry>,
    provider: MockProvider,
    channel: MockChannel,
    manager: SessionManager,
    pipeline: RequestPipeline,
}

fn wallet(config: WalletConfig) -> Wallet {
    let config = Arc::new(config);
    let registry = Arc::new(SignerRegistry::new(config.clone()));
    let provider = MockProvider::new();
    provider.set_gas_price(1_000_000_000u64);
    provider.set_gas_estimate(50_000u64);
    registry.set_provider(Arc::new(provider.clone()));

    let channel = MockChannel::new();
    let manager = SessionManager::new(config, Arc::new(channel.clone()));
    let pipeline =
        RequestPipeline::new(manager.clone(), registry.clone(), Arc::new(channel.clone()));
    Wallet { registry, provider, channel, manager, pipeline }
}

async fn settle_session(wallet: &Wallet) -> u64 {
    wallet.manager.connect().await.unwrap();
    let session = wallet.manager.propose(
        PeerMetadata {
            name: "celo.dapp".into(),
            url: "https://dapp.example".into(),
            ..Default::default()
        },
        vec!["eip155:42220".into()],
    );
    let accounts = wallet.registry.signer().map(|s| vec![s.address()]).unwrap_or_default();
    wallet.manager.approve(session, accounts).await.unwrap();
    session
}

#[tokio::test(start_paused = true)]
async fn stable_token_transfer_over_a_remote_session() {
    init_tracing();
    let token = Address::random();
    let wallet = wallet(WalletConfig::new(CHAIN_ID).with_fee_currency(token));
    wallet.provider.set_token_gas_price(token, 2_000_000_000u64);
    wallet
        .registry
        .set_signer(AnySigner::Local(LocalWallet::new(&mut thread_rng()).with_chain_id(CHAIN_ID)))
        .unwrap();

    let session = settle_session(&wallet).await;
    assert!(wallet.manager.is_settled(session));
    assert_eq!(wallet.channel.notices(), vec![(session, SessionNotice::Settled)]);

    // the token fee currency carries the inflated gas limit
    let mut transfer = TransactionRequest::new().to(Address::random()).value(1u64);
    transfer.fee_currency = Some(token);
    let prepared = wallet.pipeline.submitter().prepare(transfer).await.unwrap();
    assert_eq!(prepared.gas, Some(U256::from(500_000u64)));
    assert_eq!(prepared.gas_price, Some(U256::from(2_000_000_000u64)));

    let request = wallet
        .pipeline
        .on_request(
            session,
            "eth_sendTransaction",
            json!([{
                "to": format!("{:?}", Address::random()),
                "value": "0x1",
                "feeCurrency": format!("{token:?}"),
            }]),
        )
        .unwrap();

    let pipeline = wallet.pipeline.clone();
    wait_until("request complete", || pipeline.state(request) == Some(RequestState::Complete))
        .await;
    let channel = wallet.channel.clone();
    wait_until("outcome relayed", || !channel.responses().is_empty()).await;
    assert_eq!(wallet.provider.broadcasts().len(), 1);
    // reported back, so the request record is gone
    assert!(wallet.pipeline.get(request).is_none());

    let (responded, result) = wallet.channel.responses().pop().unwrap();
    assert_eq!(responded, request);
    assert!(result.unwrap().as_str().unwrap().starts_with("0x"));

    // logout tears everything down
    wallet.manager.close_all(CloseReason::Logout).await;
    assert!(!wallet.manager.is_settled(session));
    let err = wallet.pipeline.on_request(session, "personal_sign", json!(["0x01"])).unwrap_err();
    assert!(matches!(err, RequestError::SessionInvalid(_)));
}

#[tokio::test(start_paused = true)]
async fn hardware_decline_is_relayed_to_the_peer() {
    init_tracing();
    let wallet = wallet(WalletConfig::new(CHAIN_ID));

    let transport = Arc::new(MockTransport::new(Address::random()));
    transport.decline_signatures();
    let device = HardwareWallet::new(transport, DerivationType::CeloLive(0), CHAIN_ID)
        .await
        .unwrap();
    wallet.registry.set_signer(AnySigner::Hardware(device)).unwrap();
    assert!(wallet.registry.is_hardware());

    let session = settle_session(&wallet).await;
    let request = wallet
        .pipeline
        .on_request(
            session,
            "eth_sendTransaction",
            json!([{ "to": format!("{:?}", Address::random()), "value": "0x1" }]),
        )
        .unwrap();

    let pipeline = wallet.pipeline.clone();
    wait_until("request declined", || {
        pipeline.state(request) == Some(RequestState::Failed(FailureReason::HardwareDeclined))
    })
    .await;
    let channel = wallet.channel.clone();
    wait_until("decline relayed", || !channel.responses().is_empty()).await;

    let (_, result) = wallet.channel.responses().pop().unwrap();
    assert_eq!(result.unwrap_err().code, 4001);
    // the session itself survives a decline
    assert!(wallet.manager.is_settled(session));
}

#[tokio::test(start_paused = true)]
async fn expired_proposal_never_accepts_requests() {
    init_tracing();
    let wallet = wallet(WalletConfig::new(CHAIN_ID));
    wallet
        .registry
        .set_signer(AnySigner::Local(LocalWallet::new(&mut thread_rng()).with_chain_id(CHAIN_ID)))
        .unwrap();

    wallet.manager.connect().await.unwrap();
    let session = wallet.manager.propose(PeerMetadata::default(), vec!["eip155:42220".into()]);
    tokio::time::sleep(Duration::from_secs(181)).await;

    assert!(matches!(
        wallet.manager.get(session).unwrap().state,
        SessionState::Closed(CloseReason::ProposalTimeout)
    ));
    assert!(matches!(
        wallet.manager.approve(session, vec![]).await.unwrap_err(),
        SessionError::SessionNotProposed(_)
    ));
    assert!(matches!(
        wallet.pipeline.on_request(session, "personal_sign", json!(["0x01"])).unwrap_err(),
        RequestError::SessionInvalid(_)
    ));
}
