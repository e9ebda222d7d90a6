//! Signing and remote-session core for a Celo wallet.
//!
//! The wallet pays gas either in the native currency or in an allow-listed
//! stable token, signs with in-process key material or a hardware device,
//! and serves signing requests arriving from remote dapps over a relay.
//! The heavy lifting lives in the member crates, re-exported here:
//!
//! - [`core`]: configuration, the Celo fee model and the network-provider
//!   seam
//! - [`signers`]: local and hardware-backed signers plus the
//!   single-active-signer registry
//! - [`tx`]: the fee-currency gas policy and the transaction submitter
//! - [`session`]: the pairing lifecycle and the signing-request pipeline
//!
//! ```no_run
//! use std::sync::Arc;
//! use walletcore::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(WalletConfig::new(42220));
//! let registry = Arc::new(SignerRegistry::new(config.clone()));
//! registry.set_provider(Arc::new(MockProvider::new()));
//!
//! let wallet = "dcf2cbdd171a21c480aa7f53d77f31bb102282b3ff099c78e3118b37348c72f7"
//!     .parse::<LocalWallet>()?
//!     .with_chain_id(42220u64);
//! registry.set_signer(AnySigner::Local(wallet))?;
//!
//! let channel = Arc::new(MockChannel::new());
//! let manager = SessionManager::new(config, channel.clone());
//! let pipeline = RequestPipeline::new(manager.clone(), registry, channel);
//!
//! manager.connect().await?;
//! # Ok(())
//! # }
//! ```

pub use walletcore_core as core;
pub use walletcore_session as session;
pub use walletcore_signers as signers;
pub use walletcore_tx as tx;

/// Easy imports of the commonly used types.
pub mod prelude {
    pub use super::core::*;
    pub use super::session::*;
    pub use super::signers::*;
    pub use super::tx::*;
}
