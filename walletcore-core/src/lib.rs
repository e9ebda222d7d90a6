//! Shared types for the walletcore crates.
//!
//! This crate carries everything the signer, transaction and session layers
//! have in common: the wallet [`config`](crate::config), the Celo fee model
//! ([`FeeCurrency`], [`FeeQuote`]) and the [`NetworkProvider`] trait through
//! which the embedding application supplies its RPC client. A scripted
//! [`MockProvider`] is exported so that dependent crates can test against the
//! provider seam without a node.

pub mod config;
pub mod fee;
pub mod provider;

pub use config::WalletConfig;
pub use fee::{FeeCurrency, FeeQuote};
pub use provider::{MockProvider, NetworkProvider, ProviderError};
