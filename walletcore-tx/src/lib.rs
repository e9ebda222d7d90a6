//! Transaction plumbing: the fee-currency gas policy and the submitter that
//! routes every outgoing transaction through the wallet's active signer.
//!
//! On Celo, gas may be paid in the native currency or in an allow-listed
//! stable token. [`GasCurrencyPolicy`] decides the gas price and limit for
//! either case; [`TransactionSubmitter`] applies the policy, signs through
//! the [`SignerRegistry`](walletcore_signers::SignerRegistry) and broadcasts
//! via the connected network provider.

mod gas;
mod submitter;

pub use gas::{GasCurrencyPolicy, PolicyError};
pub use submitter::{SubmitError, TransactionSubmitter};
