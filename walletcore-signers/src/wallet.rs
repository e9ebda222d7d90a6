//! A signer backed by in-process k256 key material.

use crate::{to_eip155_v, Signer, SignerError};
use async_trait::async_trait;
use ethers_core::{
    k256::{
        ecdsa::{
            self, signature::hazmat::PrehashSigner, RecoveryId,
            Signature as RecoverableSignature, SigningKey,
        },
        FieldBytes,
    },
    rand::{CryptoRng, Rng},
    types::{Address, Signature, TransactionRequest, H256, U256},
    utils::{hash_message, secret_key_to_address},
};
use std::{fmt, path::Path, str::FromStr};
use thiserror::Error;

/// Error thrown by [`LocalWallet`].
#[derive(Debug, Error)]
pub enum WalletError {
    /// Error propagated from k256's ECDSA module
    #[error(transparent)]
    EcdsaError(#[from] ecdsa::Error),
    /// Underlying eth keystore error
    #[error(transparent)]
    EthKeystoreError(#[from] eth_keystore::KeystoreError),
    /// Error propagated from the hex crate.
    #[error(transparent)]
    HexError(#[from] hex::FromHexError),
}

/// An Ethereum private-public key pair used for signing.
///
/// Created on wallet unlock or import: the persistence collaborator hands
/// over an encrypted JSON keystore blob which [`decrypt_keystore`] turns
/// into a live key. Plaintext key material never leaves this type.
///
/// # Examples
///
/// ```
/// use ethers_core::rand::thread_rng;
/// use walletcore_signers::{LocalWallet, Signer};
///
/// # async fn foo() -> Result<(), Box<dyn std::error::Error>> {
/// let wallet = LocalWallet::new(&mut thread_rng()).with_chain_id(42220u64);
///
/// let message = b"hello";
/// let signature = wallet.sign_message(message).await?;
/// assert_eq!(signature.recover(&message[..]).unwrap(), wallet.address());
/// # Ok(())
/// # }
/// ```
///
/// [`decrypt_keystore`]: LocalWallet::decrypt_keystore
#[derive(Clone)]
pub struct LocalWallet {
    /// The wallet's private key
    pub(crate) signer: SigningKey,
    /// The wallet's address
    pub(crate) address: Address,
    /// The wallet's chain id (for EIP-155)
    pub(crate) chain_id: u64,
}

impl LocalWallet {
    /// Creates a new random keypair seeded with the provided RNG
    pub fn new<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let signer = SigningKey::random(rng);
        let address = secret_key_to_address(&signer);
        Self { signer, address, chain_id: 1 }
    }

    /// Constructs a wallet from raw secret-key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        let signer = SigningKey::from_slice(bytes)?;
        let address = secret_key_to_address(&signer);
        Ok(Self { signer, address, chain_id: 1 })
    }

    /// Creates a new random encrypted JSON keystore in the provided
    /// directory and returns the wallet together with the keystore's
    /// random UUID.
    pub fn new_keystore<P, R, S>(
        dir: P,
        rng: &mut R,
        password: S,
        name: Option<&str>,
    ) -> Result<(Self, String), WalletError>
    where
        P: AsRef<Path>,
        R: Rng + CryptoRng,
        S: AsRef<[u8]>,
    {
        let (secret, uuid) = eth_keystore::new(dir, rng, password, name)?;
        let wallet = Self::from_bytes(&secret)?;
        Ok((wallet, uuid))
    }

    /// Decrypts the encrypted JSON keystore at the provided path.
    ///
    /// This is the unlock path: the persistence collaborator only ever
    /// stores and returns the opaque encrypted blob.
    pub fn decrypt_keystore<P, S>(keypath: P, password: S) -> Result<Self, WalletError>
    where
        P: AsRef<Path>,
        S: AsRef<[u8]>,
    {
        let secret = eth_keystore::decrypt_key(keypath, password)?;
        Self::from_bytes(&secret)
    }

    /// Sets the wallet's chain id, used for EIP-155 replay protection.
    #[must_use]
    pub fn with_chain_id<T: Into<u64>>(mut self, chain_id: T) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    /// Returns the wallet's address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the wallet's chain id
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Signs the provided hash; `v` is 27/28, without replay protection.
    pub fn sign_hash(&self, hash: H256) -> Result<Signature, WalletError> {
        let (recoverable_sig, recovery_id): (RecoverableSignature, RecoveryId) =
            self.signer.sign_prehash(hash.as_ref())?;

        let v = u8::from(recovery_id) as u64 + 27;

        let r_bytes: FieldBytes = recoverable_sig.r().into();
        let s_bytes: FieldBytes = recoverable_sig.s().into();
        let r = U256::from_big_endian(r_bytes.as_slice());
        let s = U256::from_big_endian(s_bytes.as_slice());

        Ok(Signature { r, s, v })
    }

    /// Synchronously signs the transaction with EIP-155 replay protection,
    /// falling back to the wallet's chain id when the transaction carries
    /// none.
    pub fn sign_transaction_sync(
        &self,
        tx: &TransactionRequest,
    ) -> Result<Signature, WalletError> {
        let mut tx = tx.clone();
        let chain_id = tx.chain_id.map(|id| id.as_u64()).unwrap_or(self.chain_id);
        tx.chain_id = Some(chain_id.into());

        let mut sig = self.sign_hash(tx.sighash())?;
        // sign_hash returns `v` in 'Electrum' notation, rebase it onto eip155
        sig.v = to_eip155_v(sig.v as u8 - 27, chain_id);
        Ok(sig)
    }
}

#[async_trait]
impl Signer for LocalWallet {
    async fn sign_transaction(&self, tx: &TransactionRequest) -> Result<Signature, SignerError> {
        Ok(self.sign_transaction_sync(tx)?)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        Ok(self.sign_hash(hash_message(message))?)
    }

    fn address(&self) -> Address {
        self.address
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

impl FromStr for LocalWallet {
    type Err = WalletError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let src = src.strip_prefix("0x").unwrap_or(src);
        let bytes = hex::decode(src)?;
        Self::from_bytes(&bytes)
    }
}

// do not log the key material
impl fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}
