//! The Celo fee model: gas may be paid in the native currency or in an
//! allow-listed stable token.

use ethers_core::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The asset used to pay network gas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeCurrency {
    /// The chain's native currency.
    Native,
    /// An allow-listed native-equivalent token.
    Token(Address),
}

impl FeeCurrency {
    /// The token address, if the fee is not paid in the native currency.
    pub fn token(&self) -> Option<Address> {
        match self {
            FeeCurrency::Native => None,
            FeeCurrency::Token(addr) => Some(*addr),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, FeeCurrency::Native)
    }
}

/// `None` is the native currency, mirroring the optional `feeCurrency`
/// field of a Celo transaction.
impl From<Option<Address>> for FeeCurrency {
    fn from(src: Option<Address>) -> Self {
        match src {
            None => FeeCurrency::Native,
            Some(addr) => FeeCurrency::Token(addr),
        }
    }
}

impl fmt::Display for FeeCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeCurrency::Native => write!(f, "native"),
            FeeCurrency::Token(addr) => write!(f, "{addr:?}"),
        }
    }
}

/// A derived gas price/limit pair for one transaction. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeQuote {
    /// Gas price, denominated in the fee currency.
    pub gas_price: U256,
    /// Gas limit, already inflated for non-native currencies.
    pub gas_limit: U256,
    /// The currency the fee will be paid in.
    pub fee_currency: FeeCurrency,
}

impl FeeQuote {
    /// The worst-case fee this quote authorizes, in the fee currency.
    pub fn max_fee(&self) -> U256 {
        self.gas_price.saturating_mul(self.gas_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_currency_from_optional_address() {
        assert_eq!(FeeCurrency::from(None), FeeCurrency::Native);
        let addr = Address::random();
        assert_eq!(FeeCurrency::from(Some(addr)), FeeCurrency::Token(addr));
        assert_eq!(FeeCurrency::Token(addr).token(), Some(addr));
        assert!(FeeCurrency::Native.is_native());
    }

    #[test]
    fn max_fee_is_price_times_limit() {
        let quote = FeeQuote {
            gas_price: U256::from(2_000_000_000u64),
            gas_limit: U256::from(500_000u64),
            fee_currency: FeeCurrency::Native,
        };
        assert_eq!(quote.max_fee(), U256::from(1_000_000_000_000_000u64));
    }
}
