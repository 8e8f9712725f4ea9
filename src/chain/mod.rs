//! Chain collaborators.
//!
//! Defines the `ChainClient` trait (trade submission + balance reads) and
//! the `KeyStore` trait that hands out signers by wallet label. The core
//! never touches raw key material beyond passing a `Signer` through.

pub mod client;
pub mod keys;

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Chain, FerryError, Run};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What the chain reports back after an approved run settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub tx_reference: String,
    /// Realised profit in the run's `token_in` units (negative on loss).
    pub actual_profit: Decimal,
}

/// Signing capability for one wallet. The secret never leaves this struct
/// except at the submission boundary.
#[derive(Debug, Clone)]
pub struct Signer {
    pub label: String,
    pub address: String,
    pub secret: SecretString,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Transient chain failure: {0}")]
    RemoteTransient(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Abstraction over one chain's execution and balance endpoints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain this client talks to.
    fn chain(&self) -> Chain;

    /// Submit the trade for an approved run, signed by `signer`.
    async fn execute(&self, run: &Run, signer: &Signer) -> Result<ExecutionReceipt, ChainError>;

    /// Native-token balance of `address`, in whole units.
    async fn balance(&self, address: &str) -> Result<Decimal, ChainError>;
}

/// Fee-payer key store: "give me a signer for wallet X".
#[cfg_attr(test, mockall::automock)]
pub trait KeyStore: Send + Sync {
    fn signer_for(&self, label: &str) -> Result<Signer, ChainError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Chain clients keyed by chain.
#[derive(Clone, Default)]
pub struct ChainClients {
    clients: HashMap<Chain, Arc<dyn ChainClient>>,
}

impl ChainClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: Arc<dyn ChainClient>) {
        self.clients.insert(client.chain(), client);
    }

    pub fn get(&self, chain: Chain) -> Result<&Arc<dyn ChainClient>, FerryError> {
        self.clients.get(&chain).ok_or(FerryError::ChainNotConfigured {
            chain,
            what: "chain client",
        })
    }
}

impl FromIterator<Arc<dyn ChainClient>> for ChainClients {
    fn from_iter<I: IntoIterator<Item = Arc<dyn ChainClient>>>(iter: I) -> Self {
        let mut clients = ChainClients::new();
        for c in iter {
            clients.insert(c);
        }
        clients
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let mut mock = MockChainClient::new();
        mock.expect_chain().return_const(Chain::Base);

        let clients: ChainClients = vec![Arc::new(mock) as Arc<dyn ChainClient>]
            .into_iter()
            .collect();

        assert!(clients.get(Chain::Base).is_ok());
        let err = clients.get(Chain::Solana).err().unwrap();
        assert!(matches!(err, FerryError::ChainNotConfigured { chain: Chain::Solana, .. }));
    }
}
