//! Env-backed fee-payer key store.
//!
//! Each wallet label maps to a public address and the name of the
//! environment variable holding its signing secret. Secrets are read on
//! each `signer_for` call and never cached here.

use secrecy::SecretString;
use std::collections::HashMap;

use super::{ChainError, KeyStore, Signer};

#[derive(Debug, Clone)]
struct KeyEntry {
    address: String,
    secret_env: String,
}

#[derive(Debug, Clone, Default)]
pub struct EnvKeyStore {
    entries: HashMap<String, KeyEntry>,
}

impl EnvKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wallet label.
    pub fn register(&mut self, label: &str, address: &str, secret_env: &str) {
        self.entries.insert(
            label.to_string(),
            KeyEntry {
                address: address.to_string(),
                secret_env: secret_env.to_string(),
            },
        );
    }
}

impl KeyStore for EnvKeyStore {
    fn signer_for(&self, label: &str) -> Result<Signer, ChainError> {
        let entry = self
            .entries
            .get(label)
            .ok_or_else(|| ChainError::Unsupported(format!("no signer registered for {label}")))?;

        let secret = std::env::var(&entry.secret_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                ChainError::Unsupported(format!(
                    "signing secret for {label} is not set ({})",
                    entry.secret_env
                ))
            })?;

        Ok(Signer {
            label: label.to_string(),
            address: entry.address.clone(),
            secret: SecretString::new(secret),
        })
    }
}
