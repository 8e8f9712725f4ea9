//! Wallet health monitor.
//!
//! Reads every active fee-payer/ops wallet balance, classifies it against
//! the wallet's thresholds and files a refill request for LOW or CRITICAL
//! wallets. At most one PENDING request exists per (address, chain); the
//! store enforces that, so repeated checks never stack requests.
//!
//! A balance read failure skips that wallet only.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::chain::ChainClients;
use crate::storage::Store;
use crate::types::{
    FeePayerWallet, RefillReason, RefillStatus, WalletCheckResult, WalletHealth, WalletRefillRequest,
};

pub async fn check_wallets(
    store: &Store,
    chains: &ChainClients,
    now: DateTime<Utc>,
) -> Result<WalletCheckResult> {
    let wallets = store.active_wallets().await?;
    let mut result = WalletCheckResult::default();

    for wallet in &wallets {
        result.checked += 1;

        let balance = match chains.get(wallet.chain) {
            Ok(client) => client.balance(&wallet.address).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let balance = match balance {
            Ok(b) => b,
            Err(e) => {
                warn!(wallet = %wallet.label, chain = %wallet.chain, error = %e, "Balance read failed");
                result.read_errors += 1;
                continue;
            }
        };

        let health = wallet.classify(balance);
        store.record_wallet_check(&wallet.label, balance, health, now).await?;

        let reason = match health {
            WalletHealth::Healthy => {
                result.healthy += 1;
                continue;
            }
            WalletHealth::Low => {
                result.low += 1;
                RefillReason::LowBalance
            }
            WalletHealth::Critical => {
                result.critical += 1;
                RefillReason::CriticalBalance
            }
        };

        warn!(
            wallet = %wallet.label,
            chain = %wallet.chain,
            balance = %balance,
            health = health.as_str(),
            "Wallet below threshold"
        );

        if store.create_refill_request(&refill_request(wallet, reason, now)).await? {
            result.requests_created += 1;
            info!(wallet = %wallet.label, reason = reason.as_str(), "Refill requested");
        }
    }

    info!(
        checked = result.checked,
        healthy = result.healthy,
        low = result.low,
        critical = result.critical,
        read_errors = result.read_errors,
        requests = result.requests_created,
        "Wallet check complete"
    );
    Ok(result)
}

fn refill_request(wallet: &FeePayerWallet, reason: RefillReason, now: DateTime<Utc>) -> WalletRefillRequest {
    WalletRefillRequest {
        id: uuid::Uuid::new_v4().to_string(),
        wallet_type: wallet.wallet_type,
        wallet_address: wallet.address.clone(),
        chain: wallet.chain,
        reason,
        status: RefillStatus::Pending,
        created_at: now,
    }
}
