//! Persistence layer.
//!
//! SQLite via `sqlx`, runtime-checked queries. Every phase commits its own
//! rows so a cycle that dies halfway leaves an inspectable trail: runs,
//! daily counters, refill requests and the cycle log itself.
//!
//! Money is stored as TEXT (exact `Decimal` round-trip), timestamps as unix
//! milliseconds, dates as `YYYY-MM-DD`, phase results as JSON. Daily
//! counter money is the exception: fixed-scale integers, so settlements
//! increment them in SQL instead of read-modify-write.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::{
    AutomationCycleLog, Chain, DailyRiskCounter, FeePayerWallet, FerryError, GlobalSettings, Run,
    RunStatus, SafeModeTrip, Strategy, StrategyPurpose, WalletHealth, WalletRefillRequest,
};

/// Lease name shared by every cycle and diagnostic phase.
pub const CYCLE_LEASE: &str = "automation_cycle";

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS strategies (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        chain TEXT NOT NULL,
        network TEXT NOT NULL,
        venue_a TEXT NOT NULL,
        venue_b TEXT NOT NULL,
        token_in TEXT NOT NULL,
        token_out TEXT NOT NULL,
        token_via TEXT,
        token_in_decimals INTEGER NOT NULL,
        notional TEXT NOT NULL,
        scan_mode TEXT NOT NULL,
        is_enabled INTEGER NOT NULL,
        is_auto_enabled INTEGER NOT NULL,
        purpose_general_profit INTEGER NOT NULL,
        purpose_fee_payer_refill INTEGER NOT NULL,
        purpose_ops_wallet_refill INTEGER NOT NULL,
        min_expected_profit TEXT NOT NULL,
        min_profit_to_gas_ratio TEXT NOT NULL,
        max_daily_loss TEXT NOT NULL,
        max_trades_per_day INTEGER NOT NULL,
        max_trade_value TEXT,
        updated_at INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        strategy_id TEXT NOT NULL,
        batch_id TEXT NOT NULL,
        chain TEXT NOT NULL,
        scan_mode TEXT NOT NULL,
        status TEXT NOT NULL,
        verdict TEXT NOT NULL,
        token_path TEXT NOT NULL,
        source_path TEXT NOT NULL,
        notional TEXT NOT NULL,
        final_output TEXT,
        estimated_profit TEXT NOT NULL,
        estimated_gas_cost TEXT NOT NULL,
        actual_profit TEXT,
        approved_for_auto_execution INTEGER NOT NULL DEFAULT 0,
        auto_executed INTEGER NOT NULL DEFAULT 0,
        purpose TEXT NOT NULL,
        error_message TEXT,
        tx_reference TEXT,
        started_at INTEGER NOT NULL,
        finished_at INTEGER
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_runs_batch ON runs(batch_id)",
    r"
    CREATE TABLE IF NOT EXISTS daily_risk_counters (
        strategy_id TEXT NOT NULL,
        date TEXT NOT NULL,
        chain TEXT NOT NULL,
        total_trades INTEGER NOT NULL,
        total_pnl_units INTEGER NOT NULL,
        total_loss_units INTEGER NOT NULL,
        PRIMARY KEY (strategy_id, date, chain)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS fee_payer_wallets (
        label TEXT PRIMARY KEY,
        wallet_type TEXT NOT NULL,
        chain TEXT NOT NULL,
        address TEXT NOT NULL,
        low_threshold TEXT NOT NULL,
        critical_threshold TEXT NOT NULL,
        is_active INTEGER NOT NULL,
        last_balance TEXT,
        last_health TEXT,
        last_checked_at INTEGER
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS wallet_refill_requests (
        id TEXT PRIMARY KEY,
        wallet_type TEXT NOT NULL,
        wallet_address TEXT NOT NULL,
        chain TEXT NOT NULL,
        reason TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_refill_one_pending
        ON wallet_refill_requests(wallet_address, chain)
        WHERE status = 'PENDING'
    ",
    r"
    CREATE TABLE IF NOT EXISTS global_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        auto_arbitrage_enabled INTEGER NOT NULL,
        safe_mode_enabled INTEGER NOT NULL,
        safe_mode_triggered_at INTEGER,
        safe_mode_reason TEXT,
        max_global_daily_loss TEXT NOT NULL,
        max_global_trades_per_day INTEGER NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS automation_cycle_logs (
        id TEXT PRIMARY KEY,
        cycle_started_at INTEGER NOT NULL,
        cycle_finished_at INTEGER,
        trigger_type TEXT NOT NULL,
        overall_status TEXT NOT NULL,
        scan_results TEXT NOT NULL,
        decision_result TEXT,
        execution_result TEXT,
        wallet_check_result TEXT,
        error_message TEXT
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS cycle_leases (
        name TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        acquired_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )
    ",
];

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

fn malformed(col: &str, detail: impl fmt::Display) -> anyhow::Error {
    FerryError::Storage(format!("malformed column {col}: {detail}")).into()
}

fn parse_col<T>(row: &SqliteRow, col: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: String = row.try_get(col)?;
    raw.parse::<T>().map_err(|e| malformed(col, e))
}

fn opt_parse_col<T>(row: &SqliteRow, col: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|r| r.parse::<T>().map_err(|e| malformed(col, e)))
        .transpose()
}

fn json_col<T: DeserializeOwned>(row: &SqliteRow, col: &str) -> Result<T> {
    let raw: String = row.try_get(col)?;
    serde_json::from_str(&raw).map_err(|e| malformed(col, e))
}

fn opt_json_col<T: DeserializeOwned>(row: &SqliteRow, col: &str) -> Result<Option<T>> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|r| serde_json::from_str(&r).map_err(|e| malformed(col, e)))
        .transpose()
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialise column value")
}

fn millis_to_utc(col: &str, ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| malformed(col, ms))
}

fn ts_col(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>> {
    let ms: i64 = row.try_get(col)?;
    millis_to_utc(col, ms)
}

fn opt_ts_col(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.try_get(col)?;
    ms.map(|ms| millis_to_utc(col, ms)).transpose()
}

fn u32_col(row: &SqliteRow, col: &str) -> Result<u32> {
    let v: i64 = row.try_get(col)?;
    u32::try_from(v).map_err(|e| malformed(col, e))
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Decimal places kept by the daily counter money columns.
const COUNTER_SCALE: u32 = 9;

fn to_units(amount: Decimal) -> Result<i64> {
    amount
        .round_dp(COUNTER_SCALE)
        .checked_mul(Decimal::from(10_i64.pow(COUNTER_SCALE)))
        .and_then(|v| v.to_i64())
        .ok_or_else(|| FerryError::Storage(format!("amount {amount} exceeds counter range")).into())
}

fn from_units(units: i64) -> Decimal {
    Decimal::new(units, COUNTER_SCALE).normalize()
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn strategy_from_row(row: &SqliteRow) -> Result<Strategy> {
    Ok(Strategy {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        chain: parse_col(row, "chain")?,
        network: parse_col(row, "network")?,
        venue_a: row.try_get("venue_a")?,
        venue_b: row.try_get("venue_b")?,
        token_in: row.try_get("token_in")?,
        token_out: row.try_get("token_out")?,
        token_via: row.try_get("token_via")?,
        token_in_decimals: u32_col(row, "token_in_decimals")?,
        notional: parse_col(row, "notional")?,
        scan_mode: parse_col(row, "scan_mode")?,
        is_enabled: row.try_get("is_enabled")?,
        is_auto_enabled: row.try_get("is_auto_enabled")?,
        purpose: StrategyPurpose {
            general_profit: row.try_get("purpose_general_profit")?,
            fee_payer_refill: row.try_get("purpose_fee_payer_refill")?,
            ops_wallet_refill: row.try_get("purpose_ops_wallet_refill")?,
        },
        min_expected_profit: parse_col(row, "min_expected_profit")?,
        min_profit_to_gas_ratio: parse_col(row, "min_profit_to_gas_ratio")?,
        max_daily_loss: parse_col(row, "max_daily_loss")?,
        max_trades_per_day: u32_col(row, "max_trades_per_day")?,
        max_trade_value: opt_parse_col(row, "max_trade_value")?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<Run> {
    Ok(Run {
        id: row.try_get("id")?,
        strategy_id: row.try_get("strategy_id")?,
        batch_id: row.try_get("batch_id")?,
        chain: parse_col(row, "chain")?,
        scan_mode: parse_col(row, "scan_mode")?,
        status: parse_col(row, "status")?,
        verdict: parse_col(row, "verdict")?,
        token_path: json_col(row, "token_path")?,
        source_path: json_col(row, "source_path")?,
        notional: parse_col(row, "notional")?,
        final_output: opt_parse_col(row, "final_output")?,
        estimated_profit: parse_col(row, "estimated_profit")?,
        estimated_gas_cost: parse_col(row, "estimated_gas_cost")?,
        actual_profit: opt_parse_col(row, "actual_profit")?,
        approved_for_auto_execution: row.try_get("approved_for_auto_execution")?,
        auto_executed: row.try_get("auto_executed")?,
        purpose: parse_col(row, "purpose")?,
        error_message: row.try_get("error_message")?,
        tx_reference: row.try_get("tx_reference")?,
        started_at: ts_col(row, "started_at")?,
        finished_at: opt_ts_col(row, "finished_at")?,
    })
}

fn counter_from_row(row: &SqliteRow) -> Result<DailyRiskCounter> {
    Ok(DailyRiskCounter {
        strategy_id: row.try_get("strategy_id")?,
        date: parse_col(row, "date")?,
        chain: parse_col(row, "chain")?,
        total_trades: u32_col(row, "total_trades")?,
        total_pnl: from_units(row.try_get("total_pnl_units")?),
        total_loss: from_units(row.try_get("total_loss_units")?),
    })
}

/// Add `delta` to its counter row with an in-SQL increment and return the
/// updated totals.
async fn increment_counter(
    conn: &mut SqliteConnection,
    delta: &DailyRiskCounter,
) -> Result<DailyRiskCounter> {
    let row = sqlx::query(
        r"
        INSERT INTO daily_risk_counters
            (strategy_id, date, chain, total_trades, total_pnl_units, total_loss_units)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(strategy_id, date, chain) DO UPDATE SET
            total_trades = total_trades + excluded.total_trades,
            total_pnl_units = total_pnl_units + excluded.total_pnl_units,
            total_loss_units = total_loss_units + excluded.total_loss_units
        RETURNING *
        ",
    )
    .bind(&delta.strategy_id)
    .bind(date_key(delta.date))
    .bind(delta.chain.as_str())
    .bind(i64::from(delta.total_trades))
    .bind(to_units(delta.total_pnl)?)
    .bind(to_units(delta.total_loss)?)
    .fetch_one(&mut *conn)
    .await?;
    counter_from_row(&row)
}

fn wallet_from_row(row: &SqliteRow) -> Result<FeePayerWallet> {
    Ok(FeePayerWallet {
        label: row.try_get("label")?,
        wallet_type: parse_col(row, "wallet_type")?,
        chain: parse_col(row, "chain")?,
        address: row.try_get("address")?,
        low_threshold: parse_col(row, "low_threshold")?,
        critical_threshold: parse_col(row, "critical_threshold")?,
        is_active: row.try_get("is_active")?,
        last_balance: opt_parse_col(row, "last_balance")?,
        last_health: opt_parse_col(row, "last_health")?,
        last_checked_at: opt_ts_col(row, "last_checked_at")?,
    })
}

fn refill_from_row(row: &SqliteRow) -> Result<WalletRefillRequest> {
    Ok(WalletRefillRequest {
        id: row.try_get("id")?,
        wallet_type: parse_col(row, "wallet_type")?,
        wallet_address: row.try_get("wallet_address")?,
        chain: parse_col(row, "chain")?,
        reason: parse_col(row, "reason")?,
        status: parse_col(row, "status")?,
        created_at: ts_col(row, "created_at")?,
    })
}

fn settings_from_row(row: &SqliteRow) -> Result<GlobalSettings> {
    Ok(GlobalSettings {
        auto_arbitrage_enabled: row.try_get("auto_arbitrage_enabled")?,
        safe_mode_enabled: row.try_get("safe_mode_enabled")?,
        safe_mode_triggered_at: opt_ts_col(row, "safe_mode_triggered_at")?,
        safe_mode_reason: row.try_get("safe_mode_reason")?,
        max_global_daily_loss: parse_col(row, "max_global_daily_loss")?,
        max_global_trades_per_day: u32_col(row, "max_global_trades_per_day")?,
    })
}

fn cycle_log_from_row(row: &SqliteRow) -> Result<AutomationCycleLog> {
    Ok(AutomationCycleLog {
        id: row.try_get("id")?,
        cycle_started_at: ts_col(row, "cycle_started_at")?,
        cycle_finished_at: opt_ts_col(row, "cycle_finished_at")?,
        trigger_type: parse_col(row, "trigger_type")?,
        overall_status: parse_col(row, "overall_status")?,
        scan: json_col(row, "scan_results")?,
        decision: opt_json_col(row, "decision_result")?,
        execution: opt_json_col(row, "execution_result")?,
        wallet_check: opt_json_col(row, "wallet_check_result")?,
        error_message: row.try_get("error_message")?,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the status tables. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `database_url` and apply
    /// the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {database_url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(database_url, "Database ready");
        Ok(store)
    }

    /// Private in-memory database. A single pooled connection that never
    /// expires, otherwise each new connection would see an empty schema.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }

    // ----- Strategies -----

    pub async fn upsert_strategy(&self, s: &Strategy) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO strategies (
                id, name, chain, network, venue_a, venue_b, token_in, token_out,
                token_via, token_in_decimals, notional, scan_mode, is_enabled,
                is_auto_enabled, purpose_general_profit, purpose_fee_payer_refill,
                purpose_ops_wallet_refill, min_expected_profit, min_profit_to_gas_ratio,
                max_daily_loss, max_trades_per_day, max_trade_value, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                chain = excluded.chain,
                network = excluded.network,
                venue_a = excluded.venue_a,
                venue_b = excluded.venue_b,
                token_in = excluded.token_in,
                token_out = excluded.token_out,
                token_via = excluded.token_via,
                token_in_decimals = excluded.token_in_decimals,
                notional = excluded.notional,
                scan_mode = excluded.scan_mode,
                is_enabled = excluded.is_enabled,
                is_auto_enabled = excluded.is_auto_enabled,
                purpose_general_profit = excluded.purpose_general_profit,
                purpose_fee_payer_refill = excluded.purpose_fee_payer_refill,
                purpose_ops_wallet_refill = excluded.purpose_ops_wallet_refill,
                min_expected_profit = excluded.min_expected_profit,
                min_profit_to_gas_ratio = excluded.min_profit_to_gas_ratio,
                max_daily_loss = excluded.max_daily_loss,
                max_trades_per_day = excluded.max_trades_per_day,
                max_trade_value = excluded.max_trade_value,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&s.id)
        .bind(&s.name)
        .bind(s.chain.as_str())
        .bind(s.network.as_str())
        .bind(&s.venue_a)
        .bind(&s.venue_b)
        .bind(&s.token_in)
        .bind(&s.token_out)
        .bind(&s.token_via)
        .bind(i64::from(s.token_in_decimals))
        .bind(s.notional.to_string())
        .bind(s.scan_mode.as_str())
        .bind(s.is_enabled)
        .bind(s.is_auto_enabled)
        .bind(s.purpose.general_profit)
        .bind(s.purpose.fee_payer_refill)
        .bind(s.purpose.ops_wallet_refill)
        .bind(s.min_expected_profit.to_string())
        .bind(s.min_profit_to_gas_ratio.to_string())
        .bind(s.max_daily_loss.to_string())
        .bind(i64::from(s.max_trades_per_day))
        .bind(s.max_trade_value.map(|v| v.to_string()))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert strategy {}", s.id))?;
        Ok(())
    }

    pub async fn strategies(&self) -> Result<Vec<Strategy>> {
        let rows = sqlx::query("SELECT * FROM strategies ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load strategies")?;
        rows.iter().map(strategy_from_row).collect()
    }

    pub async fn strategy(&self, id: &str) -> Result<Option<Strategy>> {
        let row = sqlx::query("SELECT * FROM strategies WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load strategy {id}"))?;
        row.as_ref().map(strategy_from_row).transpose()
    }

    // ----- Runs -----

    pub async fn insert_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO runs (
                id, strategy_id, batch_id, chain, scan_mode, status, verdict,
                token_path, source_path, notional, final_output, estimated_profit,
                estimated_gas_cost, actual_profit, approved_for_auto_execution,
                auto_executed, purpose, error_message, tx_reference, started_at,
                finished_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                    ?16, ?17, ?18, ?19, ?20, ?21)
            ",
        )
        .bind(&run.id)
        .bind(&run.strategy_id)
        .bind(&run.batch_id)
        .bind(run.chain.as_str())
        .bind(run.scan_mode.as_str())
        .bind(run.status.as_str())
        .bind(run.verdict.as_str())
        .bind(to_json(&run.token_path)?)
        .bind(to_json(&run.source_path)?)
        .bind(run.notional.to_string())
        .bind(run.final_output.map(|v| v.to_string()))
        .bind(run.estimated_profit.to_string())
        .bind(run.estimated_gas_cost.to_string())
        .bind(run.actual_profit.map(|v| v.to_string()))
        .bind(run.approved_for_auto_execution)
        .bind(run.auto_executed)
        .bind(run.purpose.as_str())
        .bind(&run.error_message)
        .bind(&run.tx_reference)
        .bind(run.started_at.timestamp_millis())
        .bind(run.finished_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert run {}", run.id))?;
        Ok(())
    }

    pub async fn run(&self, id: &str) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load run {id}"))?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Runs of one batch, in creation order.
    pub async fn runs_for_batch(&self, batch_id: &str) -> Result<Vec<Run>> {
        let rows = sqlx::query("SELECT * FROM runs WHERE batch_id = ?1 ORDER BY rowid")
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to load runs for batch {batch_id}"))?;
        rows.iter().map(run_from_row).collect()
    }

    /// Approved, still-SIMULATED runs of one batch, in creation order.
    pub async fn approved_runs(&self, batch_id: &str) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM runs
            WHERE batch_id = ?1 AND status = 'SIMULATED' AND approved_for_auto_execution = 1
            ORDER BY rowid
            ",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load approved runs for batch {batch_id}"))?;
        rows.iter().map(run_from_row).collect()
    }

    /// Batch id of the most recently created run.
    pub async fn latest_batch_id(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT batch_id FROM runs ORDER BY rowid DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load latest batch id")?;
        row.map(|r| r.try_get::<String, _>("batch_id"))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<Run>> {
        let rows = sqlx::query("SELECT * FROM runs ORDER BY rowid DESC LIMIT ?1")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to load recent runs")?;
        rows.iter().map(run_from_row).collect()
    }

    /// Set the approval flag. Terminal runs are left untouched; returns
    /// whether a row changed.
    pub async fn set_approval(&self, run_id: &str, approved: bool) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE runs SET approved_for_auto_execution = ?2
            WHERE id = ?1 AND status = 'SIMULATED'
            ",
        )
        .bind(run_id)
        .bind(approved)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update approval for run {run_id}"))?;
        Ok(result.rows_affected() == 1)
    }

    /// Persist a run's terminal transition and charge its strategy's daily
    /// counter in one transaction. Only a SIMULATED row can be settled;
    /// returns `None`, with nothing written, if the row was already terminal.
    /// A failed run still consumes one trade of the daily budget.
    pub async fn settle_run_and_record(
        &self,
        run: &Run,
        date: NaiveDate,
    ) -> Result<Option<DailyRiskCounter>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let result = sqlx::query(
            r"
            UPDATE runs SET
                status = ?2,
                actual_profit = ?3,
                tx_reference = ?4,
                error_message = ?5,
                auto_executed = ?6,
                finished_at = ?7
            WHERE id = ?1 AND status = 'SIMULATED'
            ",
        )
        .bind(&run.id)
        .bind(run.status.as_str())
        .bind(run.actual_profit.map(|v| v.to_string()))
        .bind(&run.tx_reference)
        .bind(&run.error_message)
        .bind(run.auto_executed)
        .bind(run.finished_at.map(|t| t.timestamp_millis()))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to settle run {}", run.id))?;

        if result.rows_affected() != 1 {
            warn!(run_id = %run.id, "Refused to rewrite a terminal run");
            return Ok(None);
        }

        let settled_profit = match run.status {
            RunStatus::Executed => run.actual_profit,
            _ => None,
        };
        let delta = DailyRiskCounter::attempt(&run.strategy_id, date, run.chain, settled_profit);
        let counter = increment_counter(&mut *tx, &delta)
            .await
            .with_context(|| format!("Failed to charge daily counter for run {}", run.id))?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit settlement of run {}", run.id))?;

        debug!(
            run_id = %run.id,
            strategy_id = %counter.strategy_id,
            trades = counter.total_trades,
            pnl = %counter.total_pnl,
            loss = %counter.total_loss,
            "Run settled, daily counter updated"
        );
        Ok(Some(counter))
    }

    // ----- Daily risk counters -----

    pub async fn counter(
        &self,
        strategy_id: &str,
        date: NaiveDate,
        chain: Chain,
    ) -> Result<DailyRiskCounter> {
        let row = sqlx::query(
            "SELECT * FROM daily_risk_counters WHERE strategy_id = ?1 AND date = ?2 AND chain = ?3",
        )
        .bind(strategy_id)
        .bind(date_key(date))
        .bind(chain.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load counter for {strategy_id}"))?;

        match row {
            Some(row) => counter_from_row(&row),
            None => Ok(DailyRiskCounter::empty(strategy_id, date, chain)),
        }
    }

    pub async fn counters_for_date(&self, date: NaiveDate) -> Result<Vec<DailyRiskCounter>> {
        let rows = sqlx::query("SELECT * FROM daily_risk_counters WHERE date = ?1")
            .bind(date_key(date))
            .fetch_all(&self.pool)
            .await
            .context("Failed to load daily counters")?;
        rows.iter().map(counter_from_row).collect()
    }

    /// Loss across every strategy and chain for `date`.
    pub async fn global_daily_loss(&self, date: NaiveDate) -> Result<Decimal> {
        let units: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_loss_units), 0) FROM daily_risk_counters WHERE date = ?1",
        )
        .bind(date_key(date))
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum daily losses")?;
        Ok(from_units(units))
    }

    /// Trades across every strategy and chain for `date`.
    pub async fn global_daily_trades(&self, date: NaiveDate) -> Result<u32> {
        let counters = self.counters_for_date(date).await?;
        Ok(counters.iter().map(|c| c.total_trades).sum())
    }

    // ----- Global settings -----

    /// Insert the settings row if it does not exist yet. An existing row
    /// (possibly in safe mode) is never overwritten.
    pub async fn seed_settings(&self, settings: &GlobalSettings) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO global_settings (
                id, auto_arbitrage_enabled, safe_mode_enabled, safe_mode_triggered_at,
                safe_mode_reason, max_global_daily_loss, max_global_trades_per_day
            )
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(settings.auto_arbitrage_enabled)
        .bind(settings.safe_mode_enabled)
        .bind(settings.safe_mode_triggered_at.map(|t| t.timestamp_millis()))
        .bind(&settings.safe_mode_reason)
        .bind(settings.max_global_daily_loss.to_string())
        .bind(i64::from(settings.max_global_trades_per_day))
        .execute(&self.pool)
        .await
        .context("Failed to seed global settings")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn settings(&self) -> Result<GlobalSettings> {
        let row = sqlx::query("SELECT * FROM global_settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load global settings")?;
        match row {
            Some(row) => settings_from_row(&row),
            None => Err(FerryError::Config("global settings have not been seeded".into()).into()),
        }
    }

    pub async fn set_auto_arbitrage(&self, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE global_settings SET auto_arbitrage_enabled = ?1 WHERE id = 1")
            .bind(enabled)
            .execute(&self.pool)
            .await
            .context("Failed to update auto-arbitrage switch")?;
        Ok(())
    }

    pub async fn set_global_limits(&self, max_daily_loss: Decimal, max_trades: u32) -> Result<()> {
        sqlx::query(
            r"
            UPDATE global_settings
            SET max_global_daily_loss = ?1, max_global_trades_per_day = ?2
            WHERE id = 1
            ",
        )
        .bind(max_daily_loss.to_string())
        .bind(i64::from(max_trades))
        .execute(&self.pool)
        .await
        .context("Failed to update global limits")?;
        Ok(())
    }

    pub async fn trip_safe_mode(&self, trip: &SafeModeTrip) -> Result<()> {
        sqlx::query(
            r"
            UPDATE global_settings
            SET safe_mode_enabled = 1, safe_mode_triggered_at = ?1, safe_mode_reason = ?2
            WHERE id = 1
            ",
        )
        .bind(trip.triggered_at.timestamp_millis())
        .bind(&trip.reason)
        .execute(&self.pool)
        .await
        .context("Failed to persist safe-mode trip")?;
        Ok(())
    }

    /// Operator action. Returns whether safe mode was on.
    pub async fn clear_safe_mode(&self) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE global_settings
            SET safe_mode_enabled = 0, safe_mode_triggered_at = NULL, safe_mode_reason = NULL
            WHERE id = 1 AND safe_mode_enabled = 1
            ",
        )
        .execute(&self.pool)
        .await
        .context("Failed to clear safe mode")?;
        Ok(result.rows_affected() == 1)
    }

    // ----- Wallets -----

    /// Insert or update a wallet's configuration. Observed balance and
    /// health survive the update.
    pub async fn upsert_wallet(&self, w: &FeePayerWallet) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO fee_payer_wallets (
                label, wallet_type, chain, address, low_threshold, critical_threshold, is_active
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(label) DO UPDATE SET
                wallet_type = excluded.wallet_type,
                chain = excluded.chain,
                address = excluded.address,
                low_threshold = excluded.low_threshold,
                critical_threshold = excluded.critical_threshold,
                is_active = excluded.is_active
            ",
        )
        .bind(&w.label)
        .bind(w.wallet_type.as_str())
        .bind(w.chain.as_str())
        .bind(&w.address)
        .bind(w.low_threshold.to_string())
        .bind(w.critical_threshold.to_string())
        .bind(w.is_active)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert wallet {}", w.label))?;
        Ok(())
    }

    pub async fn wallets(&self) -> Result<Vec<FeePayerWallet>> {
        let rows = sqlx::query("SELECT * FROM fee_payer_wallets ORDER BY label")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load wallets")?;
        rows.iter().map(wallet_from_row).collect()
    }

    pub async fn active_wallets(&self) -> Result<Vec<FeePayerWallet>> {
        let rows = sqlx::query("SELECT * FROM fee_payer_wallets WHERE is_active = 1 ORDER BY label")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load active wallets")?;
        rows.iter().map(wallet_from_row).collect()
    }

    pub async fn record_wallet_check(
        &self,
        label: &str,
        balance: Decimal,
        health: WalletHealth,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE fee_payer_wallets
            SET last_balance = ?2, last_health = ?3, last_checked_at = ?4
            WHERE label = ?1
            ",
        )
        .bind(label)
        .bind(balance.to_string())
        .bind(health.as_str())
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record balance for wallet {label}"))?;
        Ok(())
    }

    // ----- Refill requests -----

    /// Insert a PENDING refill request unless one is already pending for the
    /// same wallet. Returns whether a row was created.
    pub async fn create_refill_request(&self, req: &WalletRefillRequest) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT OR IGNORE INTO wallet_refill_requests
                (id, wallet_type, wallet_address, chain, reason, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(&req.id)
        .bind(req.wallet_type.as_str())
        .bind(&req.wallet_address)
        .bind(req.chain.as_str())
        .bind(req.reason.as_str())
        .bind(req.status.as_str())
        .bind(req.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create refill request for {}", req.wallet_address))?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn refill_requests(&self, pending_only: bool, limit: u32) -> Result<Vec<WalletRefillRequest>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM wallet_refill_requests
            WHERE (?1 = 0 OR status = 'PENDING')
            ORDER BY rowid DESC
            LIMIT ?2
            ",
        )
        .bind(pending_only)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load refill requests")?;
        rows.iter().map(refill_from_row).collect()
    }

    // ----- Cycle logs -----

    pub async fn insert_cycle_log(&self, log: &AutomationCycleLog) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO automation_cycle_logs (
                id, cycle_started_at, cycle_finished_at, trigger_type, overall_status,
                scan_results, decision_result, execution_result, wallet_check_result,
                error_message
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(&log.id)
        .bind(log.cycle_started_at.timestamp_millis())
        .bind(log.cycle_finished_at.map(|t| t.timestamp_millis()))
        .bind(log.trigger_type.as_str())
        .bind(log.overall_status.as_str())
        .bind(to_json(&log.scan)?)
        .bind(log.decision.as_ref().map(to_json).transpose()?)
        .bind(log.execution.as_ref().map(to_json).transpose()?)
        .bind(log.wallet_check.as_ref().map(to_json).transpose()?)
        .bind(&log.error_message)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert cycle log {}", log.id))?;
        Ok(())
    }

    /// Rewrite a cycle log at a phase boundary. Finished logs are frozen.
    pub async fn update_cycle_log(&self, log: &AutomationCycleLog) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE automation_cycle_logs SET
                cycle_finished_at = ?2,
                overall_status = ?3,
                scan_results = ?4,
                decision_result = ?5,
                execution_result = ?6,
                wallet_check_result = ?7,
                error_message = ?8
            WHERE id = ?1 AND overall_status = 'RUNNING'
            ",
        )
        .bind(&log.id)
        .bind(log.cycle_finished_at.map(|t| t.timestamp_millis()))
        .bind(log.overall_status.as_str())
        .bind(to_json(&log.scan)?)
        .bind(log.decision.as_ref().map(to_json).transpose()?)
        .bind(log.execution.as_ref().map(to_json).transpose()?)
        .bind(log.wallet_check.as_ref().map(to_json).transpose()?)
        .bind(&log.error_message)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update cycle log {}", log.id))?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn cycle_log(&self, id: &str) -> Result<Option<AutomationCycleLog>> {
        let row = sqlx::query("SELECT * FROM automation_cycle_logs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load cycle log {id}"))?;
        row.as_ref().map(cycle_log_from_row).transpose()
    }

    pub async fn recent_cycle_logs(&self, limit: u32) -> Result<Vec<AutomationCycleLog>> {
        let rows = sqlx::query("SELECT * FROM automation_cycle_logs ORDER BY rowid DESC LIMIT ?1")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to load cycle logs")?;
        rows.iter().map(cycle_log_from_row).collect()
    }

    /// Close out logs left RUNNING by a holder that died. Only call this
    /// while holding the cycle lease.
    pub async fn fail_abandoned_cycles(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE automation_cycle_logs
            SET overall_status = 'FAILED',
                cycle_finished_at = ?1,
                error_message = 'cycle abandoned: lease expired before it finished'
            WHERE overall_status = 'RUNNING'
            ",
        )
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to close abandoned cycle logs")?;

        let closed = result.rows_affected();
        if closed > 0 {
            warn!(closed, "Marked abandoned cycle logs FAILED");
        }
        Ok(closed)
    }

    // ----- Lease -----

    /// Take the named lease for `holder` until `now + ttl`. An expired lease
    /// is taken over. Returns false if someone else holds it.
    pub async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO cycle_leases (name, holder, acquired_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE cycle_leases.expires_at <= excluded.acquired_at
            ",
        )
        .bind(name)
        .bind(holder)
        .bind(now.timestamp_millis())
        .bind((now + ttl).timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to acquire lease {name}"))?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_lease(&self, name: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM cycle_leases WHERE name = ?1 AND holder = ?2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to release lease {name}"))?;
        Ok(())
    }

    /// Current holder of an unexpired lease.
    pub async fn lease_holder(&self, name: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let row = sqlx::query("SELECT holder FROM cycle_leases WHERE name = ?1 AND expires_at > ?2")
            .bind(name)
            .bind(now.timestamp_millis())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read lease {name}"))?;
        row.map(|r| r.try_get::<String, _>("holder"))
            .transpose()
            .map_err(Into::into)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
