use sqlx::PgPool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, SchemaError>;

/// Database schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize database schema
pub async fn initialize_schema(pool: &PgPool) -> Result<()> {
    // Account balances and referral relation (owned by the account service)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL DEFAULT '',
            referred_by TEXT REFERENCES accounts(id),
            demo DOUBLE PRECISION NOT NULL DEFAULT 10000,
            deposit DOUBLE PRECISION NOT NULL DEFAULT 0,
            balance DOUBLE PRECISION NOT NULL DEFAULT 0,
            bonus DOUBLE PRECISION NOT NULL DEFAULT 0,
            affiliate_earnings DOUBLE PRECISION NOT NULL DEFAULT 0,
            is_affiliate BOOLEAN NOT NULL DEFAULT false,
            cpa DOUBLE PRECISION NOT NULL DEFAULT 0,
            revenue_share_percent DOUBLE PRECISION NOT NULL DEFAULT 0,
            percent_per_deposit DOUBLE PRECISION NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_accounts_referred_by ON accounts(referred_by)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS wagers (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(id),
            instrument TEXT NOT NULL,
            interval TEXT NOT NULL,
            direction TEXT NOT NULL,
            stake DOUBLE PRECISION NOT NULL CHECK (stake > 0),
            entry_price DOUBLE PRECISION NOT NULL,
            exit_price DOUBLE PRECISION,
            status TEXT NOT NULL,
            settlement_amount DOUBLE PRECISION NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            matures_at TIMESTAMPTZ NOT NULL,
            is_demo BOOLEAN NOT NULL,
            finished BOOLEAN NOT NULL DEFAULT false,
            settled_via TEXT,
            settled_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Due-wager scan only touches unfinished rows
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_wagers_due ON wagers(matures_at) WHERE finished = false")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_wagers_account ON wagers(account_id, finished)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS commission_ledger (
            id TEXT PRIMARY KEY,
            beneficiary_account_id TEXT NOT NULL,
            source_account_id TEXT NOT NULL,
            operation_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            base_amount DOUBLE PRECISION NOT NULL,
            paid_amount DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_ledger_beneficiary ON commission_ledger(beneficiary_account_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settlement_outbox (
            position BIGSERIAL PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            operation_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            effect TEXT NOT NULL,
            enqueued_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Retry bookkeeping (added in version 2)
    for column in [
        "attempts INTEGER NOT NULL DEFAULT 0",
        "next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT NOW()",
        "last_error TEXT",
        "dead_at TIMESTAMPTZ",
    ] {
        sqlx::query(&format!("ALTER TABLE settlement_outbox ADD COLUMN IF NOT EXISTS {}", column))
            .execute(pool)
            .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_outbox_live ON settlement_outbox(operation_id, sequence) WHERE dead_at IS NULL",
    )
    .execute(pool)
    .await?;

    // Wallet effects already applied, written in the same transaction as the balance change
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS applied_effects (
            effect_key TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            balance_class TEXT NOT NULL,
            amount DOUBLE PRECISION NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deposit_transactions (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(id),
            amount DOUBLE PRECISION NOT NULL,
            bonus DOUBLE PRECISION NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_deposits_account ON deposit_transactions(account_id, status)")
        .execute(pool)
        .await?;

    // Create schema version table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO schema_version (version, applied_at) VALUES ($1, NOW()) ON CONFLICT DO NOTHING",
    )
    .bind(SCHEMA_VERSION)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get current schema version
pub async fn get_schema_version(pool: &PgPool) -> Result<Option<i32>> {
    let row = sqlx::query_as::<_, (i32,)>("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(version,)| version))
}
