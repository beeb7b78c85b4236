use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;
use tracing::{info, instrument};

use crate::db::PgPool;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to run migration: {0}")]
    Postgres(#[from] PgError),
}

struct Migration {
    id: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        description: "referrals table",
        sql: r#"
CREATE TABLE IF NOT EXISTS referral.referrals (
    seq BIGSERIAL NOT NULL,
    referral_id TEXT PRIMARY KEY,
    submitted_at TIMESTAMPTZ NOT NULL,
    referrer_name TEXT NOT NULL DEFAULT '',
    referrer_email TEXT NOT NULL DEFAULT '',
    referrer_school TEXT NOT NULL DEFAULT '',
    candidate_name TEXT NOT NULL DEFAULT '',
    candidate_email TEXT NOT NULL DEFAULT '',
    candidate_phone TEXT NOT NULL DEFAULT '',
    position TEXT NOT NULL DEFAULT '',
    position_type TEXT NOT NULL DEFAULT '',
    role_fit TEXT NOT NULL DEFAULT '',
    bonus_amount INTEGER NOT NULL DEFAULT 0,
    relationship TEXT NOT NULL DEFAULT '',
    already_applied TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    status_updated_at TIMESTAMPTZ NOT NULL,
    status_updated_by TEXT NOT NULL DEFAULT '',
    hire_date DATE,
    sixty_day_date DATE,
    payout_month TEXT NOT NULL DEFAULT '',
    paid_date DATE,
    admin_notes TEXT NOT NULL DEFAULT '',
    is_archived BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_referrals_seq ON referral.referrals(seq);
CREATE INDEX IF NOT EXISTS idx_referrals_referrer_email
    ON referral.referrals(referrer_email);
"#,
    },
    Migration {
        id: 2,
        description: "bonus amount range check",
        sql: r#"
DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM pg_constraint WHERE conname = 'chk_referrals_bonus_amount'
    ) THEN
        ALTER TABLE referral.referrals
            ADD CONSTRAINT chk_referrals_bonus_amount CHECK (bonus_amount >= 0);
    END IF;
END $$;
"#,
    },
];

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;
    client
        .batch_execute(
            "CREATE SCHEMA IF NOT EXISTS referral;
             CREATE TABLE IF NOT EXISTS referral.schema_migrations (
                id INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
        )
        .await?;

    for migration in MIGRATIONS {
        let already_applied: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM referral.schema_migrations WHERE id = $1)",
                &[&migration.id],
            )
            .await?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO referral.schema_migrations (id, description) VALUES ($1, $2)",
            &[&migration.id, &migration.description],
        )
        .await?;
        tx.commit().await?;

        info!(
            id = migration.id,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_ids_are_strictly_increasing() {
        let ids: Vec<i32> = MIGRATIONS.iter().map(|m| m.id).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "{ids:?}");
    }

    #[test]
    fn referrals_table_has_every_column() {
        let ddl = MIGRATIONS[0].sql;
        for column in crate::store::Column::ALL {
            assert!(ddl.contains(&format!("    {} ", column.name())), "{}", column.name());
        }
    }
}
