use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_postgres::types::ToSql;
use tracing::instrument;

use crate::db::util::TimedClientExt;
use crate::db::PgPool;
use crate::referral::{Referral, ReferralId};
use crate::store::{row, Column, ColumnKind, FieldUpdates, ReferralStore, StoreError};

const TABLE: &str = "referral.referrals";

fn select_columns() -> String {
    Column::ALL
        .iter()
        .map(|column| column.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parameter placeholder with the cast that turns the row encoding back into
/// the column's SQL type. Every parameter is bound as text; empty strings
/// become NULL for nullable typed columns.
fn placeholder(column: Column, position: usize) -> String {
    match column.kind() {
        ColumnKind::Text => format!("${position}::text"),
        ColumnKind::Timestamp => format!("${position}::text::timestamptz"),
        ColumnKind::Date => format!("NULLIF(${position}::text, '')::date"),
        ColumnKind::Integer => format!("NULLIF(${position}::text, '')::integer"),
        ColumnKind::Boolean => format!("${position}::text::boolean"),
    }
}

fn insert_statement() -> String {
    let values = Column::ALL
        .iter()
        .enumerate()
        .map(|(idx, column)| placeholder(*column, idx + 1))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {TABLE} ({}) VALUES ({values}) ON CONFLICT (referral_id) DO NOTHING",
        select_columns()
    )
}

fn update_statement(fields: &FieldUpdates) -> String {
    let assignments = fields
        .iter()
        .enumerate()
        .map(|(idx, (column, _))| format!("{} = {}", column.name(), placeholder(column, idx + 1)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {TABLE} SET {assignments} WHERE referral_id = ${}",
        fields.len() + 1
    )
}

/// Renders a typed row back into the text cells the row codec decodes, so
/// every backend shares one decoding path.
fn row_cells(pg_row: &tokio_postgres::Row) -> Result<Vec<String>, tokio_postgres::Error> {
    Column::ALL
        .iter()
        .map(|column| {
            let name = column.name();
            let cell = match column.kind() {
                ColumnKind::Text => pg_row.try_get::<_, String>(name)?,
                ColumnKind::Timestamp => {
                    row::encode_timestamp(&pg_row.try_get::<_, DateTime<Utc>>(name)?)
                }
                ColumnKind::Date => row::encode_date(pg_row.try_get::<_, Option<NaiveDate>>(name)?),
                ColumnKind::Integer => pg_row.try_get::<_, i32>(name)?.to_string(),
                ColumnKind::Boolean => row::encode_bool(pg_row.try_get::<_, bool>(name)?),
            };
            Ok(cell)
        })
        .collect()
}

fn decode_row(pg_row: &tokio_postgres::Row) -> Result<Referral, StoreError> {
    let cells = row_cells(pg_row).map_err(|err| StoreError::Read(err.to_string()))?;
    row::decode(&cells).map_err(|reason| StoreError::Decode {
        location: format!("{TABLE} {}", cells.first().map(String::as_str).unwrap_or("?")),
        reason,
    })
}

fn as_params(values: &[String]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|value| value as &(dyn ToSql + Sync)).collect()
}

/// Postgres backend over `referral.referrals`; stored order is insertion order.
#[derive(Clone)]
pub struct PgReferralStore {
    pool: PgPool,
}

impl PgReferralStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferralStore for PgReferralStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<Referral>, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|err| StoreError::Read(err.to_string()))?;
        let statement = format!("SELECT {} FROM {TABLE} ORDER BY seq", select_columns());
        let rows = client
            .timed_query(statement.as_str(), &[], "list_referrals")
            .await
            .map_err(|err| StoreError::Read(err.to_string()))?;

        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self, referral), fields(referral_id = %referral.referral_id))]
    async fn append(&self, referral: &Referral) -> Result<(), StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|err| StoreError::Write(err.to_string()))?;
        let cells = row::encode(referral);
        let inserted = client
            .timed_execute(insert_statement().as_str(), &as_params(&cells), "insert_referral")
            .await
            .map_err(|err| StoreError::Write(err.to_string()))?;

        if inserted == 0 {
            return Err(StoreError::DuplicateId(referral.referral_id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &ReferralId) -> Result<Referral, StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|err| StoreError::Read(err.to_string()))?;
        let statement = format!(
            "SELECT {} FROM {TABLE} WHERE referral_id = $1",
            select_columns()
        );
        let row = client
            .timed_query_opt(statement.as_str(), &[&id.as_str()], "find_referral")
            .await
            .map_err(|err| StoreError::Read(err.to_string()))?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        decode_row(&row)
    }

    #[instrument(skip(self, fields), fields(columns = fields.len()))]
    async fn update_fields(
        &self,
        id: &ReferralId,
        fields: &FieldUpdates,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return self.find_by_id(id).await.map(|_| ());
        }

        let client = self
            .pool
            .get()
            .await
            .map_err(|err| StoreError::Write(err.to_string()))?;

        let mut values: Vec<String> = fields.iter().map(|(_, value)| value.to_string()).collect();
        values.push(id.to_string());

        let updated = client
            .timed_execute(
                update_statement(fields).as_str(),
                &as_params(&values),
                "update_referral",
            )
            .await
            .map_err(|err| StoreError::Write(err.to_string()))?;

        if updated == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|err| StoreError::Read(err.to_string()))?;
        client
            .timed_execute("SELECT 1", &[], "ping")
            .await
            .map_err(|err| StoreError::Read(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_lists_every_column_with_casts() {
        let sql = insert_statement();
        assert!(sql.starts_with("INSERT INTO referral.referrals (referral_id, submitted_at,"));
        assert!(sql.contains("$2::text::timestamptz"));
        assert!(sql.contains("NULLIF($19::text, '')::date"));
        assert!(sql.contains("$24::text::boolean"));
        assert!(sql.ends_with("ON CONFLICT (referral_id) DO NOTHING"));
    }

    #[test]
    fn update_only_touches_named_columns() {
        let fields = FieldUpdates::new()
            .set(Column::Status, "Hired")
            .set(Column::HireDate, "2024-01-01");

        assert_eq!(
            update_statement(&fields),
            "UPDATE referral.referrals SET status = $1::text, \
             hire_date = NULLIF($2::text, '')::date WHERE referral_id = $3"
        );
    }
}
