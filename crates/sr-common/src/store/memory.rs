use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::referral::{Referral, ReferralId};
use crate::store::{row, FieldUpdates, ReferralStore, StoreError};

/// Process-local store for development and tests. Rows are kept in their
/// encoded form so updates go through the same codec as the remote backends.
#[derive(Debug, Default)]
pub struct MemoryReferralStore {
    rows: RwLock<Vec<Vec<String>>>,
}

impl MemoryReferralStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_referrals(referrals: impl IntoIterator<Item = Referral>) -> Self {
        let rows = referrals.into_iter().map(|r| row::encode(&r)).collect();
        Self {
            rows: RwLock::new(rows),
        }
    }
}

fn decode_at(position: usize, cells: &[String]) -> Result<Referral, StoreError> {
    row::decode(cells).map_err(|reason| StoreError::Decode {
        location: format!("row {}", position + 1),
        reason,
    })
}

fn matches_id(cells: &[String], id: &ReferralId) -> bool {
    cells
        .first()
        .is_some_and(|cell| cell.trim().eq_ignore_ascii_case(id.as_str()))
}

#[async_trait]
impl ReferralStore for MemoryReferralStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn list_all(&self) -> Result<Vec<Referral>, StoreError> {
        let rows = self.rows.read().await;
        rows.iter()
            .enumerate()
            .map(|(position, cells)| decode_at(position, cells))
            .collect()
    }

    async fn append(&self, referral: &Referral) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|cells| matches_id(cells, &referral.referral_id)) {
            return Err(StoreError::DuplicateId(referral.referral_id.clone()));
        }

        rows.push(row::encode(referral));
        Ok(())
    }

    async fn find_by_id(&self, id: &ReferralId) -> Result<Referral, StoreError> {
        let rows = self.rows.read().await;
        rows.iter()
            .enumerate()
            .find(|(_, cells)| matches_id(cells, id))
            .map(|(position, cells)| decode_at(position, cells))
            .unwrap_or_else(|| Err(StoreError::NotFound(id.clone())))
    }

    async fn update_fields(
        &self,
        id: &ReferralId,
        fields: &FieldUpdates,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let cells = rows
            .iter_mut()
            .find(|cells| matches_id(cells, id))
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let mut updated = cells.clone();
        updated.resize(crate::store::Column::ALL.len(), String::new());
        for (column, value) in fields.iter() {
            updated[column.index()] = value.to_string();
        }

        // Reject writes that would leave an undecodable row behind.
        row::decode(&updated).map_err(StoreError::Write)?;
        *cells = updated;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
