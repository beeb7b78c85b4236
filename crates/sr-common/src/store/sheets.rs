//! Google Sheets backend speaking the Sheets v4 values API.
//!
//! Row 1 of the tab is the header row. Rows are located by scanning column A,
//! so every lookup reads the whole tab.

use std::{path::PathBuf, sync::Arc, time::Duration, time::Instant};

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};
use yup_oauth2::authenticator::DefaultAuthenticator;

use crate::referral::{Referral, ReferralId};
use crate::store::timing::maybe_log_slow_call;
use crate::store::{row, Column, FieldUpdates, ReferralStore, StoreError};

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub tab: String,
    pub service_account_key: PathBuf,
    pub api_base: String,
}

#[derive(Debug, Error)]
pub enum SheetsSetupError {
    #[error("failed to load service account key: {0}")]
    KeyLoad(std::io::Error),
    #[error("failed to build service account authenticator: {0}")]
    Authenticator(std::io::Error),
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid sheets api base url: {0}")]
    ApiBase(String),
}

/// Supplies bearer tokens for Sheets API calls.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, String>;
}

/// Service-account tokens scoped to spreadsheets, refreshed by yup-oauth2.
pub struct ServiceAccountTokens {
    auth: DefaultAuthenticator,
}

impl ServiceAccountTokens {
    pub async fn from_key_file(path: &std::path::Path) -> Result<Self, SheetsSetupError> {
        let key = yup_oauth2::read_service_account_key(path)
            .await
            .map_err(SheetsSetupError::KeyLoad)?;
        let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(SheetsSetupError::Authenticator)?;

        Ok(Self { auth })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, String> {
        let token = self
            .auth
            .token(&[SPREADSHEETS_SCOPE])
            .await
            .map_err(|err| format!("oauth token request failed: {err}"))?;

        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| "oauth token response carried no access token".to_string())
    }
}

/// Fixed bearer token, for emulators and tests.
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((cut, _)) => &body[..cut],
        None => body,
    }
}

async fn ensure_success(response: Response) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(format!("sheets api returned {status}: {}", truncate(body.trim())))
}

/// A data row together with its 1-based sheet row number.
struct SheetRow {
    number: usize,
    cells: Vec<String>,
}

pub struct SheetsReferralStore {
    http: Client,
    tokens: Arc<dyn AccessTokenSource>,
    api_base: Url,
    spreadsheet_id: String,
    tab: String,
}

impl SheetsReferralStore {
    /// Builds a store authenticated with the configured service-account key.
    pub async fn connect(config: SheetsConfig) -> Result<Self, SheetsSetupError> {
        let tokens = ServiceAccountTokens::from_key_file(&config.service_account_key).await?;
        Self::with_token_source(config, Arc::new(tokens))
    }

    pub fn with_token_source(
        config: SheetsConfig,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, SheetsSetupError> {
        let api_base = Url::parse(&config.api_base)
            .map_err(|err| SheetsSetupError::ApiBase(format!("{}: {err}", config.api_base)))?;
        if api_base.cannot_be_a_base() {
            return Err(SheetsSetupError::ApiBase(config.api_base));
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            tokens,
            api_base,
            spreadsheet_id: config.spreadsheet_id,
            tab: config.tab,
        })
    }

    /// `'Tab'!A:X`, quoting the tab name the way the Sheets A1 grammar expects.
    fn tab_range(&self) -> String {
        format!(
            "{}!{}:{}",
            self.quoted_tab(),
            Column::ReferralId.letter(),
            Column::last().letter()
        )
    }

    fn quoted_tab(&self) -> String {
        format!("'{}'", self.tab.replace('\'', "''"))
    }

    fn cell_range(&self, column: Column, row_number: usize) -> String {
        format!("{}!{}{}", self.quoted_tab(), column.letter(), row_number)
    }

    fn endpoint(&self, tail: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()])
                .extend(tail);
        }
        url
    }

    async fn bearer(&self) -> Result<String, String> {
        self.tokens.access_token().await
    }

    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, StoreError> {
        let started = Instant::now();
        let token = self.bearer().await.map_err(StoreError::Read)?;
        let range = self.tab_range();

        let response = self
            .http
            .get(self.endpoint(&["values", &range]))
            .bearer_auth(token)
            .query(&[("majorDimension", "ROWS")])
            .send()
            .await
            .map_err(|err| StoreError::Read(err.to_string()))?;
        let response = ensure_success(response).await.map_err(StoreError::Read)?;
        let body: ValueRange = response
            .json()
            .await
            .map_err(|err| StoreError::Read(format!("unexpected values payload: {err}")))?;
        maybe_log_slow_call("sheets.values.get", started);

        Ok(body
            .values
            .into_iter()
            .map(|cells| cells.into_iter().map(cell_text).collect())
            .collect())
    }

    /// Data rows below the header, skipping rows with an empty id cell.
    async fn data_rows(&self) -> Result<Vec<SheetRow>, StoreError> {
        let rows = self.fetch_rows().await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .filter(|(_, cells)| !row::is_header(cells))
            .filter(|(_, cells)| cells.first().is_some_and(|id| !id.trim().is_empty()))
            .map(|(position, cells)| SheetRow {
                number: position + 1,
                cells,
            })
            .collect())
    }

    async fn locate(&self, id: &ReferralId) -> Result<SheetRow, StoreError> {
        self.data_rows()
            .await?
            .into_iter()
            .find(|row| matches_id(&row.cells, id))
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn append_cells(&self, cells: Vec<String>) -> Result<(), StoreError> {
        let started = Instant::now();
        let token = self.bearer().await.map_err(StoreError::Write)?;
        let action = format!("{}:append", self.tab_range());

        let response = self
            .http
            .post(self.endpoint(&["values", &action]))
            .bearer_auth(token)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [cells] }))
            .send()
            .await
            .map_err(|err| StoreError::Write(err.to_string()))?;
        ensure_success(response).await.map_err(StoreError::Write)?;
        maybe_log_slow_call("sheets.values.append", started);
        Ok(())
    }
}

fn matches_id(cells: &[String], id: &ReferralId) -> bool {
    cells
        .first()
        .is_some_and(|cell| cell.trim().eq_ignore_ascii_case(id.as_str()))
}

#[async_trait]
impl ReferralStore for SheetsReferralStore {
    fn backend(&self) -> &'static str {
        "sheets"
    }

    #[instrument(skip(self), fields(tab = %self.tab))]
    async fn list_all(&self) -> Result<Vec<Referral>, StoreError> {
        self.data_rows()
            .await?
            .into_iter()
            .map(|row| {
                row::decode(&row.cells).map_err(|reason| StoreError::Decode {
                    location: format!("{} row {}", self.tab, row.number),
                    reason,
                })
            })
            .collect()
    }

    #[instrument(skip(self, referral), fields(referral_id = %referral.referral_id))]
    async fn append(&self, referral: &Referral) -> Result<(), StoreError> {
        let rows = self.fetch_rows().await?;
        if rows.iter().any(|cells| matches_id(cells, &referral.referral_id)) {
            return Err(StoreError::DuplicateId(referral.referral_id.clone()));
        }

        if rows.is_empty() {
            info!(tab = %self.tab, "writing header row to empty sheet");
            self.append_cells(row::header()).await?;
        }

        self.append_cells(row::encode(referral)).await
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &ReferralId) -> Result<Referral, StoreError> {
        let row = self.locate(id).await?;
        row::decode(&row.cells).map_err(|reason| StoreError::Decode {
            location: format!("{} row {}", self.tab, row.number),
            reason,
        })
    }

    #[instrument(skip(self, fields), fields(columns = fields.len()))]
    async fn update_fields(
        &self,
        id: &ReferralId,
        fields: &FieldUpdates,
    ) -> Result<(), StoreError> {
        let row = self.locate(id).await?;
        if fields.is_empty() {
            return Ok(());
        }

        let data: Vec<Value> = fields
            .iter()
            .map(|(column, value)| {
                json!({
                    "range": self.cell_range(column, row.number),
                    "values": [[value]],
                })
            })
            .collect();

        let started = Instant::now();
        let token = self.bearer().await.map_err(StoreError::Write)?;
        let response = self
            .http
            .post(self.endpoint(&["values:batchUpdate"]))
            .bearer_auth(token)
            .json(&json!({ "valueInputOption": "RAW", "data": data }))
            .send()
            .await
            .map_err(|err| StoreError::Write(err.to_string()))?;
        ensure_success(response).await.map_err(StoreError::Write)?;
        maybe_log_slow_call("sheets.values.batchUpdate", started);

        debug!(row = row.number, "updated referral row");
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let token = self.bearer().await.map_err(StoreError::Read)?;
        let response = self
            .http
            .get(self.endpoint(&[]))
            .bearer_auth(token)
            .query(&[("fields", "spreadsheetId")])
            .send()
            .await
            .map_err(|err| StoreError::Read(err.to_string()))?;
        ensure_success(response).await.map_err(StoreError::Read)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(tab: &str) -> SheetsReferralStore {
        SheetsReferralStore::with_token_source(
            SheetsConfig {
                spreadsheet_id: "sheet-123".into(),
                tab: tab.into(),
                service_account_key: PathBuf::from("unused.json"),
                api_base: DEFAULT_API_BASE.into(),
            },
            Arc::new(StaticToken("token".into())),
        )
        .unwrap()
    }

    #[test]
    fn ranges_quote_tab_names() {
        let store = store("Bob's Referrals");
        assert_eq!(store.tab_range(), "'Bob''s Referrals'!A:X");
        assert_eq!(
            store.cell_range(Column::Status, 7),
            "'Bob''s Referrals'!P7"
        );
    }

    #[test]
    fn endpoint_encodes_range_segment() {
        let store = store("Referrals");
        let url = store.endpoint(&["values", "'Referrals'!A:X"]);
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/'Referrals'!A:X"
        );
    }

    #[test]
    fn rejects_unusable_api_base() {
        let result = SheetsReferralStore::with_token_source(
            SheetsConfig {
                spreadsheet_id: "id".into(),
                tab: "Referrals".into(),
                service_account_key: PathBuf::new(),
                api_base: "mailto:ops@example.com".into(),
            },
            Arc::new(StaticToken(String::new())),
        );
        assert!(matches!(result, Err(SheetsSetupError::ApiBase(_))));
    }

    #[test]
    fn non_string_cells_are_rendered_as_text() {
        assert_eq!(cell_text(json!(500)), "500");
        assert_eq!(cell_text(json!(true)), "true");
        assert_eq!(cell_text(Value::Null), "");
    }
}
