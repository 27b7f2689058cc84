// Remote spreadsheet backend (Google Sheets values API)

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::credentials::TokenSource;
use crate::error::ApiError;
use crate::resilient::ResilientClient;

/// Row-oriented access to the remote sheet. Rows are plain strings in the
/// order of `LEDGER_HEADER`.
#[async_trait]
pub trait RemoteSheet: Send + Sync {
    async fn append_row(&self, row: Vec<String>) -> Result<(), ApiError>;

    /// All rows in insertion order, header included.
    async fn read_rows(&self) -> Result<Vec<Vec<String>>, ApiError>;
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

pub struct GoogleSheet {
    client: ResilientClient,
    base_url: String,
    sheet_id: String,
    range: String,
    tokens: Arc<dyn TokenSource>,
}

impl GoogleSheet {
    pub fn new(
        client: ResilientClient,
        base_url: &str,
        sheet_id: &str,
        range: &str,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        GoogleSheet {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sheet_id: sheet_id.to_string(),
            range: range.to_string(),
            tokens,
        }
    }

    fn values_url(&self) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.base_url,
            self.sheet_id,
            urlencoding::encode(&self.range)
        )
    }
}

#[async_trait]
impl RemoteSheet for GoogleSheet {
    async fn append_row(&self, row: Vec<String>) -> Result<(), ApiError> {
        let token = self.tokens.bearer().await?;
        let url = format!("{}:append", self.values_url());
        let body = serde_json::json!({ "values": [row] });

        self.client
            .send("spreadsheet", |http| {
                http.post(&url)
                    .bearer_auth(&token)
                    .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
                    .json(&body)
            })
            .await?;

        Ok(())
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>, ApiError> {
        let token = self.tokens.bearer().await?;
        let url = self.values_url();

        let range: ValueRange = self
            .client
            .send_json("spreadsheet", |http| {
                http.get(&url)
                    .bearer_auth(&token)
                    .query(&[("valueRenderOption", "UNFORMATTED_VALUE")])
            })
            .await?;

        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }
}

fn cell_to_string(cell: serde_json::Value) -> String {
    match cell {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
