// Bearer tokens for the spreadsheet and file storage APIs
// Minting tokens for the service account happens outside the bot; the
// credentials file is re-read on every call so an external refresher can
// rotate it in place.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ApiError;

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer(&self) -> Result<String, ApiError>;
}

#[derive(Deserialize)]
struct CredentialsFile {
    access_token: Option<String>,
    client_email: Option<String>,
}

/// Reads `access_token` from a JSON credentials file.
pub struct FileTokenSource {
    path: PathBuf,
}

impl FileTokenSource {
    /// Open and validate the credentials file once; a missing or tokenless
    /// file is a startup error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file: {:?}", path))?;
        let parsed: CredentialsFile =
            serde_json::from_str(&content).context("Failed to parse credentials JSON")?;

        if parsed.access_token.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("Credentials file {:?} has no access_token", path);
        }
        if let Some(email) = parsed.client_email {
            tracing::info!(account = %email, "Loaded service account credentials");
        }

        Ok(FileTokenSource {
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl TokenSource for FileTokenSource {
    async fn bearer(&self) -> Result<String, ApiError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ApiError::Decode(format!("credentials unreadable: {e}")))?;
        let parsed: CredentialsFile = serde_json::from_str(&content)
            .map_err(|e| ApiError::Decode(format!("credentials malformed: {e}")))?;

        parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Decode("credentials have no access_token".to_string()))
    }
}

/// Fixed token, for tests and short-lived tools.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn bearer(&self) -> Result<String, ApiError> {
        Ok(self.0.clone())
    }
}
