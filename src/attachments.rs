// Attachment Store - receipt photos on Google Drive
// Upload, then name/folder metadata, then a public reader permission.
// Only the upload itself is essential; the other two steps are best effort.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::credentials::TokenSource;
use crate::error::ApiError;
use crate::resilient::ResilientClient;
use crate::transaction::AttachmentReference;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentOutcome {
    Stored(AttachmentReference),
    /// The photo could not be stored; the transaction is recorded without it.
    Degraded { reason: String },
}

impl AttachmentOutcome {
    pub fn reference(self) -> Option<AttachmentReference> {
        match self {
            AttachmentOutcome::Stored(reference) => Some(reference),
            AttachmentOutcome::Degraded { .. } => None,
        }
    }
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> AttachmentOutcome;
}

/// Public view link for a stored file
pub fn view_url(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/view")
}

fn content_type_for(filename: &str) -> &'static str {
    let lower = filename.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".pdf") {
        "application/pdf"
    } else {
        "image/jpeg"
    }
}

// ============================================================================
// GOOGLE DRIVE
// ============================================================================

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

pub struct DriveStore {
    client: ResilientClient,
    api_base: String,
    upload_base: String,
    folder_id: Option<String>,
    tokens: Arc<dyn TokenSource>,
}

impl DriveStore {
    pub fn new(
        client: ResilientClient,
        api_base: &str,
        upload_base: &str,
        folder_id: Option<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        DriveStore {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
            folder_id,
            tokens,
        }
    }

    async fn upload_media(&self, token: &str, bytes: &[u8], filename: &str) -> Result<String, ApiError> {
        let url = format!("{}/files", self.upload_base);
        let content_type = content_type_for(filename);

        let file: UploadedFile = self
            .client
            .send_json("file-storage", |http| {
                http.post(&url)
                    .bearer_auth(token)
                    .query(&[("uploadType", "media")])
                    .header(reqwest::header::CONTENT_TYPE, content_type)
                    .body(bytes.to_vec())
            })
            .await?;

        Ok(file.id)
    }

    async fn set_metadata(&self, token: &str, file_id: &str, filename: &str) -> Result<(), ApiError> {
        let url = format!("{}/files/{}", self.api_base, file_id);
        let body = serde_json::json!({ "name": filename });

        self.client
            .send("file-storage", |http| {
                let request = http.patch(&url).bearer_auth(token).json(&body);
                match &self.folder_id {
                    Some(folder) => request.query(&[("addParents", folder.as_str())]),
                    None => request,
                }
            })
            .await?;

        Ok(())
    }

    async fn share_publicly(&self, token: &str, file_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/files/{}/permissions", self.api_base, file_id);
        let body = serde_json::json!({ "role": "reader", "type": "anyone" });

        self.client
            .send("file-storage", |http| http.post(&url).bearer_auth(token).json(&body))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl AttachmentStore for DriveStore {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> AttachmentOutcome {
        let token = match self.tokens.bearer().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "No file storage token; attachment not stored");
                return AttachmentOutcome::Degraded { reason: e.to_string() };
            }
        };

        let file_id = match self.upload_media(&token, &bytes, filename).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(filename, error = %e, "Attachment upload failed");
                return AttachmentOutcome::Degraded { reason: e.to_string() };
            }
        };

        if let Err(e) = self.set_metadata(&token, &file_id, filename).await {
            tracing::warn!(file_id = %file_id, error = %e, "Could not set attachment name/folder");
        }
        if let Err(e) = self.share_publicly(&token, &file_id).await {
            tracing::warn!(file_id = %file_id, error = %e, "Could not share attachment");
        }

        tracing::info!(file_id = %file_id, filename, "Attachment stored");
        AttachmentOutcome::Stored(AttachmentReference {
            url: view_url(&file_id),
            file_id,
        })
    }
}
