// Configuration - built once at startup and passed to every component
// Values come from the environment (a `.env` file is loaded when present)

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use std::path::PathBuf;
use std::time::Duration;

use crate::resilient::RetryPolicy;

// ============================================================================
// ALLOW-LIST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Principal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub phone: String,
    pub role: Role,
}

/// Who receives a scheduled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    AdminOnly,
    Both,
}

/// The two phone numbers allowed to talk to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    admin: SenderIdentity,
    principal: SenderIdentity,
}

impl AllowList {
    pub fn new(admin: &str, principal: &str) -> Self {
        AllowList {
            admin: SenderIdentity {
                phone: normalize_phone(admin),
                role: Role::Admin,
            },
            principal: SenderIdentity {
                phone: normalize_phone(principal),
                role: Role::Principal,
            },
        }
    }

    /// Identity for `phone`, if allowed. `phone` is normalized first; a
    /// number with no digits never matches.
    pub fn authorize(&self, phone: &str) -> Option<&SenderIdentity> {
        let phone = normalize_phone(phone);
        if phone.is_empty() {
            return None;
        }
        [&self.admin, &self.principal]
            .into_iter()
            .find(|identity| identity.phone == phone)
    }

    pub fn admin(&self) -> &SenderIdentity {
        &self.admin
    }

    pub fn principal(&self) -> &SenderIdentity {
        &self.principal
    }

    /// Principal first, then admin.
    pub fn recipients(&self, audience: Audience) -> Vec<&SenderIdentity> {
        match audience {
            Audience::AdminOnly => vec![&self.admin],
            Audience::Both => vec![&self.principal, &self.admin],
        }
    }
}

/// Strip formatting and rewrite the local `0` prefix to the `62` country code.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.strip_prefix('0') {
        Some(rest) => format!("62{rest}"),
        None => digits,
    }
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// Base URLs of the external services (overridable for tests and proxies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub gateway_send: String,
    pub gemini_base: String,
    pub sheets_base: String,
    pub drive_base: String,
    pub drive_upload_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            gateway_send: "https://api.fonnte.com/send".to_string(),
            gemini_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            sheets_base: "https://sheets.googleapis.com/v4".to_string(),
            drive_base: "https://www.googleapis.com/drive/v3".to_string(),
            drive_upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub gateway_token: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub allow_list: AllowList,
    pub sheet_id: String,
    /// A1 range rows are appended to, e.g. `Transaksi!A:K`
    pub sheet_range: String,
    pub credentials_path: PathBuf,
    pub drive_folder_id: Option<String>,
    pub bind_address: String,
    pub mirror_path: PathBuf,
    pub backup_dir: PathBuf,
    pub journal_path: PathBuf,
    pub utc_offset: FixedOffset,
    pub retry: RetryPolicy,
    pub endpoints: Endpoints,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (silently ignored if missing)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| anyhow!("Missing {key} - set it in .env or as an environment variable"))
        };

        let offset_hours: i32 = get("UTC_OFFSET_HOURS")
            .map(|v| v.parse::<i32>().with_context(|| format!("UTC_OFFSET_HOURS is not an integer: {v}")))
            .transpose()?
            .unwrap_or(7);
        let utc_offset = FixedOffset::east_opt(offset_hours * 3600)
            .ok_or_else(|| anyhow!("UTC_OFFSET_HOURS out of range: {offset_hours}"))?;

        let mut retry = RetryPolicy::default();
        if let Some(ms) = get("RETRY_DELAY_MS") {
            let ms: u64 = ms.parse().with_context(|| format!("RETRY_DELAY_MS is not a number: {ms}"))?;
            retry.delay = Duration::from_millis(ms);
        }

        let defaults = Endpoints::default();
        let endpoints = Endpoints {
            gateway_send: get("GATEWAY_SEND_URL").unwrap_or(defaults.gateway_send),
            gemini_base: get("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base),
            sheets_base: get("SHEETS_BASE_URL").unwrap_or(defaults.sheets_base),
            drive_base: get("DRIVE_BASE_URL").unwrap_or(defaults.drive_base),
            drive_upload_base: get("DRIVE_UPLOAD_BASE_URL").unwrap_or(defaults.drive_upload_base),
        };

        let admin = require("ADMIN")?;
        let principal = require("BOS")?;
        let allow_list = AllowList::new(&admin, &principal);
        for (key, identity) in [("ADMIN", allow_list.admin()), ("BOS", allow_list.principal())] {
            if identity.phone.is_empty() {
                return Err(anyhow!("{key} must contain a phone number"));
            }
        }
        if allow_list.admin().phone == allow_list.principal().phone {
            return Err(anyhow!("ADMIN and BOS must be different numbers"));
        }

        Ok(Config {
            gateway_token: require("FONNTE_TOKEN")?,
            gemini_api_key: require("GEMINI_API_KEY")?,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.5-pro".to_string()),
            allow_list,
            sheet_id: require("SHEET_ID")?,
            sheet_range: get("SHEET_RANGE").unwrap_or_else(|| "Transaksi!A:K".to_string()),
            credentials_path: get("GOOGLE_CREDENTIALS")
                .unwrap_or_else(|| "credentials.json".to_string())
                .into(),
            drive_folder_id: get("DRIVE_FOLDER_ID"),
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            mirror_path: get("MIRROR_PATH")
                .unwrap_or_else(|| "backups/transactions.csv".to_string())
                .into(),
            backup_dir: get("BACKUP_DIR").unwrap_or_else(|| "backups".to_string()).into(),
            journal_path: get("JOURNAL_PATH")
                .unwrap_or_else(|| "data/journal.db".to_string())
                .into(),
            utc_offset,
            retry,
            endpoints,
        })
    }

    /// Current wall-clock time in the configured offset
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.utc_offset)
    }
}
