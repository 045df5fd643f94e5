//! Google Sheets sink. One sheet per calendar month, rows only ever appended.
//!
//! Authentication uses a service-account key: a signed RS256 assertion is
//! exchanged for a bearer token at the key's `token_uri`, and the token is
//! reused until shortly before it expires.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{check_status, SheetRow, SheetStore};

const API_BASE: &str = "https://sheets.googleapis.com";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Refresh this long before the token actually expires.
const TOKEN_SLACK_SECS: u64 = 60;

/// Sheet name for the month containing `now`, formatted `yyyy-MM`.
pub fn sheet_name_for(now: &DateTime<Tz>) -> String {
    now.format("%Y-%m").to_string()
}

pub fn sheet_name_for_now(tz: Tz) -> String {
    sheet_name_for(&Utc::now().with_timezone(&tz))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SheetsClient {
    credentials_path: PathBuf,
    spreadsheet_id: String,
    base_url: String,
    client: reqwest::Client,
    account: Mutex<Option<ServiceAccount>>,
    token: Mutex<Option<AccessToken>>,
}

impl SheetsClient {
    pub fn new(credentials_path: &Path, spreadsheet_id: &str) -> Self {
        Self {
            credentials_path: credentials_path.to_path_buf(),
            spreadsheet_id: spreadsheet_id.to_string(),
            base_url: API_BASE.to_string(),
            client: reqwest::Client::new(),
            account: Mutex::new(None),
            token: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let account = self
            .account
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("sheets: not authenticated"))?;
        let fresh = self.fetch_token(&account).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn fetch_token(&self, account: &ServiceAccount) -> Result<AccessToken> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = Claims {
            iss: &account.client_email,
            scope: SCOPE,
            aud: &account.token_uri,
            iat,
            exp: iat + 3600,
        };
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .context("sheets: invalid service-account private key")?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .context("sheets: failed to sign token request")?;

        let response = self
            .client
            .post(&account.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("sheets: token request failed")?;
        let token: TokenResponse = check_status(response, "sheets token exchange")
            .await?
            .json()
            .await
            .context("sheets: bad token response")?;

        Ok(AccessToken {
            value: token.access_token,
            refresh_at: Instant::now()
                + Duration::from_secs(token.expires_in.saturating_sub(TOKEN_SLACK_SECS)),
        })
    }

    fn spreadsheet_url(&self) -> String {
        format!("{}/v4/spreadsheets/{}", self.base_url, self.spreadsheet_id)
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/values/{}", self.spreadsheet_url(), urlencoding::encode(range))
    }

    async fn sheet_titles(&self) -> Result<Vec<String>> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.spreadsheet_url())
            .query(&[("fields", "sheets.properties.title")])
            .bearer_auth(token)
            .send()
            .await
            .context("sheets: metadata request failed")?;
        let sheet: Spreadsheet = check_status(response, "sheets metadata")
            .await?
            .json()
            .await
            .context("sheets: bad metadata response")?;
        Ok(sheet.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn sheet_exists(&self, name: &str) -> Result<bool> {
        Ok(self.sheet_titles().await?.iter().any(|t| t == name))
    }

    async fn add_sheet(&self, name: &str) -> Result<()> {
        let token = self.access_token().await?;
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": name } } }]
        });
        let response = self
            .client
            .post(format!("{}:batchUpdate", self.spreadsheet_url()))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("sheets: addSheet request failed")?;
        check_status(response, "sheets addSheet").await?;
        Ok(())
    }
}

#[async_trait]
impl SheetStore for SheetsClient {
    async fn authenticate(&self) -> Result<()> {
        let raw = tokio::fs::read_to_string(&self.credentials_path)
            .await
            .with_context(|| {
                format!("failed to read credentials: {}", self.credentials_path.display())
            })?;
        let account: ServiceAccount = serde_json::from_str(&raw).with_context(|| {
            format!("failed to parse credentials: {}", self.credentials_path.display())
        })?;

        *self.account.lock().await = Some(account);
        *self.token.lock().await = None;
        self.access_token().await?;
        Ok(())
    }

    async fn ensure_sheet(&self, name: &str, header: &[String]) -> Result<()> {
        if self.sheet_exists(name).await? {
            return Ok(());
        }
        self.add_sheet(name).await?;
        self.update_header_row(name, header).await?;
        tracing::info!(sheet = %name, "sheets: created monthly sheet");
        Ok(())
    }

    async fn append_row(&self, name: &str, values: &[serde_json::Value]) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}:append", self.values_url(&format!("{name}!A:Z"))))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&json!({ "values": [values] }))
            .send()
            .await
            .context("sheets: append request failed")?;
        check_status(response, "sheets append").await?;
        Ok(())
    }

    async fn update_header_row(&self, name: &str, values: &[String]) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .client
            .put(self.values_url(&format!("{name}!1:1")))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&json!({ "values": [values] }))
            .send()
            .await
            .context("sheets: header update request failed")?;
        check_status(response, "sheets header update").await?;
        Ok(())
    }

    async fn read_rows(&self, name: &str) -> Result<Vec<SheetRow>> {
        if !self.sheet_exists(name).await? {
            return Ok(Vec::new());
        }
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.values_url(&format!("{name}!A2:D")))
            .bearer_auth(token)
            .send()
            .await
            .context("sheets: read request failed")?;
        let range: ValueRange = check_status(response, "sheets read")
            .await?
            .json()
            .await
            .context("sheets: bad read response")?;

        Ok(range.values.iter().map(|row| parse_row(row)).collect())
    }
}

fn parse_row(row: &[String]) -> SheetRow {
    let number = |i: usize| {
        row.get(i)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(f64::NAN)
    };
    SheetRow {
        temperature: number(0),
        humidity: number(1),
        timestamp: row
            .get(2)
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok()),
        tag: row.get(3).cloned().unwrap_or_default(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
