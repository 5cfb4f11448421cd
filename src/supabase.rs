//! HTTP client for a Supabase project.
//!
//! Auth goes through GoTrue (`/auth/v1`) and entries live in the PostgREST
//! table `diary_entries`, unique on `(user_id, entry_date)`.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diary_entry::{DiaryEntry, DATE_FORMAT};
use crate::gateway::{EntryGateway, GatewayError, Identity, Result, UserId};

const ENTRIES_PATH: &str = "/rest/v1/diary_entries";
const ENTRY_COLUMNS: &str = "title,content,mood,entry_date";
const CONFLICT_KEY: &str = "user_id,entry_date";

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Serialize)]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthSession {
    access_token: String,
    user: AuthUser,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
}

/// Row body for an upsert: the entry plus the owner column.
#[derive(Serialize)]
struct EntryRow<'a> {
    #[serde(flatten)]
    entry: &'a DiaryEntry,
    user_id: &'a UserId,
}

impl SupabaseClient {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            anon_key: anon_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Signs in with email and password.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let response = self
            .client
            .post(self.url("/auth/v1/token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&PasswordCredentials { email, password })
            .send()
            .await?;
        let session: AuthSession = check_status(response).await?.json().await?;
        info!(user = %session.user.id, "signed in");
        Ok(Identity::new(session.user.id, session.access_token))
    }

    /// Registers a new account. Does not sign in; the backend may require the
    /// address to be confirmed first.
    pub async fn sign_up(&self, full_name: &str, email: &str, password: &str) -> Result<()> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "data": { "full_name": full_name },
        });
        let response = self
            .client
            .post(self.url("/auth/v1/signup"))
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        info!("account created");
        Ok(())
    }
}

#[async_trait]
impl EntryGateway for SupabaseClient {
    async fn fetch_entry(&self, identity: &Identity, date: NaiveDate) -> Result<Option<DiaryEntry>> {
        debug!(%date, "GET diary entry");
        let response = self
            .client
            .get(self.url(ENTRIES_PATH))
            .query(&entry_filter(&identity.user_id, date))
            .header("apikey", &self.anon_key)
            .bearer_auth(&identity.access_token)
            .send()
            .await?;
        let rows: Vec<DiaryEntry> = check_status(response).await?.json().await?;
        single_row(rows)
    }

    async fn upsert_entry(&self, identity: &Identity, entry: &DiaryEntry) -> Result<()> {
        debug!(date = %entry.entry_date, "POST diary entry upsert");
        let row = EntryRow {
            entry,
            user_id: &identity.user_id,
        };
        let response = self
            .client
            .post(self.url(ENTRIES_PATH))
            .query(&[("on_conflict", CONFLICT_KEY)])
            .header("apikey", &self.anon_key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .bearer_auth(&identity.access_token)
            .json(&row)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

fn entry_filter(user_id: &UserId, date: NaiveDate) -> Vec<(&'static str, String)> {
    vec![
        ("select", ENTRY_COLUMNS.to_string()),
        ("user_id", format!("eq.{}", user_id)),
        ("entry_date", format!("eq.{}", date.format(DATE_FORMAT))),
    ]
}

/// At most one row may match a `(user_id, entry_date)` filter.
fn single_row(rows: Vec<DiaryEntry>) -> Result<Option<DiaryEntry>> {
    let mut rows = rows.into_iter();
    match (rows.next(), rows.next()) {
        (None, _) => Ok(None),
        (Some(entry), None) => Ok(Some(entry)),
        (Some(_), Some(_)) => Err(GatewayError::InvalidResponse(
            "multiple entries returned for one date".to_string(),
        )),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(status_error(status.as_u16(), error_message(&body)))
}

fn status_error(status: u16, message: String) -> GatewayError {
    match status {
        401 | 403 => GatewayError::Unauthorized(message),
        _ => GatewayError::Status { status, message },
    }
}

/// Pulls the human readable part out of a GoTrue or PostgREST error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    ["error_description", "msg", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}
