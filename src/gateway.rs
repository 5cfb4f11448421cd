//! Persistence gateway contract for diary entries.
//!
//! Entries are keyed at the backend by `(user, entry_date)`; fetching returns at
//! most one entry and saving is an upsert on that key.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::diary_entry::DiaryEntry;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated caller: who the rows belong to and the bearer token to prove it.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub access_token: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            access_token: access_token.into(),
        }
    }
}

// Keep the bearer token out of logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait EntryGateway: Send + Sync {
    /// Returns the entry stored for `date`, or `None` if the user has none.
    async fn fetch_entry(&self, identity: &Identity, date: NaiveDate)
        -> Result<Option<DiaryEntry>>;

    /// Inserts or replaces the entry stored under `(identity.user_id, entry.entry_date)`.
    async fn upsert_entry(&self, identity: &Identity, entry: &DiaryEntry) -> Result<()>;
}
