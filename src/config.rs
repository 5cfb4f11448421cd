use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Parser;
use thiserror::Error;

use crate::diary_entry::parse_entry_date;
use crate::entry_cache::DEFAULT_DEBOUNCE;

pub const DEFAULT_LOG_FILE: &str = "mood_diary.log";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub debounce: Duration,
    pub log_file: PathBuf,
    pub log_format: LogFormat,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("supabase_url", &self.supabase_url)
            .field("email", &self.email)
            .field("password_present", &self.password.is_some())
            .field("debounce", &self.debounce)
            .field("log_file", &self.log_file)
            .field("log_format", &self.log_format)
            .finish()
    }
}

/// A one-entry-per-day diary in the terminal.
#[derive(Debug, Parser)]
#[command(name = "mood_diary", version, about)]
pub struct Cli {
    /// Day to open (YYYY-MM-DD), defaults to today
    #[arg(long, value_parser = parse_date_arg)]
    pub date: Option<NaiveDate>,

    /// Milliseconds to wait before fetching a newly selected day
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// File that receives the application log
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Open the sign-up form instead of sign-in
    #[arg(long)]
    pub sign_up: bool,
}

fn parse_date_arg(value: &str) -> Result<NaiveDate, String> {
    parse_entry_date(value).ok_or_else(|| format!("invalid date '{value}', expected YYYY-MM-DD"))
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let supabase_url = non_empty("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        let supabase_anon_key =
            non_empty("SUPABASE_ANON_KEY").ok_or(ConfigError::Missing("SUPABASE_ANON_KEY"))?;

        let debounce = match non_empty("DIARY_DEBOUNCE_MS") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::Invalid {
                    var: "DIARY_DEBOUNCE_MS",
                    value,
                })?,
            None => DEFAULT_DEBOUNCE,
        };

        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            email: non_empty("DIARY_EMAIL"),
            password: non_empty("DIARY_PASSWORD"),
            debounce,
            log_file: non_empty("DIARY_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            log_format,
        })
    }

    /// Command line flags win over the environment.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(ms) = cli.debounce_ms {
            self.debounce = Duration::from_millis(ms);
        }
        if let Some(path) = &cli.log_file {
            self.log_file = path.clone();
        }
    }
}
