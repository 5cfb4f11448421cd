mod config;
mod diary_entry;
mod entry_cache;
mod gateway;
mod session;
mod supabase;
mod ui;

use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use crossterm::event::{Event, EventStream};
use futures::StreamExt;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{AppConfig, Cli, LogFormat};
use diary_entry::today;
use entry_cache::EntryCache;
use session::Session;
use supabase::SupabaseClient;
use ui::{Action, AuthMode, View, UI};

fn init_tracing(config: &AppConfig) -> Result<()> {
    // The terminal belongs to the UI, so logs go to a file.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .map_err(|e| eyre!("Failed to open log file {}: {}", config.log_file.display(), e))?;
    let writer = Mutex::new(file);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,mood_diary=debug".into());

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .init(),
    }
    Ok(())
}

async fn sign_in(
    client: &SupabaseClient,
    cache: &mut EntryCache<SupabaseClient>,
    ui: &mut UI,
    email: &str,
    password: &str,
) -> Result<()> {
    ui.editor().mark_pending();
    ui.display(&View::of(cache))?;

    match client.sign_in(email, password).await {
        Ok(identity) => {
            cache.set_session(Session::signed_in(identity));
            ui.editor().show_diary();
        }
        Err(e) => {
            error!(error = %e, "sign-in failed");
            cache.set_session(Session::signed_out());
            ui.editor().auth_failed(e.to_string());
        }
    }
    Ok(())
}

async fn sign_up(
    client: &SupabaseClient,
    cache: &EntryCache<SupabaseClient>,
    ui: &mut UI,
    full_name: &str,
    email: &str,
    password: &str,
) -> Result<()> {
    ui.display(&View::of(cache))?;

    match client.sign_up(full_name, email, password).await {
        Ok(()) => ui.editor().show_sign_in(Some(
            "Account created. Confirm your email if asked, then sign in.".to_string(),
        )),
        Err(e) => {
            error!(error = %e, "sign-up failed");
            ui.editor().auth_failed(e.to_string());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    config.apply_cli(&cli);
    init_tracing(&config)?;
    info!(?config, "starting");

    let client = Arc::new(SupabaseClient::new(
        config.supabase_url.clone(),
        config.supabase_anon_key.clone(),
    ));
    info!(url = client.base_url(), "using backend");
    let start_date = cli.date.unwrap_or_else(today);
    let (mut cache, mut cache_events) =
        EntryCache::new(Arc::clone(&client), start_date, config.debounce);

    let mode = if cli.sign_up {
        AuthMode::SignUp
    } else {
        AuthMode::SignIn
    };
    let mut ui = UI::new(mode)?;
    ui.editor()
        .prefill_credentials(config.email.as_deref(), config.password.as_deref());

    match (&config.email, &config.password) {
        (Some(email), Some(password)) if mode == AuthMode::SignIn => {
            sign_in(&client, &mut cache, &mut ui, email, password).await?;
        }
        _ => cache.set_session(Session::signed_out()),
    }

    let mut terminal_events = EventStream::new();

    loop {
        ui.display(&View::of(&cache))?;

        tokio::select! {
            maybe_event = terminal_events.next() => {
                let Some(event) = maybe_event else { break };
                let Event::Key(key) = event? else { continue };

                let action = ui.handle_key(key, &View::of(&cache));
                if let Some(action) = action {
                    match action {
                        Action::PreviousDay => cache.select_previous_day(),
                        Action::NextDay => cache.select_next_day(),
                        Action::Today => cache.select_today(),
                        Action::GoTo(date) => cache.select(date),
                        Action::Edit(patch) => {
                            cache.update(patch);
                        }
                        Action::Save => {
                            cache.save();
                        }
                        Action::Reload => cache.reload(),
                        Action::SignIn { email, password } => {
                            sign_in(&client, &mut cache, &mut ui, &email, &password).await?;
                        }
                        Action::SignUp { full_name, email, password } => {
                            sign_up(&client, &cache, &mut ui, &full_name, &email, &password).await?;
                        }
                        Action::SignOut => {
                            info!("signing out");
                            cache.set_session(Session::signed_out());
                            ui.editor().show_sign_in(None);
                        }
                        Action::Quit => break,
                    }
                }
            }
            Some(event) = cache_events.recv() => cache.handle_event(event),
        }
    }

    Ok(())
}
