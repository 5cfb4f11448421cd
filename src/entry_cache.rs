//! Date-keyed cache of diary entries.
//!
//! The cache owns the selected date, the entry bound to the editor and every
//! entry seen during the session. Fetches are debounced on navigation and
//! single-flight: starting a fetch aborts the previous one, and a completion
//! whose token no longer owns the in-flight slot is dropped.
//!
//! Timers and gateway calls run in spawned tasks that report back through
//! [`CacheEvents`]; state only changes in [`EntryCache::handle_event`] and the
//! public operations, all called from one event loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::diary_entry::{today, DiaryEntry, EntryPatch};
use crate::gateway::{EntryGateway, GatewayError};
use crate::session::Session;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

/// Completion of work started by the cache.
#[derive(Debug)]
pub enum CacheEvent {
    DebounceElapsed {
        date: NaiveDate,
        token: RequestToken,
    },
    Fetched {
        date: NaiveDate,
        token: RequestToken,
        result: Result<Option<DiaryEntry>, GatewayError>,
    },
    Saved {
        entry: DiaryEntry,
        epoch: u64,
        revision: u64,
        result: Result<(), GatewayError>,
    },
}

/// Receiving half of the cache's completion channel.
pub struct CacheEvents {
    rx: mpsc::UnboundedReceiver<CacheEvent>,
}

impl CacheEvents {
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        self.rx.recv().await
    }
}

struct Pending {
    token: RequestToken,
    date: NaiveDate,
    handle: JoinHandle<()>,
}

/// Holds the latest pending operation; a new occupant cancels the old one.
#[derive(Default)]
struct PendingSlot {
    current: Option<Pending>,
}

impl PendingSlot {
    fn replace(&mut self, next: Pending) -> Option<NaiveDate> {
        let previous = self.cancel();
        self.current = Some(next);
        previous
    }

    fn cancel(&mut self) -> Option<NaiveDate> {
        self.current.take().map(|pending| {
            pending.handle.abort();
            pending.date
        })
    }

    /// Empties the slot if `token` still owns it.
    fn settle(&mut self, token: RequestToken) -> bool {
        match &self.current {
            Some(pending) if pending.token == token => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    fn date(&self) -> Option<NaiveDate> {
        self.current.as_ref().map(|pending| pending.date)
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub struct EntryCache<G> {
    gateway: Arc<G>,
    session: Session,
    entries: HashMap<NaiveDate, DiaryEntry>,
    // Local edit count per date, compared when a save completes.
    revisions: HashMap<NaiveDate, u64>,
    selected_date: NaiveDate,
    current_entry: DiaryEntry,
    debounce_delay: Duration,
    debounce: PendingSlot,
    in_flight: PendingSlot,
    saves_in_flight: usize,
    next_token: u64,
    // Bumped when the user changes so late save results are not cached.
    epoch: u64,
    last_error: Option<String>,
    tx: mpsc::UnboundedSender<CacheEvent>,
}

impl<G: EntryGateway + 'static> EntryCache<G> {
    /// Creates a cache showing an empty entry for `selected_date`. Nothing is
    /// fetched until a ready session is supplied with [`EntryCache::set_session`].
    pub fn new(
        gateway: Arc<G>,
        selected_date: NaiveDate,
        debounce_delay: Duration,
    ) -> (Self, CacheEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cache = EntryCache {
            gateway,
            session: Session::loading(),
            entries: HashMap::new(),
            revisions: HashMap::new(),
            selected_date,
            current_entry: DiaryEntry::empty(selected_date),
            debounce_delay,
            debounce: PendingSlot::default(),
            in_flight: PendingSlot::default(),
            saves_in_flight: 0,
            next_token: 0,
            epoch: 0,
            last_error: None,
            tx,
        };
        (cache, CacheEvents { rx })
    }

    pub fn selected_date(&self) -> NaiveDate {
        self.selected_date
    }

    pub fn current_entry(&self) -> &DiaryEntry {
        &self.current_entry
    }

    pub fn cached(&self, date: NaiveDate) -> Option<&DiaryEntry> {
        self.entries.get(&date)
    }

    /// True while a fetch for the selected date is in flight.
    pub fn is_loading_entry(&self) -> bool {
        self.in_flight.date() == Some(self.selected_date)
    }

    /// True while the selected date is waiting on a debounce timer or a fetch.
    pub fn is_resolving(&self) -> bool {
        self.is_loading_entry()
            || (!self.entries.contains_key(&self.selected_date)
                && self.debounce.date() == Some(self.selected_date))
    }

    pub fn is_saving(&self) -> bool {
        self.saves_in_flight > 0
    }

    /// Edits are accepted once the selected date is settled in the cache.
    pub fn is_editable(&self) -> bool {
        self.entries.contains_key(&self.selected_date) && !self.is_loading_entry()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_session(&mut self, session: Session) {
        if session.user_id() != self.session.user_id() {
            info!(user = ?session.user_id(), "session user changed, clearing entry cache");
            self.debounce.cancel();
            self.in_flight.cancel();
            self.entries.clear();
            self.revisions.clear();
            self.epoch += 1;
            self.last_error = None;
            self.current_entry = DiaryEntry::empty(self.selected_date);
        }
        self.session = session;

        if !self.session.is_ready() {
            self.debounce.cancel();
            self.in_flight.cancel();
            return;
        }

        let date = self.selected_date;
        if !self.entries.contains_key(&date) && self.in_flight.date() != Some(date) {
            self.debounce.cancel();
            self.fetch(date);
        }
    }

    pub fn select(&mut self, date: NaiveDate) {
        self.selected_date = date;
        self.current_entry.entry_date = date;

        if let Some(entry) = self.entries.get(&date) {
            self.current_entry = entry.clone();
            if let Some(abandoned) = self.debounce.cancel() {
                debug!(%abandoned, %date, "selected cached date, dropped pending fetch");
            }
            return;
        }

        if !self.session.is_ready() {
            debug!(%date, "identity unresolved, not scheduling fetch");
            self.debounce.cancel();
            return;
        }

        if self.in_flight.date() == Some(date) {
            self.debounce.cancel();
            return;
        }

        self.schedule_fetch(date);
    }

    pub fn select_previous_day(&mut self) {
        if let Some(date) = self.selected_date.pred_opt() {
            self.select(date);
        }
    }

    pub fn select_next_day(&mut self) {
        if let Some(date) = self.selected_date.succ_opt() {
            self.select(date);
        }
    }

    pub fn select_today(&mut self) {
        self.select(today());
    }

    /// Fetches the selected date again right away. Refused while a save is
    /// outstanding, since the fetch could read the row before the write lands.
    pub fn reload(&mut self) {
        if !self.session.is_ready() {
            warn!("cannot reload without a signed-in user");
            return;
        }
        if self.is_saving() {
            warn!(date = %self.selected_date, "not reloading while a save is in flight");
            return;
        }
        self.debounce.cancel();
        self.fetch(self.selected_date);
    }

    /// Merges `patch` into the current entry and caches the result. Returns
    /// false if the selected date has not resolved yet.
    pub fn update(&mut self, patch: EntryPatch) -> bool {
        if !self.is_editable() {
            debug!(date = %self.selected_date, "ignoring edit while entry is unresolved");
            return false;
        }
        patch.apply(&mut self.current_entry);
        self.current_entry.entry_date = self.selected_date;
        self.entries
            .insert(self.selected_date, self.current_entry.clone());
        *self.revisions.entry(self.selected_date).or_default() += 1;
        true
    }

    /// Upserts the current entry. Returns false if nothing was sent.
    pub fn save(&mut self) -> bool {
        let Some(identity) = self.session.ready_identity().cloned() else {
            warn!("cannot save without a signed-in user");
            return false;
        };
        if !self.is_editable() {
            warn!(date = %self.selected_date, "cannot save an unresolved entry");
            return false;
        }

        let mut entry = self.current_entry.clone();
        entry.entry_date = self.selected_date;
        info!(date = %entry.entry_date, "saving entry");

        self.saves_in_flight += 1;
        let epoch = self.epoch;
        let revision = self.revision(entry.entry_date);
        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = gateway.upsert_entry(&identity, &entry).await;
            let _ = tx.send(CacheEvent::Saved {
                entry,
                epoch,
                revision,
                result,
            });
        });
        true
    }

    pub fn handle_event(&mut self, event: CacheEvent) {
        match event {
            CacheEvent::DebounceElapsed { date, token } => self.on_debounce_elapsed(date, token),
            CacheEvent::Fetched {
                date,
                token,
                result,
            } => self.on_fetched(date, token, result),
            CacheEvent::Saved {
                entry,
                epoch,
                revision,
                result,
            } => self.on_saved(entry, epoch, revision, result),
        }
    }

    fn revision(&self, date: NaiveDate) -> u64 {
        self.revisions.get(&date).copied().unwrap_or(0)
    }

    fn next_token(&mut self) -> RequestToken {
        self.next_token += 1;
        RequestToken(self.next_token)
    }

    fn schedule_fetch(&mut self, date: NaiveDate) {
        let token = self.next_token();
        let delay = self.debounce_delay;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CacheEvent::DebounceElapsed { date, token });
        });

        if let Some(superseded) = self.debounce.replace(Pending {
            token,
            date,
            handle,
        }) {
            debug!(%superseded, %date, "restarted debounce");
        }
    }

    fn on_debounce_elapsed(&mut self, date: NaiveDate, token: RequestToken) {
        if !self.debounce.settle(token) {
            debug!(%date, "ignoring superseded debounce timer");
            return;
        }
        if date != self.selected_date || self.entries.contains_key(&date) {
            return;
        }
        self.fetch(date);
    }

    fn fetch(&mut self, date: NaiveDate) {
        let Some(identity) = self.session.ready_identity().cloned() else {
            return;
        };

        if let Some(cancelled) = self.in_flight.cancel() {
            debug!(%cancelled, %date, "cancelled superseded fetch");
        }

        let token = self.next_token();
        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let result = gateway.fetch_entry(&identity, date).await;
            let _ = tx.send(CacheEvent::Fetched {
                date,
                token,
                result,
            });
        });
        self.in_flight.replace(Pending {
            token,
            date,
            handle,
        });
        debug!(%date, "fetching entry");
    }

    fn on_fetched(
        &mut self,
        date: NaiveDate,
        token: RequestToken,
        result: Result<Option<DiaryEntry>, GatewayError>,
    ) {
        if !self.in_flight.settle(token) {
            debug!(%date, "dropping result of cancelled fetch");
            return;
        }

        match result {
            Ok(found) => {
                let mut entry = found.unwrap_or_else(|| DiaryEntry::empty(date));
                entry.entry_date = date;
                self.entries.insert(date, entry.clone());
                if date == self.selected_date {
                    self.current_entry = entry;
                } else {
                    debug!(%date, selected = %self.selected_date, "cached entry for a date no longer selected");
                }
                self.last_error = None;
            }
            Err(err) => {
                error!(%date, error = %err, "failed to fetch diary entry");
                self.last_error = Some(format!("Could not load {date}: {err}"));
            }
        }
    }

    fn on_saved(
        &mut self,
        entry: DiaryEntry,
        epoch: u64,
        revision: u64,
        result: Result<(), GatewayError>,
    ) {
        self.saves_in_flight = self.saves_in_flight.saturating_sub(1);
        if epoch != self.epoch {
            debug!(date = %entry.entry_date, "discarding save result from a previous session");
            return;
        }

        match result {
            Ok(()) => {
                info!(date = %entry.entry_date, "saved entry");
                if self.revision(entry.entry_date) == revision {
                    if entry.entry_date == self.selected_date {
                        self.current_entry = entry.clone();
                    }
                    self.entries.insert(entry.entry_date, entry);
                } else {
                    debug!(date = %entry.entry_date, "entry edited while saving, keeping local value");
                }
                self.last_error = None;
            }
            Err(err) => {
                error!(date = %entry.entry_date, error = %err, "failed to save diary entry");
                self.last_error = Some(format!("Could not save {}: {err}", entry.entry_date));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diary_entry::Mood;
    use crate::gateway::testing::MemoryGateway;
    use crate::gateway::{Identity, UserId};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn user() -> Identity {
        Identity::new("U1", "token-1")
    }

    fn entry(s: &str, title: &str) -> DiaryEntry {
        DiaryEntry {
            title: title.to_string(),
            ..DiaryEntry::empty(date(s))
        }
    }

    fn signed_in_cache(
        gateway: &Arc<MemoryGateway>,
        start: &str,
    ) -> (EntryCache<MemoryGateway>, CacheEvents) {
        let (mut cache, events) =
            EntryCache::new(Arc::clone(gateway), date(start), DEFAULT_DEBOUNCE);
        cache.set_session(Session::signed_in(user()));
        (cache, events)
    }

    /// Applies completions until nothing else is pending.
    async fn run_until_idle(cache: &mut EntryCache<MemoryGateway>, events: &mut CacheEvents) {
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(10), events.recv()).await
        {
            cache.handle_event(event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_without_backend_entry_yields_empty_entry() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");

        assert!(cache.is_loading_entry());
        assert!(!cache.is_editable());

        run_until_idle(&mut cache, &mut events).await;

        assert_eq!(cache.current_entry(), &DiaryEntry::empty(date("2024-01-10")));
        assert_eq!(
            cache.cached(date("2024-01-10")),
            Some(&DiaryEntry::empty(date("2024-01-10")))
        );
        assert!(!cache.is_loading_entry());
        assert!(cache.is_editable());
        assert_eq!(gateway.fetches(), vec![date("2024-01-10")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_selection_fetches_only_last_date() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        cache.select(date("2024-01-11"));
        cache.select(date("2024-01-12"));
        assert!(cache.is_resolving());
        run_until_idle(&mut cache, &mut events).await;

        assert_eq!(
            gateway.fetches(),
            vec![date("2024-01-10"), date("2024-01-12")]
        );
        assert_eq!(cache.current_entry(), &DiaryEntry::empty(date("2024-01-12")));
        assert!(cache.cached(date("2024-01-11")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_selecting_cached_date_resolves_without_network() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert(&user().user_id, entry("2024-01-10", "morning"));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        cache.select(date("2024-01-11"));
        run_until_idle(&mut cache, &mut events).await;
        let fetches_before = gateway.fetches().len();

        cache.select(date("2024-01-10"));
        assert_eq!(cache.current_entry(), &entry("2024-01-10", "morning"));
        assert!(cache.is_editable());

        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(gateway.fetches().len(), fetches_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_for_other_date_is_cached_but_not_shown() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert(&user().user_id, entry("2024-01-11", "eleven"));
        gateway.delay_fetch(date("2024-01-11"), Duration::from_millis(300));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        cache.select(date("2024-01-11"));
        let elapsed = events.recv().await.unwrap();
        assert!(matches!(elapsed, CacheEvent::DebounceElapsed { .. }));
        cache.handle_event(elapsed);
        assert!(cache.is_loading_entry());

        cache.select(date("2024-01-12"));
        assert!(!cache.is_loading_entry());

        let fetched = events.recv().await.unwrap();
        assert!(matches!(fetched, CacheEvent::Fetched { .. }));
        cache.handle_event(fetched);

        assert_eq!(cache.selected_date(), date("2024-01-12"));
        assert_eq!(cache.current_entry().entry_date, date("2024-01-12"));
        assert_ne!(cache.current_entry().title, "eleven");
        assert_eq!(
            cache.cached(date("2024-01-11")),
            Some(&entry("2024-01-11", "eleven"))
        );

        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(cache.current_entry(), &DiaryEntry::empty(date("2024-01-12")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_fetch_result_is_dropped() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert(&user().user_id, entry("2024-01-11", "eleven"));
        gateway.delay_fetch(date("2024-01-11"), Duration::from_millis(300));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        cache.select(date("2024-01-11"));
        let elapsed = events.recv().await.unwrap();
        cache.handle_event(elapsed);
        cache.select(date("2024-01-12"));

        // Hold the first completion back until the newer fetch has started.
        let stale = events.recv().await.unwrap();
        assert!(matches!(stale, CacheEvent::Fetched { .. }));
        let elapsed = events.recv().await.unwrap();
        assert!(matches!(elapsed, CacheEvent::DebounceElapsed { .. }));
        cache.handle_event(elapsed);
        cache.handle_event(stale);

        assert!(cache.cached(date("2024-01-11")).is_none());
        assert!(cache.is_loading_entry());
        assert_eq!(cache.current_entry().entry_date, date("2024-01-12"));

        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(cache.current_entry(), &DiaryEntry::empty(date("2024-01-12")));
        assert_eq!(
            gateway.fetches(),
            vec![date("2024-01-10"), date("2024-01-11"), date("2024-01-12")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_fetch_is_aborted_by_newer_fetch() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert(&user().user_id, entry("2024-01-11", "eleven"));
        gateway.delay_fetch(date("2024-01-11"), Duration::from_secs(2));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        cache.select(date("2024-01-11"));
        let elapsed = events.recv().await.unwrap();
        cache.handle_event(elapsed);
        cache.select(date("2024-01-12"));

        run_until_idle(&mut cache, &mut events).await;

        assert!(cache.cached(date("2024-01-11")).is_none());
        assert_eq!(cache.current_entry(), &DiaryEntry::empty(date("2024-01-12")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsaved_edit_survives_navigation() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        assert!(cache.update(EntryPatch::title("x")));
        cache.select(date("2024-01-11"));
        cache.select(date("2024-01-10"));

        assert_eq!(cache.current_entry().title, "x");
        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(cache.current_entry().title, "x");
        assert_eq!(gateway.fetches(), vec![date("2024-01-10")]);
        assert!(gateway.upserts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_saving_twice_keeps_single_backend_row() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        assert!(cache.update(EntryPatch::content("quiet day")));
        assert!(cache.save());
        assert!(cache.save());
        assert!(cache.is_saving());
        run_until_idle(&mut cache, &mut events).await;

        assert!(!cache.is_saving());
        assert_eq!(gateway.upserts().len(), 2);
        assert_eq!(gateway.row_count(), 1);
        assert_eq!(
            gateway.row(&user().user_id, date("2024-01-10")).as_ref(),
            Some(cache.current_entry())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_set_mood_and_save() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(cache.current_entry(), &DiaryEntry::empty(date("2024-01-10")));

        assert!(cache.update(EntryPatch::mood(Some(Mood::Neutral))));
        assert_eq!(
            cache.cached(date("2024-01-10")).and_then(|e| e.mood),
            Some(Mood::Neutral)
        );
        assert_eq!(gateway.fetches().len(), 1);

        assert!(cache.save());
        run_until_idle(&mut cache, &mut events).await;

        let expected = DiaryEntry {
            mood: Some(Mood::Neutral),
            ..DiaryEntry::empty(date("2024-01-10"))
        };
        assert_eq!(
            gateway.upserts(),
            vec![(UserId("U1".to_string()), expected)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_prev_prev_next_within_debounce_fetches_final_date() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        cache.select_previous_day();
        tokio::time::advance(Duration::from_millis(100)).await;
        cache.select_previous_day();
        tokio::time::advance(Duration::from_millis(100)).await;
        cache.select_next_day();
        run_until_idle(&mut cache, &mut events).await;

        assert_eq!(cache.selected_date(), date("2024-01-09"));
        assert_eq!(
            gateway.fetches(),
            vec![date("2024-01-10"), date("2024-01-09")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fetch_until_identity_resolves() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut cache, mut events) =
            EntryCache::new(Arc::clone(&gateway), date("2024-01-10"), DEFAULT_DEBOUNCE);

        cache.select(date("2024-01-11"));
        run_until_idle(&mut cache, &mut events).await;
        assert!(gateway.fetches().is_empty());
        assert!(!cache.update(EntryPatch::title("too early")));
        assert!(!cache.save());

        cache.set_session(Session::signed_out());
        run_until_idle(&mut cache, &mut events).await;
        assert!(gateway.fetches().is_empty());

        cache.set_session(Session::signed_in(user()));
        assert!(cache.is_loading_entry());
        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(gateway.fetches(), vec![date("2024-01-11")]);
        assert!(cache.is_editable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_leaves_state_unchanged() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert(&user().user_id, entry("2024-01-10", "zero"));
        gateway.fail_fetch(date("2024-01-11"));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        cache.select(date("2024-01-11"));
        run_until_idle(&mut cache, &mut events).await;

        assert_eq!(cache.current_entry().entry_date, date("2024-01-11"));
        assert_eq!(cache.current_entry().title, "zero");
        assert!(cache.cached(date("2024-01-11")).is_none());
        assert!(!cache.is_loading_entry());
        assert!(!cache.is_editable());
        assert!(cache.last_error().is_some());
        assert!(!cache.update(EntryPatch::title("stale")));
        assert_eq!(
            cache.cached(date("2024-01-10")),
            Some(&entry("2024-01-10", "zero"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_keeps_optimistic_value() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.fail_upserts(true);
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        assert!(cache.update(EntryPatch::title("draft")));
        assert!(cache.save());
        run_until_idle(&mut cache, &mut events).await;

        assert!(!cache.is_saving());
        assert!(cache.last_error().is_some());
        assert_eq!(cache.current_entry().title, "draft");
        assert_eq!(
            cache.cached(date("2024-01-10")).map(|e| e.title.as_str()),
            Some("draft")
        );
        assert!(gateway.row(&user().user_id, date("2024-01-10")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_completion_keeps_newer_edit() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        assert!(cache.update(EntryPatch::title("a")));
        assert!(cache.save());
        assert!(cache.update(EntryPatch::title("ab")));
        run_until_idle(&mut cache, &mut events).await;

        assert_eq!(
            cache.cached(date("2024-01-10")).map(|e| e.title.as_str()),
            Some("ab")
        );
        assert_eq!(
            gateway
                .row(&user().user_id, date("2024-01-10"))
                .map(|e| e.title),
            Some("a".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_is_refused_while_save_is_outstanding() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.delay_upserts(Duration::from_millis(100));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        assert!(cache.update(EntryPatch::title("x")));
        assert!(cache.save());
        cache.reload();
        assert!(!cache.is_loading_entry());
        run_until_idle(&mut cache, &mut events).await;

        assert_eq!(gateway.fetches(), vec![date("2024-01-10")]);
        assert_eq!(
            gateway
                .row(&user().user_id, date("2024-01-10"))
                .map(|e| e.title),
            Some("x".to_string())
        );
        assert_eq!(
            cache.cached(date("2024-01-10")).map(|e| e.title.as_str()),
            Some("x")
        );
        assert_eq!(cache.current_entry().title, "x");

        cache.reload();
        assert!(cache.is_loading_entry());
        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(cache.current_entry().title, "x");
        assert_eq!(gateway.fetches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_completion_after_reverted_edit_keeps_local_value() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.delay_upserts(Duration::from_millis(100));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        assert!(cache.update(EntryPatch::title("a")));
        assert!(cache.save());
        assert!(cache.update(EntryPatch::mood(Some(Mood::Good))));
        assert!(cache.update(EntryPatch::mood(None)));
        run_until_idle(&mut cache, &mut events).await;

        assert_eq!(cache.current_entry().title, "a");
        assert_eq!(cache.current_entry().mood, None);
        assert!(!cache.is_saving());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signing_out_cancels_in_flight_fetch() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert(&user().user_id, entry("2024-01-10", "mine"));
        gateway.delay_fetch(date("2024-01-10"), Duration::from_millis(200));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        assert!(cache.is_loading_entry());

        cache.set_session(Session::signed_out());
        run_until_idle(&mut cache, &mut events).await;

        assert!(cache.cached(date("2024-01-10")).is_none());
        assert!(!cache.is_loading_entry());
        assert!(!cache.is_resolving());
        assert_eq!(cache.current_entry(), &DiaryEntry::empty(date("2024-01-10")));
        assert_eq!(gateway.fetches(), vec![date("2024-01-10")]);

        cache.select(date("2024-01-11"));
        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(gateway.fetches(), vec![date("2024-01-10")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_reloading_for_same_user_cancels_in_flight_fetch() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert(&user().user_id, entry("2024-01-10", "mine"));
        gateway.delay_fetch(date("2024-01-10"), Duration::from_millis(200));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        assert!(cache.is_loading_entry());

        cache.set_session(Session {
            identity: Some(user()),
            auth_loading: true,
        });
        run_until_idle(&mut cache, &mut events).await;

        assert!(cache.cached(date("2024-01-10")).is_none());
        assert!(!cache.is_loading_entry());
        assert_eq!(gateway.fetches(), vec![date("2024-01-10")]);

        cache.set_session(Session::signed_in(user()));
        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(cache.current_entry().title, "mine");
        assert_eq!(gateway.fetches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_user_clears_cache() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.insert(&user().user_id, entry("2024-01-10", "mine"));
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(cache.current_entry().title, "mine");

        cache.set_session(Session::signed_in(Identity::new("U2", "token-2")));
        assert!(cache.cached(date("2024-01-10")).is_none());
        assert_eq!(cache.current_entry(), &DiaryEntry::empty(date("2024-01-10")));

        run_until_idle(&mut cache, &mut events).await;
        assert_eq!(cache.current_entry(), &DiaryEntry::empty(date("2024-01-10")));
        assert_eq!(gateway.fetches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_refetches_selected_date() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut cache, mut events) = signed_in_cache(&gateway, "2024-01-10");
        run_until_idle(&mut cache, &mut events).await;

        gateway.insert(&user().user_id, entry("2024-01-10", "from another device"));
        cache.reload();
        assert!(cache.is_loading_entry());
        assert!(!cache.update(EntryPatch::title("mid-reload")));
        run_until_idle(&mut cache, &mut events).await;

        assert_eq!(cache.current_entry().title, "from another device");
        assert_eq!(gateway.fetches().len(), 2);
    }
}
