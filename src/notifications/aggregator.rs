//! The notification aggregator.
//!
//! One load cycle: fetch the four sources concurrently, derive and filter
//! notifications, diff them against the previous cycle, then decide what to
//! announce. Two timers drive it while started: a 15 s ambient poll and a
//! single-shot timer for the next 08:00/16:00 push.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::bell::{self, BellState, Grouped};
use super::derive::derive_notifications;
use super::signature::SignatureCache;
use super::store::{DismissalMap, SentSlotMap};
use crate::notification::{LogNavigator, LogToaster, Navigator, Toast, Toaster};
use crate::scheduler::{
    duration_until, in_ambient_window, local_date, next_trigger, slot_key, Clock, SystemClock,
    Trigger,
};
use crate::siga::{fetch_all, NotificationSource};
use crate::storage::KeyValueStore;
use crate::types::{LoadOptions, LoadReason, Notification};

/// Non-forced loads starting closer together than this are skipped
const MIN_REFETCH_MS: i64 = 15_000;
/// Timer jitter allowed so a poll tick one interval after the last load still runs
const REFETCH_SLACK_MS: i64 = 500;
pub const POLL_INTERVAL: Duration = Duration::from_secs(15);
/// Per-notification cooldown between ambient toasts
const TOAST_COOLDOWN_SECS: i64 = 30;
const MAX_SCHEDULED_TOASTS: usize = 3;

pub const LOAD_ERROR_MESSAGE: &str = "No se pudieron cargar las notificaciones.";

/// Settings taken from `Config` at construction
#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    pub tz: Tz,
    /// Quota used when the statistics endpoint does not report one
    pub quota_fallback: Option<i64>,
}

/// What a call to `load_notifications` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Another load was already running
    InFlight,
    /// Not forced and the last successful load is too recent
    Throttled,
    /// The aggregator was stopped while fetching; the response was dropped
    Discarded,
    /// Every source failed
    Failed,
    Loaded(LoadReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub total: usize,
    /// New or changed since the previous load
    pub fresh: usize,
    pub toasts: Vec<Toast>,
}

#[derive(Default)]
struct Inner {
    notifications: Vec<Notification>,
    error: Option<String>,
    last_loaded_at: Option<DateTime<Utc>>,
    loads_completed: u64,
    signatures: SignatureCache,
    last_toast_at: HashMap<String, DateTime<Utc>>,
    bell: BellState,
    /// Slot whose timer fired; pushed by the next load that completes
    pending_push: Option<Trigger>,
}

#[derive(Default)]
struct Timers {
    started: bool,
    poll: Option<JoinHandle<()>>,
    schedule: Option<JoinHandle<()>>,
    next_push: Option<DateTime<Utc>>,
    /// Boundary of the last slot timer that fired
    fired: Option<DateTime<Utc>>,
}

pub struct NotificationAggregator {
    source: Arc<dyn NotificationSource>,
    store: Arc<dyn KeyValueStore>,
    toaster: Arc<dyn Toaster>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    settings: AggregatorSettings,
    in_flight: AtomicBool,
    mounted: AtomicBool,
    inner: Mutex<Inner>,
    timers: Mutex<Timers>,
}

/// Clears the in-flight flag however the load exits.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl NotificationAggregator {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        store: Arc<dyn KeyValueStore>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            source,
            store,
            toaster: Arc::new(LogToaster),
            navigator: Arc::new(LogNavigator),
            clock: Arc::new(SystemClock),
            settings,
            in_flight: AtomicBool::new(false),
            mounted: AtomicBool::new(true),
            inner: Mutex::new(Inner::default()),
            timers: Mutex::new(Timers::default()),
        }
    }

    pub fn with_toaster(mut self, toaster: Arc<dyn Toaster>) -> Self {
        self.toaster = toaster;
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Mount: reset session state, start the poll timer, and run the initial load.
    pub async fn start(self: &Arc<Self>) -> LoadOutcome {
        self.mounted.store(true, Ordering::SeqCst);
        {
            let mut inner = self.inner.lock();
            inner.signatures = SignatureCache::new();
            inner.last_toast_at.clear();
            inner.loads_completed = 0;
            inner.pending_push = None;
        }
        {
            let mut timers = self.timers.lock();
            timers.started = true;
            if let Some(handle) = timers.poll.take() {
                handle.abort();
            }
            timers.poll = Some(spawn_poll_loop(Arc::downgrade(self)));
        }
        log::info!("Notification aggregator started");

        self.load_notifications(LoadOptions::init()).await
    }

    /// Unmount: cancel both timers and drop any response still in flight.
    pub fn stop(&self) {
        self.mounted.store(false, Ordering::SeqCst);
        self.inner.lock().pending_push = None;
        let mut timers = self.timers.lock();
        timers.started = false;
        timers.next_push = None;
        timers.fired = None;
        if let Some(handle) = timers.poll.take() {
            handle.abort();
        }
        if let Some(handle) = timers.schedule.take() {
            handle.abort();
        }
        log::info!("Notification aggregator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.timers.lock().started
    }

    /// When the next 08/16 push is due, if the schedule timer is armed.
    pub fn next_push_at(&self) -> Option<DateTime<Utc>> {
        self.timers.lock().next_push
    }

    // -----------------------------------------------------------------------
    // Load cycle
    // -----------------------------------------------------------------------

    pub async fn load_notifications(self: &Arc<Self>, options: LoadOptions) -> LoadOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("Notification load ({:?}) skipped: already in flight", options.reason);
            return LoadOutcome::InFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);

        if !options.force && self.recently_loaded() {
            return LoadOutcome::Throttled;
        }

        let started_at = self.clock.now();
        let snapshot = fetch_all(self.source.as_ref()).await;

        if !self.mounted.load(Ordering::SeqCst) {
            log::debug!("Notification load finished after stop; discarding");
            return LoadOutcome::Discarded;
        }

        let now = self.clock.now();

        if snapshot.all_failed() {
            {
                let mut inner = self.inner.lock();
                inner.error = Some(LOAD_ERROR_MESSAGE.to_string());
                inner.notifications.clear();
            }
            log::warn!("Notification load failed: every source is unavailable");
            self.reschedule();
            return LoadOutcome::Failed;
        }

        let today = local_date(now, self.settings.tz);
        let derived = derive_notifications(&snapshot, today, self.settings.quota_fallback);

        let report = {
            let mut inner = self.inner.lock();

            let dismissed = DismissalMap::load(self.store.as_ref(), now.timestamp_millis());
            let list: Vec<Notification> = derived
                .into_iter()
                .filter(|n| !dismissed.contains(&n.id))
                .collect();

            let fresh: Vec<Notification> = inner
                .signatures
                .diff_and_replace(&list)
                .into_iter()
                .cloned()
                .collect();
            let first_load = inner.loads_completed == 0;

            let push_key = match inner.pending_push.take() {
                Some(trigger) => Some(slot_key(
                    local_date(trigger.at, self.settings.tz),
                    trigger.slot,
                )),
                None => match (options.reason, options.slot) {
                    (LoadReason::Schedule, Some(slot)) => Some(slot_key(today, slot)),
                    _ => None,
                },
            };

            let toasts = match push_key {
                Some(key) => self.push_slot(&mut inner, &list, &key, now),
                None if !first_load && in_ambient_window(now, self.settings.tz) => {
                    self.announce_changes(&mut inner, &fresh, now)
                }
                None => Vec::new(),
            };

            let report = LoadReport {
                total: list.len(),
                fresh: fresh.len(),
                toasts,
            };
            inner.notifications = list;
            inner.error = None;
            inner.last_loaded_at = Some(started_at);
            inner.loads_completed += 1;
            report
        };

        log::debug!(
            "Notifications loaded ({:?}): {} total, {} new or changed, {} toasts",
            options.reason,
            report.total,
            report.fresh,
            report.toasts.len()
        );

        self.reschedule();
        LoadOutcome::Loaded(report)
    }

    /// A queued slot push is never throttled.
    fn recently_loaded(&self) -> bool {
        let last = {
            let inner = self.inner.lock();
            if inner.pending_push.is_some() {
                return false;
            }
            inner.last_loaded_at
        };
        match last {
            Some(last) => {
                (self.clock.now() - last).num_milliseconds() < MIN_REFETCH_MS - REFETCH_SLACK_MS
            }
            None => false,
        }
    }

    /// Slot timer fired: queue the push, then load. If another load is in
    /// flight it performs the queued push when it completes.
    async fn fire_slot(self: &Arc<Self>, trigger: Trigger) {
        self.timers.lock().fired = Some(trigger.at);
        self.inner.lock().pending_push = Some(trigger);
        let outcome = self
            .load_notifications(LoadOptions::schedule(trigger.slot))
            .await;
        if outcome == LoadOutcome::InFlight {
            log::debug!(
                "Slot {} push deferred to the load in flight",
                trigger.slot.as_str()
            );
        }
    }

    /// Scheduled push: up to three not-yet-sent notifications for this slot,
    /// each marked sent right after it is shown, plus one overflow summary.
    fn push_slot(
        &self,
        inner: &mut Inner,
        list: &[Notification],
        key: &str,
        now: DateTime<Utc>,
    ) -> Vec<Toast> {
        let mut sent = SentSlotMap::load(self.store.as_ref());

        let pending: Vec<&Notification> = list.iter().filter(|n| !sent.was_sent(&n.id, key)).collect();
        let mut toasts = Vec::new();

        for notification in pending.iter().take(MAX_SCHEDULED_TOASTS) {
            let toast = Toast::for_notification(notification);
            self.toaster.show(&toast);
            sent.mark_sent(&notification.id, key);
            inner.last_toast_at.insert(notification.id.clone(), now);
            toasts.push(toast);
        }

        if pending.len() > MAX_SCHEDULED_TOASTS {
            let extra = pending.len() - MAX_SCHEDULED_TOASTS;
            let title = if extra == 1 {
                "1 notificación más".to_string()
            } else {
                format!("{} notificaciones más", extra)
            };
            let toast = Toast::summary(
                title,
                "Abre la campana para verlas todas.".to_string(),
                pending.get(MAX_SCHEDULED_TOASTS).copied(),
            );
            self.toaster.show(&toast);
            toasts.push(toast);
        }

        sent.save(self.store.as_ref());
        if !toasts.is_empty() {
            log::info!("Slot {} push: {} toasts", key, toasts.len());
        }
        toasts
    }

    /// Ambient toast for new/changed notifications, subject to the
    /// per-notification cooldown. `fresh` is in list order, so the first
    /// entry is the highest priority.
    fn announce_changes(
        &self,
        inner: &mut Inner,
        fresh: &[Notification],
        now: DateTime<Utc>,
    ) -> Vec<Toast> {
        let Some(top) = fresh.first() else {
            return Vec::new();
        };

        if let Some(last) = inner.last_toast_at.get(&top.id) {
            if (now - *last).num_seconds() < TOAST_COOLDOWN_SECS {
                log::debug!("Toast for {} suppressed by cooldown", top.id);
                return Vec::new();
            }
        }

        let toast = if fresh.len() == 1 {
            Toast::for_notification(top)
        } else {
            Toast::summary(
                format!("{} notificaciones nuevas o actualizadas", fresh.len()),
                format!("La más importante: {}", top.title),
                Some(top),
            )
        };
        self.toaster.show(&toast);
        inner.last_toast_at.insert(top.id.clone(), now);
        vec![toast]
    }

    /// Re-arm the single schedule timer for the next slot boundary.
    fn reschedule(self: &Arc<Self>) {
        let mut timers = self.timers.lock();
        if !timers.started {
            return;
        }
        if let Some(handle) = timers.schedule.take() {
            handle.abort();
        }

        // Never re-arm a boundary that already fired, even if the clock reads
        // slightly before it when the timer wakes
        let now = self.clock.now();
        let from = timers.fired.map_or(now, |fired| fired.max(now));
        let Some(trigger) = next_trigger(from, self.settings.tz) else {
            timers.next_push = None;
            return;
        };
        let delay = duration_until(trigger.at, now);
        log::debug!(
            "Next notification push at {} (slot {})",
            trigger.at,
            trigger.slot.as_str()
        );

        timers.next_push = Some(trigger.at);
        timers.schedule = Some(spawn_slot_timer(Arc::downgrade(self), delay, trigger));
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    /// Dismiss locally: remembered for 30 days, removed from the current list.
    /// Returns false for an empty id.
    pub fn dismiss_notification(&self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            log::warn!("Ignoring dismissal with an empty notification id");
            return false;
        }

        let now_ms = self.clock.now().timestamp_millis();
        let mut inner = self.inner.lock();
        let mut dismissed = DismissalMap::load(self.store.as_ref(), now_ms);
        dismissed.dismiss(id, now_ms);
        dismissed.save(self.store.as_ref());
        inner.notifications.retain(|n| n.id != id);
        true
    }

    /// Dismiss, close both bell surfaces, then navigate to the target.
    pub fn handle_navigate(&self, notification: &Notification) {
        self.dismiss_notification(&notification.id);
        self.inner.lock().bell = BellState::default();
        self.navigator.navigate(&notification.href);
    }

    pub async fn open_dropdown(self: &Arc<Self>) -> LoadOutcome {
        self.inner.lock().bell.dropdown_open = true;
        self.load_notifications(LoadOptions::ui()).await
    }

    pub fn close_dropdown(&self) {
        self.inner.lock().bell.dropdown_open = false;
    }

    pub async fn open_dialog(self: &Arc<Self>) -> LoadOutcome {
        self.inner.lock().bell.dialog_open = true;
        self.load_notifications(LoadOptions::ui()).await
    }

    pub fn close_dialog(&self) {
        self.inner.lock().bell.dialog_open = false;
    }

    // -----------------------------------------------------------------------
    // View state
    // -----------------------------------------------------------------------

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().notifications.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.lock().notifications.len()
    }

    pub fn bell_state(&self) -> BellState {
        self.inner.lock().bell
    }

    pub fn preview(&self) -> Vec<Notification> {
        bell::preview(&self.inner.lock().notifications).to_vec()
    }

    pub fn grouped(&self) -> Grouped {
        bell::group(&self.inner.lock().notifications)
    }

    pub fn render_dropdown(&self) -> String {
        let inner = self.inner.lock();
        bell::render_dropdown(&inner.notifications, inner.error.as_deref())
    }

    pub fn render_dialog(&self) -> String {
        let inner = self.inner.lock();
        bell::render_dialog(&inner.notifications, inner.error.as_deref())
    }
}

impl Drop for NotificationAggregator {
    fn drop(&mut self) {
        let timers = self.timers.get_mut();
        for handle in [timers.poll.take(), timers.schedule.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

fn spawn_poll_loop(aggregator: Weak<NotificationAggregator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let Some(aggregator) = aggregator.upgrade() else {
                break;
            };
            aggregator.load_notifications(LoadOptions::poll()).await;
        }
    })
}

fn spawn_slot_timer(
    aggregator: Weak<NotificationAggregator>,
    delay: Duration,
    trigger: Trigger,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(aggregator) = aggregator.upgrade() {
            aggregator.fire_slot(trigger).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::Notify;

    use crate::error::NotifyError;
    use crate::scheduler::testing::ManualClock;
    use crate::siga::{
        IncompleteRecord, SelectionTestRecord, TestStatus, TrackingRecord, TrackingStats,
    };
    use crate::storage::MemoryStore;
    use crate::types::Slot;

    const BOGOTA: Tz = chrono_tz::America::Bogota;

    fn at(d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
        BOGOTA
            .with_ymd_and_hms(2026, 10, d, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[derive(Default)]
    struct FakeData {
        tracking: Option<Vec<TrackingRecord>>,
        stats: Option<TrackingStats>,
        incomplete: Option<Vec<IncompleteRecord>>,
        tests: Option<Vec<SelectionTestRecord>>,
    }

    struct FakeSource {
        data: parking_lot::Mutex<FakeData>,
        calls: AtomicUsize,
        /// While set, tracking fetches wait for a notification
        gate: parking_lot::Mutex<Option<Arc<Notify>>>,
        latency: parking_lot::Mutex<Duration>,
    }

    fn unavailable() -> NotifyError {
        NotifyError::Network("connection refused".to_string())
    }

    #[async_trait]
    impl NotificationSource for FakeSource {
        async fn fetch_tracking(&self) -> Result<Vec<TrackingRecord>, NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let latency = *self.latency.lock();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            self.data.lock().tracking.clone().ok_or_else(unavailable)
        }

        async fn fetch_stats(&self) -> Result<TrackingStats, NotifyError> {
            self.data.lock().stats.ok_or_else(unavailable)
        }

        async fn fetch_incomplete(&self) -> Result<Vec<IncompleteRecord>, NotifyError> {
            self.data.lock().incomplete.clone().ok_or_else(unavailable)
        }

        async fn fetch_selection_tests(&self) -> Result<Vec<SelectionTestRecord>, NotifyError> {
            self.data.lock().tests.clone().ok_or_else(unavailable)
        }
    }

    #[derive(Default)]
    struct RecordingToaster {
        shown: parking_lot::Mutex<Vec<Toast>>,
    }

    impl Toaster for RecordingToaster {
        fn show(&self, toast: &Toast) {
            self.shown.lock().push(toast.clone());
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        visited: parking_lot::Mutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, href: &str) {
            self.visited.lock().push(href.to_string());
        }
    }

    struct Harness {
        agg: Arc<NotificationAggregator>,
        source: Arc<FakeSource>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        toaster: Arc<RecordingToaster>,
        navigator: Arc<RecordingNavigator>,
    }

    fn harness_with(data: FakeData, gate: Option<Arc<Notify>>) -> Harness {
        let source = Arc::new(FakeSource {
            data: parking_lot::Mutex::new(data),
            calls: AtomicUsize::new(0),
            gate: parking_lot::Mutex::new(gate),
            latency: parking_lot::Mutex::new(Duration::ZERO),
        });
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(at(20, 10, 0, 0)));
        let toaster = Arc::new(RecordingToaster::default());
        let navigator = Arc::new(RecordingNavigator::default());

        let agg = NotificationAggregator::new(
            source.clone(),
            store.clone(),
            AggregatorSettings {
                tz: BOGOTA,
                quota_fallback: None,
            },
        )
        .with_clock(clock.clone())
        .with_toaster(toaster.clone())
        .with_navigator(navigator.clone());

        Harness {
            agg: Arc::new(agg),
            source,
            store,
            clock,
            toaster,
            navigator,
        }
    }

    fn harness(data: FakeData) -> Harness {
        harness_with(data, None)
    }

    fn incomplete(id: &str, name: &str, fields: &[&str]) -> IncompleteRecord {
        IncompleteRecord {
            id: id.to_string(),
            name: Some(name.to_string()),
            missing_fields: fields.iter().map(|f| f.to_string()).collect(),
            incomplete: None,
        }
    }

    fn only_incomplete(records: Vec<IncompleteRecord>) -> FakeData {
        FakeData {
            incomplete: Some(records),
            ..Default::default()
        }
    }

    fn five_incomplete() -> FakeData {
        only_incomplete(vec![
            incomplete("1", "Ana", &["eps"]),
            incomplete("2", "Beto", &["eps"]),
            incomplete("3", "Carla", &["eps"]),
            incomplete("4", "Dario", &["eps"]),
            incomplete("5", "Elsa", &["eps"]),
        ])
    }

    fn loaded(outcome: LoadOutcome) -> LoadReport {
        match outcome {
            LoadOutcome::Loaded(report) => report,
            other => panic!("expected a completed load, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_throttle_skips_second_unforced_load() {
        let h = harness(five_incomplete());

        loaded(h.agg.load_notifications(LoadOptions::poll()).await);
        assert_eq!(
            h.agg.load_notifications(LoadOptions::poll()).await,
            LoadOutcome::Throttled
        );
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);

        h.clock.advance(chrono::Duration::seconds(14));
        assert_eq!(
            h.agg.load_notifications(LoadOptions::poll()).await,
            LoadOutcome::Throttled
        );

        h.clock.advance(chrono::Duration::seconds(2));
        loaded(h.agg.load_notifications(LoadOptions::poll()).await);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forced_load_bypasses_throttle() {
        let h = harness(five_incomplete());
        loaded(h.agg.load_notifications(LoadOptions::poll()).await);
        loaded(h.agg.load_notifications(LoadOptions::ui()).await);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_in_flight_load_is_not_queued() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(five_incomplete(), Some(gate.clone()));

        let agg = h.agg.clone();
        let first = tokio::spawn(async move { agg.load_notifications(LoadOptions::ui()).await });
        for _ in 0..50 {
            if h.source.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(
            h.agg.load_notifications(LoadOptions::ui()).await,
            LoadOutcome::InFlight
        );

        gate.notify_one();
        let report = loaded(first.await.unwrap());
        assert_eq!(report.total, 5);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_response_after_stop_is_discarded() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(five_incomplete(), Some(gate.clone()));

        let agg = h.agg.clone();
        let pending = tokio::spawn(async move { agg.load_notifications(LoadOptions::ui()).await });
        for _ in 0..50 {
            if h.source.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        h.agg.stop();
        gate.notify_one();
        assert_eq!(pending.await.unwrap(), LoadOutcome::Discarded);
        assert!(h.agg.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_is_tolerated() {
        let h = harness(FakeData {
            tracking: None,
            stats: None,
            incomplete: Some(vec![incomplete("1", "Ana", &["eps"])]),
            tests: Some(vec![SelectionTestRecord {
                id: "7".to_string(),
                name: Some("Luis".to_string()),
                psychological: Some(TestStatus::Pending),
                technical: None,
                medical: None,
            }]),
        });

        let report = loaded(h.agg.load_notifications(LoadOptions::init()).await);
        assert_eq!(report.total, 2);
        assert_eq!(h.agg.error(), None);
    }

    #[tokio::test]
    async fn test_total_failure_sets_error() {
        let h = harness(five_incomplete());
        loaded(h.agg.load_notifications(LoadOptions::init()).await);
        assert_eq!(h.agg.unread_count(), 5);

        *h.source.data.lock() = FakeData::default();
        assert_eq!(
            h.agg.load_notifications(LoadOptions::ui()).await,
            LoadOutcome::Failed
        );
        assert_eq!(h.agg.error().as_deref(), Some(LOAD_ERROR_MESSAGE));
        assert_eq!(h.agg.unread_count(), 0);
        assert!(h.agg.render_dropdown().contains(LOAD_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn test_dismissed_stays_hidden_until_expiry() {
        let h = harness(five_incomplete());
        loaded(h.agg.load_notifications(LoadOptions::init()).await);

        assert!(h.agg.dismiss_notification("incomplete:3"));
        assert_eq!(h.agg.unread_count(), 4);

        h.clock.advance(chrono::Duration::days(29));
        loaded(h.agg.load_notifications(LoadOptions::ui()).await);
        assert!(h.agg.notifications().iter().all(|n| n.id != "incomplete:3"));

        // Persisted, so a fresh aggregator over the same store also hides it
        let other = harness(five_incomplete());
        other
            .store
            .set(
                super::super::store::DISMISSED_KEY,
                &h.store
                    .get(super::super::store::DISMISSED_KEY)
                    .unwrap()
                    .unwrap(),
            )
            .unwrap();
        other.clock.set(h.clock.now());
        loaded(other.agg.load_notifications(LoadOptions::init()).await);
        assert_eq!(other.agg.unread_count(), 4);

        h.clock.advance(chrono::Duration::days(2));
        loaded(h.agg.load_notifications(LoadOptions::ui()).await);
        assert!(h.agg.notifications().iter().any(|n| n.id == "incomplete:3"));
    }

    #[tokio::test]
    async fn test_dismiss_rejects_empty_id() {
        let h = harness(five_incomplete());
        assert!(!h.agg.dismiss_notification("  "));
        assert_eq!(h.store.get(super::super::store::DISMISSED_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_scheduled_push_dedups_per_slot() {
        let h = harness(five_incomplete());
        h.clock.set(at(20, 8, 0, 0));

        let first = loaded(
            h.agg
                .load_notifications(LoadOptions::schedule(Slot::Morning))
                .await,
        );
        assert_eq!(first.toasts.len(), 4);
        assert_eq!(first.toasts[3].notification_id, None);
        assert_eq!(first.toasts[3].title, "2 notificaciones más");

        let second = loaded(
            h.agg
                .load_notifications(LoadOptions::schedule(Slot::Morning))
                .await,
        );
        assert_eq!(second.toasts.len(), 2);

        let third = loaded(
            h.agg
                .load_notifications(LoadOptions::schedule(Slot::Morning))
                .await,
        );
        assert!(third.toasts.is_empty());

        let mut ids: Vec<String> = h
            .toaster
            .shown
            .lock()
            .iter()
            .filter_map(|t| t.notification_id.clone())
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(total, 5);
        assert_eq!(ids.len(), 5);

        // The afternoon slot is a separate push
        h.clock.set(at(20, 16, 0, 0));
        let afternoon = loaded(
            h.agg
                .load_notifications(LoadOptions::schedule(Slot::Afternoon))
                .await,
        );
        assert_eq!(afternoon.toasts.len(), 4);
    }

    #[tokio::test]
    async fn test_first_load_never_toasts() {
        let h = harness(five_incomplete());
        let report = loaded(h.agg.load_notifications(LoadOptions::init()).await);
        assert_eq!(report.fresh, 5);
        assert!(report.toasts.is_empty());
        assert!(h.toaster.shown.lock().is_empty());
    }

    #[tokio::test]
    async fn test_ambient_toast_for_new_notification() {
        let h = harness(only_incomplete(vec![incomplete("1", "Ana", &["eps"])]));
        loaded(h.agg.load_notifications(LoadOptions::init()).await);

        h.source
            .data
            .lock()
            .incomplete
            .as_mut()
            .unwrap()
            .push(incomplete("2", "Beto", &["documento"]));
        h.clock.advance(chrono::Duration::seconds(15));
        let report = loaded(h.agg.load_notifications(LoadOptions::poll()).await);
        assert_eq!(report.fresh, 1);
        assert_eq!(report.toasts.len(), 1);
        assert_eq!(
            report.toasts[0].notification_id.as_deref(),
            Some("incomplete:2")
        );

        // Unchanged data: nothing to announce
        h.clock.advance(chrono::Duration::seconds(15));
        let report = loaded(h.agg.load_notifications(LoadOptions::poll()).await);
        assert_eq!(report.fresh, 0);
        assert!(report.toasts.is_empty());
    }

    #[tokio::test]
    async fn test_ambient_summary_for_several_changes() {
        let h = harness(only_incomplete(vec![incomplete("1", "Ana", &["eps"])]));
        loaded(h.agg.load_notifications(LoadOptions::init()).await);

        *h.source.data.lock() = five_incomplete();
        let report = loaded(h.agg.load_notifications(LoadOptions::ui()).await);
        assert_eq!(report.fresh, 4);
        assert_eq!(report.toasts.len(), 1);
        assert_eq!(report.toasts[0].title, "4 notificaciones nuevas o actualizadas");
    }

    #[tokio::test]
    async fn test_no_ambient_toast_outside_window() {
        let h = harness(only_incomplete(vec![incomplete("1", "Ana", &["eps"])]));
        h.clock.set(at(20, 17, 30, 0));
        loaded(h.agg.load_notifications(LoadOptions::init()).await);

        *h.source.data.lock() = five_incomplete();
        let report = loaded(h.agg.load_notifications(LoadOptions::ui()).await);
        assert_eq!(report.fresh, 4);
        assert!(report.toasts.is_empty());
    }

    #[tokio::test]
    async fn test_ambient_cooldown_per_notification() {
        let h = harness(only_incomplete(vec![incomplete("1", "Ana", &["eps"])]));
        loaded(h.agg.load_notifications(LoadOptions::init()).await);

        h.source.data.lock().incomplete = Some(vec![incomplete("1", "Ana", &["eps", "correo"])]);
        let report = loaded(h.agg.load_notifications(LoadOptions::ui()).await);
        assert_eq!(report.toasts.len(), 1);

        h.clock.advance(chrono::Duration::seconds(10));
        h.source.data.lock().incomplete = Some(vec![incomplete("1", "Ana", &["correo"])]);
        let report = loaded(h.agg.load_notifications(LoadOptions::ui()).await);
        assert_eq!(report.fresh, 1);
        assert!(report.toasts.is_empty());

        h.clock.advance(chrono::Duration::seconds(25));
        h.source.data.lock().incomplete = Some(vec![incomplete("1", "Ana", &["eps"])]);
        let report = loaded(h.agg.load_notifications(LoadOptions::ui()).await);
        assert_eq!(report.toasts.len(), 1);
    }

    #[tokio::test]
    async fn test_bell_surfaces_force_reload() {
        let h = harness(five_incomplete());
        loaded(h.agg.load_notifications(LoadOptions::poll()).await);

        loaded(h.agg.open_dropdown().await);
        assert!(h.agg.bell_state().dropdown_open);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);

        loaded(h.agg.open_dialog().await);
        let state = h.agg.bell_state();
        assert!(state.dropdown_open && state.dialog_open);
        assert_eq!(h.agg.grouped().info.len(), 5);

        h.agg.close_dropdown();
        assert!(!h.agg.bell_state().dropdown_open);
        assert!(h.agg.bell_state().dialog_open);
        h.agg.close_dialog();
        assert_eq!(h.agg.bell_state(), BellState::default());
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_handle_navigate_dismisses_and_closes() {
        let h = harness(five_incomplete());
        loaded(h.agg.open_dialog().await);

        let target = h.agg.preview()[0].clone();
        h.agg.handle_navigate(&target);

        assert_eq!(h.agg.bell_state(), BellState::default());
        assert!(h.agg.notifications().iter().all(|n| n.id != target.id));
        assert_eq!(h.navigator.visited.lock().as_slice(), &[target.href.clone()]);

        h.clock.advance(chrono::Duration::seconds(20));
        loaded(h.agg.load_notifications(LoadOptions::poll()).await);
        assert_eq!(h.agg.unread_count(), 4);
    }

    #[tokio::test]
    async fn test_start_arms_timers_and_stop_cancels() {
        let h = harness(five_incomplete());

        loaded(h.agg.start().await);
        assert!(h.agg.is_running());
        assert_eq!(h.agg.next_push_at(), Some(at(20, 16, 0, 0)));

        h.agg.stop();
        assert!(!h.agg.is_running());
        assert_eq!(h.agg.next_push_at(), None);
    }

    /// Clock that follows tokio's (pausable) time from a fixed wall-clock origin.
    struct TokioClock {
        base: DateTime<Utc>,
        origin: tokio::time::Instant,
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
        }
    }

    async fn wait_for_calls(source: &FakeSource, calls: usize) {
        for _ in 0..50 {
            if source.calls.load(Ordering::SeqCst) >= calls {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("source never reached {} fetches", calls);
    }

    fn toast_count(h: &Harness) -> usize {
        h.toaster.shown.lock().len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_timer_pushes_at_boundary() {
        let h = harness(five_incomplete());
        h.clock.set(at(20, 7, 59, 50));

        loaded(h.agg.start().await);
        assert_eq!(h.agg.next_push_at(), Some(at(20, 8, 0, 0)));
        assert_eq!(toast_count(&h), 0);

        h.clock.set(at(20, 8, 0, 0));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(toast_count(&h), 4);
        assert_eq!(h.agg.next_push_at(), Some(at(20, 16, 0, 0)));
        let sent = SentSlotMap::load(h.store.as_ref());
        assert!(sent.was_sent("incomplete:1", "2026-10-20:08"));
        h.agg.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_push_waits_for_load_in_flight() {
        let h = harness(five_incomplete());
        h.clock.set(at(20, 7, 59, 50));
        loaded(h.agg.start().await);

        // A bell reload is still fetching when 08:00 arrives
        let gate = Arc::new(Notify::new());
        *h.source.gate.lock() = Some(gate.clone());
        let agg = h.agg.clone();
        let pending = tokio::spawn(async move { agg.load_notifications(LoadOptions::ui()).await });
        wait_for_calls(&h.source, 2).await;

        h.clock.set(at(20, 8, 0, 0));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(toast_count(&h), 0);

        *h.source.gate.lock() = None;
        gate.notify_one();
        let report = loaded(pending.await.unwrap());

        assert_eq!(report.toasts.len(), 4);
        assert_eq!(toast_count(&h), 4);
        assert_eq!(h.agg.next_push_at(), Some(at(20, 16, 0, 0)));

        // The deferred push is not repeated by later ticks
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(toast_count(&h), 4);
        h.agg.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_timer_early_wake_does_not_repeat_slot() {
        let h = harness(five_incomplete());
        h.clock.set(at(20, 7, 59, 50));
        loaded(h.agg.start().await);

        // Wall clock lags the timer by 100 ms when it fires
        h.clock.set(at(20, 7, 59, 59) + chrono::Duration::milliseconds(900));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(toast_count(&h), 4);
        assert_eq!(h.agg.next_push_at(), Some(at(20, 16, 0, 0)));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(toast_count(&h), 4);
        h.agg.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_runs_every_interval() {
        let source = Arc::new(FakeSource {
            data: parking_lot::Mutex::new(five_incomplete()),
            calls: AtomicUsize::new(0),
            gate: parking_lot::Mutex::new(None),
            latency: parking_lot::Mutex::new(Duration::from_millis(200)),
        });
        let clock = Arc::new(TokioClock {
            base: at(20, 10, 0, 0),
            origin: tokio::time::Instant::now(),
        });
        let agg = Arc::new(
            NotificationAggregator::new(
                source.clone(),
                Arc::new(MemoryStore::new()),
                AggregatorSettings {
                    tz: BOGOTA,
                    quota_fallback: None,
                },
            )
            .with_clock(clock)
            .with_toaster(Arc::new(RecordingToaster::default())),
        );

        loaded(agg.start().await);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // Ticks at 15, 30, 45 and 60 s each run a full load despite fetch latency
        tokio::time::sleep(Duration::from_millis(60_500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);

        agg.stop();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_throttle_allows_timer_jitter() {
        let h = harness(five_incomplete());
        loaded(h.agg.load_notifications(LoadOptions::poll()).await);

        h.clock.advance(chrono::Duration::milliseconds(14_800));
        loaded(h.agg.load_notifications(LoadOptions::poll()).await);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);
    }
}
