//! Periodic refresh of the rate table from a rate source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::provider::{RateMap, RateSource};
use crate::state::RateState;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No timer armed, nothing in flight.
    Idle,
    /// A fetch from the rate source is in flight.
    Fetching,
    /// Periodic timer armed, nothing in flight.
    Armed,
}

/// Result of one refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Source answered; valid rates were written.
    Updated {
        applied: usize,
        rejected: usize,
        missing: usize,
    },
    /// Source failed; the table is unchanged.
    Failed { reason: String },
}

impl RefreshOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, RefreshOutcome::Updated { .. })
    }
}

/// What [`RefreshScheduler::initialize`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSummary {
    /// A persisted snapshot was found and merged.
    pub restored: bool,
    /// Outcome of the startup refresh, if one was due.
    pub refresh: Option<RefreshOutcome>,
    /// The periodic timer was armed.
    pub armed: bool,
}

struct SchedulerInner {
    rates: Arc<RateState>,
    source: Arc<dyn RateSource>,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    fetching: AtomicBool,
    refresh_gate: tokio::sync::Mutex<()>,
}

/// Clears the fetching flag even if the refresh future is dropped.
struct FetchingGuard<'a>(&'a AtomicBool);

impl<'a> FetchingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for FetchingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SchedulerInner {
    fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn is_stale(&self) -> bool {
        self.rates.read(|t| t.is_stale(self.interval))
    }

    fn state(&self) -> SchedulerState {
        if self.fetching.load(Ordering::SeqCst) {
            SchedulerState::Fetching
        } else if self.is_armed() {
            SchedulerState::Armed
        } else {
            SchedulerState::Idle
        }
    }

    #[instrument(skip(self), fields(source = self.source.name()))]
    async fn refresh_now(&self) -> RefreshOutcome {
        let _serialized = self.refresh_gate.lock().await;
        let _fetching = FetchingGuard::enter(&self.fetching);

        let (pivot, codes) = self
            .rates
            .read(|t| (t.pivot().clone(), t.codes().cloned().collect::<Vec<_>>()));

        match self.source.fetch_rates(&pivot, &codes).await {
            Ok(fetched) => self.apply(fetched),
            Err(e) => {
                warn!(error = %e, "Rate refresh failed, keeping previous rates");
                RefreshOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn apply(&self, fetched: RateMap) -> RefreshOutcome {
        let (applied, rejected, missing) = self.rates.modify(|table| {
            let codes: Vec<_> = table.codes().cloned().collect();
            let (mut applied, mut rejected, mut missing) = (0, 0, 0);

            for code in &codes {
                match fetched.get(code) {
                    Some(rate) => match table.set(code, *rate) {
                        Ok(()) => applied += 1,
                        Err(e) => {
                            warn!(currency = %code, error = %e, "Rejected fetched rate");
                            rejected += 1;
                        }
                    },
                    None => missing += 1,
                }
            }

            (applied, rejected, missing)
        });

        info!(applied, rejected, missing, "Exchange rates refreshed");
        RefreshOutcome::Updated {
            applied,
            rejected,
            missing,
        }
    }
}

/// Decides when to refresh, fetches, and keeps the periodic timer.
///
/// The timer task only holds a weak reference, and dropping the scheduler
/// aborts it.
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl RefreshScheduler {
    pub fn new(rates: Arc<RateState>, source: Arc<dyn RateSource>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                rates,
                source,
                interval,
                timer: Mutex::new(None),
                fetching: AtomicBool::new(false),
                refresh_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    pub fn is_armed(&self) -> bool {
        self.inner.is_armed()
    }

    /// True when the table was never refreshed or is older than the interval.
    pub fn is_stale(&self) -> bool {
        self.inner.is_stale()
    }

    /// Fetch from the rate source and write the results through.
    ///
    /// Concurrent calls run one after another. Failures are logged and
    /// leave the table exactly as it was.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.inner.refresh_now().await
    }

    /// Persist `auto_update = true` and arm the periodic timer.
    ///
    /// Returns whether a timer is armed. Arming needs a Tokio runtime;
    /// without one the flag is still persisted and a warning is logged.
    pub fn enable_auto_update(&self) -> bool {
        self.inner.rates.modify(|t| t.set_auto_update(true));
        self.arm()
    }

    /// Persist `auto_update = false` and abort the timer task.
    ///
    /// A fetch already in flight is not interrupted.
    pub fn disable_auto_update(&self) {
        self.inner.rates.modify(|t| t.set_auto_update(false));
        if let Some(handle) = self.inner.timer.lock().take() {
            handle.abort();
            info!("Exchange rate auto-update disabled");
        }
    }

    /// Load persisted state, refresh once if stale, and arm if enabled.
    pub async fn initialize(&self) -> InitSummary {
        let restored = self.inner.rates.load_persisted();
        let auto_update = self.inner.rates.read(|t| t.auto_update());

        let refresh = if auto_update && self.is_stale() {
            Some(self.refresh_now().await)
        } else {
            None
        };

        let armed = auto_update && self.enable_auto_update();

        InitSummary {
            restored,
            refresh,
            armed,
        }
    }

    fn arm(&self) -> bool {
        let mut timer = self.inner.timer.lock();
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return true;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime, exchange rate timer not armed");
                return false;
            }
        };

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.interval;
        *timer = Some(runtime.spawn(run_timer(weak, period)));

        info!(period_secs = period.as_secs_f64(), "Exchange rate auto-update armed");
        true
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.timer.lock().take() {
            handle.abort();
        }
    }
}

async fn run_timer(inner: Weak<SchedulerInner>, period: Duration) {
    loop {
        tokio::time::sleep(period).await;

        let Some(inner) = inner.upgrade() else {
            break;
        };

        if !inner.is_armed() {
            break;
        }

        if !inner.is_stale() {
            debug!("Exchange rates still fresh, skipping scheduled refresh");
            continue;
        }

        // Run the fetch as its own task so aborting the timer leaves it to finish.
        let refresh = tokio::spawn(async move { inner.refresh_now().await });
        let _ = refresh.await;
    }
}
