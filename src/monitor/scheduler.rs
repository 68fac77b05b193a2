use log::debug;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// A cancellable repeating task.
///
/// `arm` and `disarm` are idempotent. The tick handler is awaited before the
/// next tick is considered, and ticks missed while it runs collapse into one,
/// so a slow poll never overlaps the next one. After `disarm` returns no further
/// tick handler is started.
pub struct PollTimer {
    name: &'static str,
    period: Duration,
    task: Mutex<Option<TimerTask>>,
}

struct TimerTask {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PollTimer {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            task: Mutex::new(None),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Starts ticking every `period`, first tick one period from now.
    ///
    /// Returns false if the timer was already armed; the existing handler keeps running.
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&self, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let period = self.period;
        let name = self.name;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                tick().await;
            }
            debug!("{name} timer stopped");
        });

        *task = Some(TimerTask { cancelled, handle });
        debug!("{name} timer armed every {period:?}");
        true
    }

    /// Stops the timer. Returns false if it was not armed.
    pub fn disarm(&self) -> bool {
        let Some(task) = self.task.lock().take() else {
            return false;
        };
        task.cancelled.store(true, Ordering::Release);
        task.handle.abort();
        debug!("{} timer disarmed", self.name);
        true
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Skip-if-busy flag shared between a poll source and whoever does the fetching.
#[derive(Clone, Default)]
pub struct InFlight(Arc<AtomicBool>);

/// Clears the owning [`InFlight`] flag when dropped.
pub struct InFlightGuard(Arc<AtomicBool>);

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the flag busy, or returns `None` if someone already holds it.
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
