//! Proactive renewal timer.
//!
//! At most one timer is armed at a time. Arming a new one supersedes the
//! previous; clearing the session cancels it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long before expiry a renewal is started.
pub const REFRESH_BUFFER: Duration = Duration::from_millis(60_000);

/// Delay before firing a renewal for a credential valid for `expires_in_secs`.
/// Lifetimes shorter than the buffer fire immediately.
pub fn refresh_delay(expires_in_secs: u64) -> Duration {
    Duration::from_secs(expires_in_secs).saturating_sub(REFRESH_BUFFER)
}

struct ArmedTimer {
    generation: u64,
    fires_at: Instant,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct RefreshScheduler {
    armed: Mutex<Option<ArmedTimer>>,
    generation: AtomicU64,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer that runs `on_fire` once, `refresh_delay(expires_in_secs)`
    /// from now. Any previously armed timer is cancelled.
    pub fn schedule<F, Fut>(self: &Arc<Self>, expires_in_secs: u64, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available; renewal timer not armed");
            return;
        };

        let delay = refresh_delay(expires_in_secs);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let weak: Weak<Self> = Arc::downgrade(self);

        let mut armed = self.lock();
        if let Some(previous) = armed.take() {
            previous.handle.abort();
        }

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach before running so a reschedule from inside `on_fire`
            // does not abort this task.
            match weak.upgrade() {
                Some(scheduler) => {
                    if !scheduler.detach(generation) {
                        return;
                    }
                }
                None => return,
            }
            debug!("Renewal timer fired");
            on_fire().await;
        });

        debug!(delay_ms = delay.as_millis() as u64, "Renewal timer armed");
        *armed = Some(ArmedTimer {
            generation,
            fires_at: Instant::now() + delay,
            handle,
        });
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.lock().take() {
            previous.handle.abort();
            debug!("Renewal timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    pub fn time_until_fire(&self) -> Option<Duration> {
        self.lock()
            .as_ref()
            .map(|t| t.fires_at.saturating_duration_since(Instant::now()))
    }

    fn detach(&self, generation: u64) -> bool {
        let mut armed = self.lock();
        match armed.as_ref() {
            Some(timer) if timer.generation == generation => {
                armed.take();
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ArmedTimer>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(previous) = self
            .armed
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            previous.handle.abort();
        }
    }
}
