//! Cancellable, repeat-bounded delayed actions
//!
//! A [`TimerScheduler`] owns at most one background task. The task waits for the
//! initial delay, then fires its action `count` times, `interval` apart. Each
//! firing runs as its own detached task so that an action may freely cancel or
//! restart the timer that fired it.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

/// Timing of a scheduled action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub count: u32,
}

impl TimerConfig {
    /// Single firing after `delay`
    pub fn once(delay: Duration) -> Self {
        Self {
            interval: Duration::ZERO,
            initial_delay: delay,
            count: 1,
        }
    }

    pub fn repeating(interval: Duration, initial_delay: Duration, count: u32) -> Self {
        Self {
            interval,
            initial_delay,
            count,
        }
    }
}

/// Lifecycle of a timer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Never started, or all firings elapsed
    Idle,
    /// Started, waiting for the first firing
    Scheduled,
    /// Fired at least once, more firings pending
    Running,
    Cancelled,
}

impl TimerState {
    fn as_u8(self) -> u8 {
        match self {
            TimerState::Idle => 0,
            TimerState::Scheduled => 1,
            TimerState::Running => 2,
            TimerState::Cancelled => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => TimerState::Scheduled,
            2 => TimerState::Running,
            3 => TimerState::Cancelled,
            _ => TimerState::Idle,
        }
    }
}

#[derive(Debug, Default)]
struct TimerShared {
    state: AtomicU8,
    fired: AtomicU32,
}

impl TimerShared {
    fn advance(&self, from: TimerState, to: TimerState) {
        let _ = self.state.compare_exchange(
            from.as_u8(),
            to.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// A cancellable delayed action
#[derive(Debug)]
pub struct TimerScheduler {
    name: &'static str,
    config: TimerConfig,
    handle: Option<JoinHandle<()>>,
    shared: Arc<TimerShared>,
}

impl TimerScheduler {
    pub fn new(name: &'static str, config: TimerConfig) -> Self {
        Self {
            name,
            config,
            handle: None,
            shared: Arc::new(TimerShared::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> TimerConfig {
        self.config
    }

    /// Schedule `action`; a no-op returning false while already active.
    ///
    /// The action receives the zero-based iteration number.
    pub fn start<F, Fut>(&mut self, mut action: F) -> bool
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_active() {
            debug!("Timer '{}' already active, ignoring start", self.name);
            return false;
        }

        let shared = Arc::new(TimerShared::default());
        shared
            .state
            .store(TimerState::Scheduled.as_u8(), Ordering::Release);
        self.shared = shared.clone();

        let config = self.config;
        let name = self.name;
        debug!(
            "Timer '{}' scheduled - delay: {:?}, interval: {:?}, count: {}",
            name, config.initial_delay, config.interval, config.count
        );

        self.handle = Some(tokio::spawn(async move {
            sleep(config.initial_delay).await;
            for iteration in 0..config.count {
                if iteration > 0 {
                    sleep(config.interval).await;
                }
                shared.advance(TimerState::Scheduled, TimerState::Running);
                shared.fired.fetch_add(1, Ordering::AcqRel);
                trace!("Timer '{}' firing iteration {}", name, iteration);
                tokio::spawn(action(iteration));
            }
            shared.advance(TimerState::Running, TimerState::Idle);
        }));

        true
    }

    /// Abort pending firings. Safe to call when idle; returns whether anything was pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                self.shared
                    .state
                    .store(TimerState::Cancelled.as_u8(), Ordering::Release);
                debug!("Timer '{}' cancelled", self.name);
                true
            }
            _ => false,
        }
    }

    /// True while firings are still pending
    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn state(&self) -> TimerState {
        let stored = TimerState::from_u8(self.shared.state.load(Ordering::Acquire));
        match stored {
            TimerState::Cancelled => TimerState::Cancelled,
            _ if !self.is_active() => TimerState::Idle,
            other => other,
        }
    }

    /// Number of firings since the last start
    pub fn fired(&self) -> u32 {
        self.shared.fired.load(Ordering::Acquire)
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl FnMut(u32) -> futures::future::Ready<()>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let action = move |iteration| {
            sink.lock().unwrap().push(iteration);
            futures::future::ready(())
        };
        (fired, action)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_bounded_number_of_times() {
        let (fired, action) = recorder();
        let mut timer = TimerScheduler::new(
            "test",
            TimerConfig::repeating(Duration::from_secs(10), Duration::from_secs(5), 3),
        );

        assert_eq!(timer.state(), TimerState::Idle);
        assert!(timer.start(action));
        assert_eq!(timer.state(), TimerState::Scheduled);

        sleep(Duration::from_secs(6)).await;
        assert_eq!(*fired.lock().unwrap(), vec![0]);
        assert_eq!(timer.state(), TimerState::Running);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(*fired.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(timer.fired(), 3);
        assert!(!timer.is_active());
        assert_eq!(timer.state(), TimerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_active_is_noop() {
        let (fired, action) = recorder();
        let (_, other) = recorder();
        let mut timer = TimerScheduler::new("test", TimerConfig::once(Duration::from_secs(5)));

        assert!(timer.start(action));
        assert!(!timer.start(other));

        sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (fired, action) = recorder();
        let mut timer = TimerScheduler::new("test", TimerConfig::once(Duration::from_secs(5)));

        assert!(!timer.cancel(), "cancel on idle timer is safe");

        timer.start(action);
        sleep(Duration::from_secs(2)).await;
        assert!(timer.cancel());
        assert_eq!(timer.state(), TimerState::Cancelled);

        sleep(Duration::from_secs(10)).await;
        assert!(fired.lock().unwrap().is_empty());
        assert!(!timer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_must_be_restarted_explicitly() {
        let (fired, action) = recorder();
        let (fired_again, again) = recorder();
        let mut timer = TimerScheduler::new("test", TimerConfig::once(Duration::from_secs(1)));

        timer.start(action);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.lock().unwrap().len(), 1);
        assert!(!timer.is_active());

        assert!(timer.start(again));
        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired_again.lock().unwrap().len(), 1);
        assert_eq!(timer.fired(), 1);
    }
}
