//! Polling events: bounded waits on slow conditions
//!
//! A [`PollingEvent`] checks a condition on a fixed interval until the check
//! reports completion or an absolute deadline passes. Exactly one of the two
//! outcomes happens:
//!
//! - the task calls [`PollContext::event_complete`] from `on_start` or
//!   `on_tick`, and the event ends as [`PollOutcome::Completed`], or
//! - the deadline passes first, `on_timeout` runs once and the event ends as
//!   [`PollOutcome::TimedOut`].
//!
//! Ticks never overlap: the next tick is only considered after `on_tick`
//! returns. Completing is idempotent, and a deadline that passes after
//! completion has no effect because the event has already returned.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::PollSettings;

// ── Context and outcome ──────────────────────────────────────────────

/// Per-event state handed to every hook
#[derive(Debug)]
pub struct PollContext {
    completed: bool,
    ticks: u64,
    started: Instant,
    interval: Duration,
    timeout: Duration,
}

impl PollContext {
    fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            completed: false,
            ticks: 0,
            started: Instant::now(),
            interval,
            timeout,
        }
    }

    /// Signal that the awaited condition holds. Safe to call repeatedly.
    pub fn event_complete(&mut self) {
        self.completed = true;
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Number of ticks run so far, including the current one
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// How a polling event ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    TimedOut,
}

impl PollOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PollOutcome::Completed)
    }
}

// ── Tasks ────────────────────────────────────────────────────────────

/// The condition a polling event waits on
#[async_trait]
pub trait PollingTask: Send {
    /// Runs once before the first tick.
    async fn on_start(&mut self, _ctx: &mut PollContext) {}

    /// Runs on every tick. Must call `ctx.event_complete()` once the
    /// condition holds; returning alone never completes the event.
    async fn on_tick(&mut self, ctx: &mut PollContext);

    /// Runs once if the deadline passes before completion.
    async fn on_timeout(&mut self, _ctx: &mut PollContext) {}
}

type StartHook<S> = Box<dyn FnOnce(&mut S, &mut PollContext) + Send>;
type TickHook<S> = Box<dyn FnMut(&mut S, &mut PollContext) + Send>;
type TimeoutHook<S> = Box<dyn FnOnce(&mut S, &mut PollContext) + Send>;

/// A polling task assembled from plain hooks over a piece of state.
///
/// ```
/// use muster_provisioner::polling::{PollingEvent, PollingEventConfig};
/// use std::time::Duration;
///
/// let config = PollingEventConfig::new(0u32, |count, ctx| {
///     *count += 1;
///     if *count == 3 {
///         ctx.event_complete();
///     }
/// })
/// .interval(Duration::from_millis(10))
/// .timeout(Duration::from_secs(1));
/// let event = PollingEvent::from_config(config);
/// # drop(event);
/// ```
pub struct PollingEventConfig<S> {
    pub interval: Duration,
    pub timeout: Duration,
    pub state: S,
    pub on_start: Option<StartHook<S>>,
    pub on_tick: TickHook<S>,
    pub on_timeout: Option<TimeoutHook<S>>,
}

impl<S: Send> PollingEventConfig<S> {
    /// Hooks with the default interval and timeout
    pub fn new<F>(state: S, on_tick: F) -> Self
    where
        F: FnMut(&mut S, &mut PollContext) + Send + 'static,
    {
        let defaults = PollSettings::default();
        Self {
            interval: defaults.interval(),
            timeout: defaults.timeout(),
            state,
            on_start: None,
            on_tick: Box::new(on_tick),
            on_timeout: None,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut S, &mut PollContext) + Send + 'static,
    {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn on_timeout<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut S, &mut PollContext) + Send + 'static,
    {
        self.on_timeout = Some(Box::new(hook));
        self
    }
}

/// [`PollingTask`] over the hooks of a [`PollingEventConfig`]
pub struct HookTask<S> {
    state: S,
    on_start: Option<StartHook<S>>,
    on_tick: TickHook<S>,
    on_timeout: Option<TimeoutHook<S>>,
}

impl<S> HookTask<S> {
    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }
}

#[async_trait]
impl<S: Send> PollingTask for HookTask<S> {
    async fn on_start(&mut self, ctx: &mut PollContext) {
        if let Some(hook) = self.on_start.take() {
            hook(&mut self.state, ctx);
        }
    }

    async fn on_tick(&mut self, ctx: &mut PollContext) {
        (self.on_tick)(&mut self.state, ctx);
    }

    async fn on_timeout(&mut self, ctx: &mut PollContext) {
        if let Some(hook) = self.on_timeout.take() {
            hook(&mut self.state, ctx);
        }
    }
}

// ── Event ────────────────────────────────────────────────────────────

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A scheduled wait on a [`PollingTask`]
pub struct PollingEvent<T> {
    interval: Duration,
    timeout: Duration,
    task: T,
}

impl<T: PollingTask> PollingEvent<T> {
    /// Event ticking every `interval`, at least every millisecond.
    pub fn new(interval: Duration, timeout: Duration, task: T) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            timeout,
            task,
        }
    }

    pub fn with_settings(settings: &PollSettings, task: T) -> Self {
        Self::new(settings.interval(), settings.timeout(), task)
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn into_task(self) -> T {
        self.task
    }

    /// Drive the event to its outcome.
    pub async fn run(&mut self) -> PollOutcome {
        let mut ctx = PollContext::new(self.interval, self.timeout);
        let deadline_at = ctx.started + self.timeout;

        self.task.on_start(&mut ctx).await;
        if ctx.is_complete() {
            return PollOutcome::Completed;
        }

        let deadline = time::sleep_until(deadline_at);
        tokio::pin!(deadline);

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    self.task.on_timeout(&mut ctx).await;
                    return PollOutcome::TimedOut;
                }
                _ = ticker.tick() => {
                    ctx.ticks += 1;
                    self.task.on_tick(&mut ctx).await;
                    if ctx.is_complete() {
                        return PollOutcome::Completed;
                    }
                }
            }
        }
    }
}

impl<T: PollingTask + 'static> PollingEvent<T> {
    /// Run the event on its own task.
    pub fn spawn(mut self) -> JoinHandle<PollOutcome> {
        tokio::spawn(async move { self.run().await })
    }
}

impl<S: Send> PollingEvent<HookTask<S>> {
    pub fn from_config(config: PollingEventConfig<S>) -> Self {
        Self::new(
            config.interval,
            config.timeout,
            HookTask {
                state: config.state,
                on_start: config.on_start,
                on_tick: config.on_tick,
                on_timeout: config.on_timeout,
            },
        )
    }
}

// ── Bounded retry ────────────────────────────────────────────────────

/// Result of [`poll_with_retries`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    pub outcome: PollOutcome,
    /// Attempts made, starting at 1
    pub iterations: u32,
}

/// Run a fresh polling event per attempt until one completes or `ceiling`
/// attempts have timed out.
///
/// `factory` receives the 1-based iteration number and builds that
/// attempt's task, so an attempt can redo whatever work precedes the wait.
pub async fn poll_with_retries<T, F>(
    settings: &PollSettings,
    ceiling: u32,
    mut factory: F,
) -> RetryOutcome
where
    T: PollingTask,
    F: FnMut(u32) -> T,
{
    let ceiling = ceiling.max(1);
    let mut iteration = 1;
    loop {
        let mut event = PollingEvent::with_settings(settings, factory(iteration));
        let outcome = event.run().await;
        if outcome.is_completed() || iteration >= ceiling {
            return RetryOutcome {
                outcome,
                iterations: iteration,
            };
        }
        tracing::debug!(iteration, ceiling, "Polling attempt timed out, retrying");
        iteration += 1;
    }
}

/// Poll an async predicate until it holds or the deadline passes.
pub async fn wait_until<F, Fut>(settings: &PollSettings, check: F) -> PollOutcome
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = bool> + Send,
{
    struct Predicate<F>(F);

    #[async_trait]
    impl<F, Fut> PollingTask for Predicate<F>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = bool> + Send,
    {
        async fn on_tick(&mut self, ctx: &mut PollContext) {
            if (self.0)().await {
                ctx.event_complete();
            }
        }
    }

    PollingEvent::with_settings(settings, Predicate(check))
        .run()
        .await
}
