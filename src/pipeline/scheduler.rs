//! Recurring ingestion triggers.
//!
//! Evaluates cron expressions against an injectable [`Clock`] and fires the
//! orchestrator at each scheduled time. State moves `Idle -> Running -> Idle`;
//! [`Scheduler::stop`] prevents future triggers but lets a running trigger
//! finish. Fire times missed while a trigger was running are skipped, not
//! replayed.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{QueryParams, SchedulerConfig};
use crate::pipeline::orchestrator::Orchestrator;
use crate::utils::{Clock, SystemClock};

/// Lifecycle state of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next trigger time
    Idle,
    /// A trigger is in progress
    Running,
    /// Stopped; no further triggers will fire
    Stopped,
}

/// Parse a list of cron expressions.
pub fn parse_schedules(expressions: &[String]) -> Result<Vec<Schedule>> {
    expressions
        .iter()
        .map(|expr| Schedule::from_str(expr).map_err(|e| AppError::cron(expr.as_str(), e)))
        .collect()
}

/// Cron-driven trigger loop.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    schedules: Vec<Schedule>,
    params: QueryParams,
    clock: Arc<dyn Clock>,
    state: watch::Sender<SchedulerState>,
    stop: CancellationToken,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &SchedulerConfig) -> Result<Self> {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Ok(Self {
            orchestrator,
            schedules: parse_schedules(&config.cron)?,
            params: config.query.clone(),
            clock: Arc::new(SystemClock),
            state,
            stop: CancellationToken::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Earliest fire time of any schedule strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&after).next())
            .min()
    }

    /// Next fire time of each schedule, in configuration order.
    pub fn next_runs(&self) -> Vec<DateTime<Utc>> {
        let now = self.clock.now();
        self.schedules
            .iter()
            .filter_map(|s| s.after(&now).next())
            .collect()
    }

    /// Prevent future triggers. A trigger already running completes.
    pub fn stop(&self) {
        self.stop.cancel();
        self.state.send_if_modified(|state| {
            if *state == SchedulerState::Idle {
                *state = SchedulerState::Stopped;
                true
            } else {
                false
            }
        });
        log::info!("Scheduler stop requested");
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Run the trigger loop until stopped.
    pub async fn run(&self) {
        if self.schedules.is_empty() {
            log::warn!("Scheduler has no cron entries, not starting");
            self.state.send_replace(SchedulerState::Stopped);
            return;
        }

        log::info!("Scheduler started with {} cron entries", self.schedules.len());
        let mut cursor = self.clock.now();

        while !self.stop.is_cancelled() {
            let Some(next) = self.next_fire(cursor) else {
                log::warn!("No upcoming trigger times, stopping scheduler");
                break;
            };
            log::info!("Next ingestion trigger at {}", next);

            let wait = (next - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            self.state.send_replace(SchedulerState::Running);
            let summary = self.orchestrator.trigger(&self.params).await;
            // Fire times that passed while the trigger ran are skipped
            cursor = next.max(self.clock.now());
            log::info!(
                "Scheduled trigger at {} finished: {} succeeded, {} failed",
                next,
                summary.succeeded(),
                summary.failed()
            );
            self.state.send_replace(if self.stop.is_cancelled() {
                SchedulerState::Stopped
            } else {
                SchedulerState::Idle
            });
        }

        self.state.send_replace(SchedulerState::Stopped);
        log::info!("Scheduler stopped");
    }

    /// Run the loop as a background task owned by the caller.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::FetchResult;
    use crate::models::{SearchQuery, SourceId};
    use crate::pipeline::orchestrator::tests::orchestrator;
    use crate::services::adapter::tests::{ScriptedAdapter, record};
    use crate::services::{Page, SourceAdapter};
    use crate::storage::PartFilter;
    use crate::utils::clock::TokioClock;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn config(cron: &[&str]) -> SchedulerConfig {
        SchedulerConfig {
            cron: cron.iter().map(|s| s.to_string()).collect(),
            ..SchedulerConfig::default()
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    /// Blocks inside `fetch` until released, then returns one record.
    struct GatedAdapter {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SourceAdapter for GatedAdapter {
        fn name(&self) -> &str {
            "gated"
        }

        fn source_id(&self) -> SourceId {
            SourceId(1)
        }

        fn page_size(&self) -> usize {
            25
        }

        async fn fetch(&self, _: &SearchQuery, _: &CancellationToken) -> FetchResult<Page> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Page {
                records: vec![record(SourceId(1), "A")],
                skipped: 0,
            })
        }
    }

    /// First fetch takes ten minutes; later ones return an empty page at once.
    #[derive(Default)]
    struct SlowFirstAdapter {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for SlowFirstAdapter {
        fn name(&self) -> &str {
            "slow"
        }

        fn source_id(&self) -> SourceId {
            SourceId(1)
        }

        fn page_size(&self) -> usize {
            25
        }

        async fn fetch(&self, _: &SearchQuery, _: &CancellationToken) -> FetchResult<Page> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            Ok(Page::default())
        }
    }

    #[test]
    fn invalid_cron_is_rejected() {
        let err = parse_schedules(&["every day".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::Cron { .. }));
    }

    #[tokio::test]
    async fn next_runs_lists_each_schedule() {
        let orchestrator = Arc::new(orchestrator(vec![], Duration::from_secs(1)));
        let scheduler = Scheduler::new(orchestrator, &config(&["0 0 0 * * *", "0 0 12 * * *"]))
            .unwrap()
            .with_clock(Arc::new(FixedClock(at(2026, 3, 10, 8, 0, 0))));

        assert_eq!(
            scheduler.next_runs(),
            vec![at(2026, 3, 11, 0, 0, 0), at(2026, 3, 10, 12, 0, 0)]
        );
        assert_eq!(
            scheduler.next_fire(at(2026, 3, 10, 8, 0, 0)),
            Some(at(2026, 3, 10, 12, 0, 0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fires_at_scheduled_time() {
        let adapter = Arc::new(ScriptedAdapter::new(1, 25, vec![]));
        let orchestrator = Arc::new(orchestrator(
            vec![adapter.clone()],
            Duration::from_secs(60),
        ));
        let scheduler = Arc::new(
            Scheduler::new(orchestrator, &config(&["0 0 0 * * *"]))
                .unwrap()
                .with_clock(Arc::new(TokioClock::starting_at(at(2026, 1, 1, 23, 59, 0)))),
        );
        let handle = Arc::clone(&scheduler).spawn();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.stop();
        handle.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_the_running_trigger_finish() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let adapter: Arc<dyn SourceAdapter> = Arc::new(GatedAdapter {
            entered: entered.clone(),
            release: release.clone(),
        });
        let orchestrator = Arc::new(orchestrator(vec![adapter], Duration::from_secs(600)));
        let scheduler = Arc::new(
            Scheduler::new(Arc::clone(&orchestrator), &config(&["0 */5 * * * *"]))
                .unwrap()
                .with_clock(Arc::new(TokioClock::starting_at(at(2026, 1, 1, 10, 0, 30)))),
        );
        let mut states = scheduler.subscribe();
        let handle = Arc::clone(&scheduler).spawn();

        entered.notified().await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Running);

        release.notify_one();
        handle.await.unwrap();

        assert_eq!(*states.borrow_and_update(), SchedulerState::Stopped);
        let stored = orchestrator
            .coordinator()
            .count(&PartFilter::default())
            .await
            .unwrap();
        assert_eq!(stored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missed_fire_times_are_skipped() {
        let adapter = Arc::new(SlowFirstAdapter::default());
        let orchestrator = Arc::new(orchestrator(
            vec![adapter.clone()],
            Duration::from_secs(3600),
        ));
        let scheduler = Arc::new(
            Scheduler::new(orchestrator, &config(&["0 * * * * *"]))
                .unwrap()
                .with_clock(Arc::new(TokioClock::starting_at(at(2026, 1, 1, 10, 0, 30)))),
        );
        let handle = Arc::clone(&scheduler).spawn();

        // Fires at 10:01:00 and runs until 10:11:00, past ten scheduled minutes
        tokio::time::sleep(Duration::from_secs(635)).await;
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);

        // The next trigger is the first fire time after the run finished
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);

        scheduler.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stop_before_start_never_triggers() {
        let adapter = Arc::new(ScriptedAdapter::new(1, 25, vec![]));
        let orchestrator = Arc::new(orchestrator(vec![adapter.clone()], Duration::from_secs(1)));
        let scheduler = Scheduler::new(orchestrator, &config(&["* * * * * *"])).unwrap();

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        scheduler.run().await;

        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }
}
