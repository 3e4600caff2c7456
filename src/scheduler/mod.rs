pub mod boundary;

pub use boundary::{Recurrence, ScheduleBoundary};

use crate::config::ScheduleConfig;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// The work the scheduler drives. Implementations poll `cancel` between
/// units of work and return early once it fires.
#[async_trait]
pub trait CycleWorker: Send + Sync {
    async fn morning_parse(&self, cancel: &CancellationToken) -> Result<()>;

    async fn post_step(&self) -> Result<()>;

    async fn incremental_harvest(&self, cancel: &CancellationToken) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    WaitingMorning,
    RunningMorningParse,
    WaitingPostWindow,
    RunningHourlyCycle,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStates {
    pub morning: SchedulerState,
    pub hourly: SchedulerState,
}

struct LoopContext {
    worker: Arc<dyn CycleWorker>,
    clock: Arc<dyn Clock>,
    worker_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    states: Mutex<LoopStates>,
}

impl LoopContext {
    fn set_morning(&self, state: SchedulerState) {
        if let Ok(mut states) = self.states.lock() {
            states.morning = state;
        }
    }

    fn set_hourly(&self, state: SchedulerState) {
        if let Ok(mut states) = self.states.lock() {
            states.hourly = state;
        }
    }

    /// Sleep for `delay` unless stopped first. Returns false when stopped.
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Handle to the running loops.
pub struct Scheduler {
    ctx: Arc<LoopContext>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn both loops.
    pub fn start(
        worker: Arc<dyn CycleWorker>,
        clock: Arc<dyn Clock>,
        schedule: &ScheduleConfig,
    ) -> Result<Self> {
        let morning_at = NaiveTime::from_hms_opt(schedule.morning_hour, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("invalid morning hour {}", schedule.morning_hour))?;

        let ctx = Arc::new(LoopContext {
            worker,
            clock,
            worker_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            states: Mutex::new(LoopStates {
                morning: SchedulerState::WaitingMorning,
                hourly: SchedulerState::WaitingPostWindow,
            }),
        });

        info!(
            "⏰ Scheduler started (morning parse at {:02}:00, posting {:02}:00-{:02}:59)",
            schedule.morning_hour, schedule.window_start, schedule.window_end
        );

        let handles = vec![
            tokio::spawn(morning_loop(
                Arc::clone(&ctx),
                ScheduleBoundary::daily(morning_at),
            )),
            tokio::spawn(hourly_loop(
                Arc::clone(&ctx),
                ScheduleBoundary::hourly(schedule.window_start, schedule.window_end),
            )),
        ];

        Ok(Self { ctx, handles })
    }

    pub fn states(&self) -> LoopStates {
        self.ctx
            .states
            .lock()
            .map(|s| *s)
            .unwrap_or(LoopStates {
                morning: SchedulerState::Terminated,
                hourly: SchedulerState::Terminated,
            })
    }

    /// Cancel pending waits and let the current task finish within `grace`,
    /// then abort whatever is left. Returns true when everything finished in time.
    pub async fn stop(mut self, grace: Duration) -> bool {
        info!("🛑 Stopping scheduler...");
        self.ctx.cancel.cancel();

        let handles = &mut self.handles;
        let joined = tokio::time::timeout(grace, async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    error!("❌ Scheduler loop panicked: {}", e);
                }
            }
        })
        .await;

        let graceful = joined.is_ok();
        if !graceful {
            warn!(
                "⚠️ Scheduler did not stop within {}s, forcing shutdown",
                grace.as_secs()
            );
            for handle in &self.handles {
                handle.abort();
            }
        }

        self.ctx.set_morning(SchedulerState::Terminated);
        self.ctx.set_hourly(SchedulerState::Terminated);
        info!("✅ Scheduler stopped");
        graceful
    }
}

async fn morning_loop(ctx: Arc<LoopContext>, mut boundary: ScheduleBoundary) {
    loop {
        ctx.set_morning(SchedulerState::WaitingMorning);
        let now = ctx.clock.now();
        let fire_at = boundary.next_fire(now);
        let delay = boundary.delay_from(now);
        info!("🌅 Next morning parse in {}", format_delay(delay));

        if !ctx.wait(delay).await {
            break;
        }
        boundary.mark_fired(fire_at);

        let _guard = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            guard = ctx.worker_lock.lock() => guard,
        };

        ctx.set_morning(SchedulerState::RunningMorningParse);
        info!("🌅 Morning parse started");

        match ctx.worker.morning_parse(&ctx.cancel).await {
            Ok(()) => info!("✅ Morning parse finished"),
            Err(e) => error!("❌ Morning parse failed: {:#}", e),
        }

        if ctx.cancel.is_cancelled() {
            break;
        }
    }
    ctx.set_morning(SchedulerState::Terminated);
}

async fn hourly_loop(ctx: Arc<LoopContext>, mut boundary: ScheduleBoundary) {
    loop {
        ctx.set_hourly(SchedulerState::WaitingPostWindow);
        let now = ctx.clock.now();
        let fire_at = boundary.next_fire(now);
        let delay = boundary.delay_from(now);
        info!("⏰ Next hourly cycle in {}", format_delay(delay));

        if !ctx.wait(delay).await {
            break;
        }
        boundary.mark_fired(fire_at);

        if !boundary.is_active(fire_at) {
            info!("🌙 {}:00 is outside the posting window, skipping", fire_at.format("%H"));
            continue;
        }

        let _guard = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            guard = ctx.worker_lock.lock() => guard,
        };

        ctx.set_hourly(SchedulerState::RunningHourlyCycle);
        info!("⏰ Hourly cycle started");

        if let Err(e) = ctx.worker.post_step().await {
            error!("❌ Post step failed: {:#}", e);
        }

        if ctx.cancel.is_cancelled() {
            break;
        }

        match ctx.worker.incremental_harvest(&ctx.cancel).await {
            Ok(()) => info!("✅ Hourly cycle finished"),
            Err(e) => error!("❌ Incremental harvest failed: {:#}", e),
        }

        if ctx.cancel.is_cancelled() {
            break;
        }
    }
    ctx.set_hourly(SchedulerState::Terminated);
}

fn format_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
