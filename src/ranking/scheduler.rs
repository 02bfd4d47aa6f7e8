//! Scheduler - named periodic refresh tasks with non-reentrancy guards.
//!
//! One task for the on-chain cycle and one per social tier. Each task ticks on
//! its own interval; a tick that arrives while the previous run of the same
//! task is still going is skipped. Shortly after start a catch-up pass runs the
//! on-chain cycle, then the social cycles HIGH, MEDIUM, LOW.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::ranking::service::RankingService;
use crate::types::Tier;

/// A refresh cycle driven by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    OnChain,
    Social(Tier),
}

impl Cycle {
    pub fn name(&self) -> String {
        match self {
            Cycle::OnChain => "on_chain".to_string(),
            Cycle::Social(tier) => format!("social_{}", tier.as_str()),
        }
    }

    fn period(&self, service: &RankingService) -> Duration {
        match self {
            Cycle::OnChain => service.config().on_chain_cycle(),
            Cycle::Social(tier) => service.config().tiers.social_interval(*tier),
        }
    }

    async fn run(&self, service: &RankingService) {
        match self {
            Cycle::OnChain => {
                service.run_on_chain_cycle().await;
            }
            Cycle::Social(tier) => {
                service.run_social_cycle(*tier).await;
            }
        }
    }
}

/// A named task that refuses to run concurrently with itself.
pub struct PeriodicTask {
    cycle: Cycle,
    running: AtomicBool,
}

/// Held while a task runs; clears the running flag on drop.
pub struct TaskGuard {
    task: Arc<PeriodicTask>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.task.running.store(false, Ordering::SeqCst);
    }
}

impl PeriodicTask {
    pub fn new(cycle: Cycle) -> Arc<Self> {
        Arc::new(Self {
            cycle,
            running: AtomicBool::new(false),
        })
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the task. `None` if a previous run still holds it.
    pub fn try_begin(self: &Arc<Self>) -> Option<TaskGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| TaskGuard { task: self.clone() })
    }

    /// Claim the task for one tick, counting the tick as skipped when a
    /// previous run still holds it.
    pub async fn begin_tick(self: &Arc<Self>, service: &RankingService) -> Option<TaskGuard> {
        let guard = self.try_begin();
        if guard.is_none() {
            debug!("{} still running, skipping this tick", self.cycle.name());
            service.metrics().increment_counter("cycles_skipped_total").await;
        }
        guard
    }

    /// Run once unless already running. Returns whether it ran.
    pub async fn run_guarded(self: &Arc<Self>, service: &RankingService) -> bool {
        let Some(_guard) = self.begin_tick(service).await else {
            return false;
        };
        self.cycle.run(service).await;
        true
    }
}

/// Handle to the running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop all periodic tasks and wait for in-flight cycles to finish.
    pub async fn shutdown(self) {
        info!("Stopping ranking scheduler");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Scheduler task ended abnormally: {}", e);
            }
        }
        info!("Ranking scheduler stopped");
    }
}

/// Starts and owns the periodic refresh tasks.
pub struct Scheduler;

impl Scheduler {
    pub fn start(service: Arc<RankingService>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut cycles = vec![Cycle::OnChain];
        for tier in Tier::all() {
            if service.config().tiers.social_eligible(tier) {
                cycles.push(Cycle::Social(tier));
            }
        }
        let tasks: Vec<Arc<PeriodicTask>> = cycles.into_iter().map(PeriodicTask::new).collect();

        let mut handles = Vec::with_capacity(tasks.len() + 1);
        for task in &tasks {
            let period = task.cycle().period(&service);
            info!("Scheduling {} every {:?}", task.cycle().name(), period);
            handles.push(spawn_periodic(service.clone(), task.clone(), period, shutdown_rx.clone()));
        }
        handles.push(spawn_catch_up(service, tasks, shutdown_rx));

        SchedulerHandle { shutdown_tx, handles }
    }
}

fn spawn_periodic(
    service: Arc<RankingService>,
    task: Arc<PeriodicTask>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(guard) = task.begin_tick(&service).await else {
                        continue;
                    };
                    let service = service.clone();
                    let cycle = task.cycle();
                    in_flight = Some(tokio::spawn(async move {
                        let _guard = guard;
                        cycle.run(&service).await;
                    }));
                }
                _ = shutdown.changed() => break,
            }
        }

        if let Some(handle) = in_flight {
            let _ = handle.await;
        }
        debug!("{} task stopped", task.cycle().name());
    })
}

fn spawn_catch_up(
    service: Arc<RankingService>,
    tasks: Vec<Arc<PeriodicTask>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let delay = service.config().bootstrap_delay();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }

        info!("Running startup catch-up refresh");
        for task in &tasks {
            if *shutdown.borrow() {
                return;
            }
            task.run_guarded(&service).await;
        }
        info!("Startup catch-up refresh complete");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_blocks_reentry() {
        let task = PeriodicTask::new(Cycle::OnChain);

        let guard = task.try_begin();
        assert!(guard.is_some());
        assert!(task.is_running());
        assert!(task.try_begin().is_none());

        drop(guard);
        assert!(!task.is_running());
        assert!(task.try_begin().is_some());
    }

    #[test]
    fn test_cycle_names() {
        assert_eq!(Cycle::OnChain.name(), "on_chain");
        assert_eq!(Cycle::Social(Tier::Medium).name(), "social_medium");
    }
}
