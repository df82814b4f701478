//! Bounded worker pool shared by every restore phase
//!
//! One semaphore is sized when the daemon starts restoring and reused for
//! each phase. A phase submits one job per unit of work and `run` only
//! returns once every job has finished, which is the barrier between phases.

use std::future::Future;
use std::sync::Arc;

use nix::sys::resource::{getrlimit, Resource};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Parallel jobs allowed per CPU
pub const JOBS_PER_CPU: usize = 128;

/// Open files each job is expected to hold at once
const FD_OVERHEAD: usize = 2;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    sem: Arc<Semaphore>,
    limit: usize,
}

impl WorkerPool {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            sem: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Pool sized for `units` jobs on this machine
    pub fn for_units(units: usize) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(adjust_parallel_limit(units, JOBS_PER_CPU * cpus))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `work` for every item and wait for all of them
    pub async fn run<I, T, F, Fut>(&self, items: I, work: F)
    where
        I: IntoIterator<Item = T>,
        F: Fn(T) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.run_inner(items, work, None).await
    }

    /// Like [`run`](Self::run), but jobs still waiting for a slot are dropped
    /// once `cancel` fires
    pub async fn run_cancellable<I, T, F, Fut>(&self, cancel: &CancellationToken, items: I, work: F)
    where
        I: IntoIterator<Item = T>,
        F: Fn(T) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.run_inner(items, work, Some(cancel.clone())).await
    }

    async fn run_inner<I, T, F, Fut>(&self, items: I, work: F, cancel: Option<CancellationToken>)
    where
        I: IntoIterator<Item = T>,
        F: Fn(T) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = JoinSet::new();

        for item in items {
            let sem = Arc::clone(&self.sem);
            let job = work(item);
            let cancel = cancel.clone();
            jobs.spawn(async move {
                let permit = match cancel {
                    Some(token) => tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        permit = sem.acquire_owned() => permit,
                    },
                    None => sem.acquire_owned().await,
                };
                let Ok(_permit) = permit else {
                    return;
                };
                job.await;
            });
        }

        while let Some(res) = jobs.join_next().await {
            if let Err(e) = res {
                log::error!("Restore job failed: {}", e);
            }
        }
    }
}

/// Scale the parallelism limit down to the work available and to what
/// RLIMIT_NOFILE can sustain
pub fn adjust_parallel_limit(units: usize, limit: usize) -> usize {
    let soft = match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, _)) => Some(usize::try_from(soft).unwrap_or(usize::MAX)),
        Err(e) => {
            log::warn!(
                "Couldn't read RLIMIT_NOFILE to double-check startup parallelism: {}",
                e
            );
            None
        }
    };
    parallel_limit(units, limit, soft)
}

fn parallel_limit(units: usize, limit: usize, soft_nofile: Option<usize>) -> usize {
    let mut limit = limit.max(1);

    if let Some(soft) = soft_nofile {
        let enough_for_units = soft > FD_OVERHEAD.saturating_mul(units);
        let enough_for_limit = soft > FD_OVERHEAD.saturating_mul(limit);
        if !enough_for_units && !enough_for_limit {
            log::warn!(
                "Open file limit ({}) is far too small, consider raising it to at least {}",
                soft,
                FD_OVERHEAD.saturating_mul(limit)
            );
            limit = (soft / FD_OVERHEAD).max(1);
        }
    }

    limit.min(units.max(1))
}
