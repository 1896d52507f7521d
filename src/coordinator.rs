//! Bounded-concurrency dispatch of scene builds.
//!
//! Scenes are partitioned by dialect and each partition runs through a
//! queue whose width equals that dialect's sandbox pool size, so a job
//! that needs a sandbox is guaranteed to get one without waiting on
//! another dialect's traffic.
//!
//! Failure policy: the first failing job poisons the run. New jobs are no
//! longer admitted, already-dispatched builds drain (keeping the pool's
//! acquire/release ledger balanced), and the first error is propagated to
//! the driver, which turns it into a non-zero exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::executor::BuildExecutor;
use crate::inventory::SceneDescriptor;
use crate::manifest::EcsVersion;
use crate::pool::SandboxPool;
use crate::toolchain::Toolchain;

/// Job lifecycle: pending → skipped, or pending → running → built.
/// A failed job is terminal for the whole run, so it has no outcome.
enum JobOutcome {
    /// Artifact already existed; the compiler was never invoked.
    Skipped,
    Built,
    /// Never admitted: an earlier job had already failed.
    Aborted,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub built: usize,
    pub skipped: usize,
}

pub struct BuildCoordinator {
    executor: Arc<BuildExecutor>,
}

impl BuildCoordinator {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            executor: Arc::new(BuildExecutor::new(toolchain)),
        }
    }

    /// Runs every scene exactly once. `pools` must hold a pool for each
    /// dialect present in `scenes`.
    pub async fn run(
        &self,
        scenes: Vec<SceneDescriptor>,
        pools: &HashMap<EcsVersion, Arc<SandboxPool>>,
    ) -> Result<RunSummary> {
        let mut partitions: HashMap<EcsVersion, Vec<SceneDescriptor>> = HashMap::new();
        for scene in scenes {
            partitions.entry(scene.ecs_version).or_default().push(scene);
        }

        let mut summary = RunSummary::default();
        // Dialects run one after the other; within a dialect, jobs run
        // concurrently up to the pool width.
        for version in [EcsVersion::Ecs6, EcsVersion::Ecs7] {
            let Some(partition) = partitions.remove(&version) else {
                continue;
            };
            let pool = pools.get(&version).cloned().ok_or_else(|| {
                Error::Internal(format!("no sandbox pool provisioned for {version}"))
            })?;
            let partial = self.run_partition(partition, pool).await?;
            summary.built += partial.built;
            summary.skipped += partial.skipped;
        }
        Ok(summary)
    }

    async fn run_partition(
        &self,
        scenes: Vec<SceneDescriptor>,
        pool: Arc<SandboxPool>,
    ) -> Result<RunSummary> {
        let width = pool.capacity();
        info!(
            "Dispatching {} {} scenes (concurrency {width})",
            scenes.len(),
            pool.ecs_version()
        );

        let admission = Arc::new(Semaphore::new(width));
        let failed = Arc::new(AtomicBool::new(false));

        let mut jobs = JoinSet::new();
        for scene in scenes {
            let executor = Arc::clone(&self.executor);
            let pool = Arc::clone(&pool);
            let admission = Arc::clone(&admission);
            let failed = Arc::clone(&failed);
            jobs.spawn(run_job(executor, pool, admission, failed, scene));
        }

        let mut summary = RunSummary::default();
        let mut first_error = None;
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(Ok(JobOutcome::Built)) => summary.built += 1,
                Ok(Ok(JobOutcome::Skipped)) => summary.skipped += 1,
                Ok(Ok(JobOutcome::Aborted)) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(Error::Internal(format!("build task panicked: {e}")));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

async fn run_job(
    executor: Arc<BuildExecutor>,
    pool: Arc<SandboxPool>,
    admission: Arc<Semaphore>,
    failed: Arc<AtomicBool>,
    scene: SceneDescriptor,
) -> Result<JobOutcome> {
    let _permit = admission
        .acquire_owned()
        .await
        .map_err(|_| Error::Internal("admission semaphore closed".into()))?;

    if failed.load(Ordering::SeqCst) {
        return Ok(JobOutcome::Aborted);
    }

    // Idempotence: an existing artifact means the scene is already built.
    if scene.artifact_path().exists() {
        info!("Scene '{}' already built, skipping", scene.name);
        return Ok(JobOutcome::Skipped);
    }

    let result = if scene.has_own_package_json {
        executor.build_self_contained(&scene).await
    } else {
        // Admission width equals the pool size, so a sandbox is free by
        // construction; acquire still blocks rather than trusting that.
        match pool.acquire().await {
            Ok(sandbox) => {
                let result = executor.build_in_sandbox(&scene, &sandbox).await;
                // Release on every exit path, success or failure.
                pool.release(sandbox).await;
                result
            }
            Err(e) => Err(e),
        }
    };

    match result {
        Ok(()) => Ok(JobOutcome::Built),
        Err(e) => {
            error!("Scene '{}' failed: {e}", scene.name);
            failed.store(true, Ordering::SeqCst);
            Err(e)
        }
    }
}
