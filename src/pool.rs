//! Per-dialect pool of reusable build sandboxes.
//!
//! A sandbox is a pre-provisioned directory holding the dialect's
//! boilerplate template with dependencies already installed, so each
//! templated build only pays for source overlay + compile. The pool owns
//! its sandboxes exclusively: a sandbox is either in the free-set or held
//! by exactly one build, never both.
//!
//! `acquire` parks on a semaphore when the free-set is empty, so the pool
//! stays correct even if a caller dispatches more jobs than sandboxes.

use std::path::{Path, PathBuf};

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::manifest::EcsVersion;
use crate::toolchain::Toolchain;

/// One reusable build directory. Moves between the pool's free-set and a
/// single borrowing build; never cloned, never shared.
#[derive(Debug)]
pub struct Sandbox {
    pub path: PathBuf,
    pub ecs_version: EcsVersion,
}

pub struct SandboxPool {
    ecs_version: EcsVersion,
    capacity: usize,
    slots: Semaphore,
    free: Mutex<Vec<Sandbox>>,
}

impl SandboxPool {
    /// Provisions `capacity` sandboxes under `generated_root`: copy the
    /// dialect's boilerplate into each, then run one dependency install
    /// per sandbox. Installs run concurrently (they are independent
    /// directories); any failure fails provisioning.
    pub async fn provision(
        ecs_version: EcsVersion,
        capacity: usize,
        boilerplate: &Path,
        generated_root: &Path,
        toolchain: &dyn Toolchain,
    ) -> Result<Self> {
        info!("Provisioning {capacity} {ecs_version} sandboxes");

        let provisioned = futures::future::try_join_all((0..capacity).map(|index| async move {
            let path = generated_root.join(format!("scene-{ecs_version}-{index}"));
            std::fs::create_dir_all(&path)?;
            fsutil::copy_tree(boilerplate, &path)?;
            toolchain.install(&path).await?;
            debug!("Sandbox ready: {}", path.display());
            Ok::<Sandbox, Error>(Sandbox { path, ecs_version })
        }))
        .await?;

        Ok(Self {
            ecs_version,
            capacity,
            slots: Semaphore::new(capacity),
            free: Mutex::new(provisioned),
        })
    }

    /// Takes a free sandbox, waiting if all are in use.
    pub async fn acquire(&self) -> Result<Sandbox> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| Error::Internal("sandbox pool semaphore closed".into()))?;
        // The permit's lifetime is carried by the Sandbox itself: release()
        // re-adds it once the sandbox is back in the free-set.
        permit.forget();

        let sandbox = self.free.lock().await.pop().ok_or_else(|| {
            Error::Internal(format!(
                "{} pool handed out a permit with an empty free-set",
                self.ecs_version
            ))
        })?;
        debug!("Acquired sandbox {}", sandbox.path.display());
        Ok(sandbox)
    }

    /// Returns a sandbox to the free-set. Never blocks on pool capacity:
    /// at most `capacity` sandboxes exist, so the push always fits.
    pub async fn release(&self, sandbox: Sandbox) {
        debug!(
            "Released {} sandbox {}",
            sandbox.ecs_version,
            sandbox.path.display()
        );
        self.free.lock().await.push(sandbox);
        self.slots.add_permits(1);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ecs_version(&self) -> EcsVersion {
        self.ecs_version
    }

    /// Number of sandboxes currently in the free-set.
    pub async fn available(&self) -> usize {
        self.free.lock().await.len()
    }
}
