//! External repository acquisition.
//!
//! Clones the listed repositories into the scene root and normalizes
//! them into the flat inventory layout the scanner expects: multi-project
//! workspaces are flattened into sibling scene directories, relocated
//! scenes get their parcel coordinates translated, and version-control
//! metadata is stripped so a clone is indistinguishable from a
//! hand-authored scene directory.
//!
//! Network-bound and bounded: clones run `clone_concurrency` wide. Any
//! single fetch failure is fatal to the whole phase.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use url::Url;

use crate::error::{Error, Result};
use crate::fsutil;
use crate::manifest::{Coord, SceneManifest, WorkspaceDescriptor, WORKSPACE_DESCRIPTOR};
use crate::toolchain::Toolchain;

/// One entry of the repository list. Input-only, immutable.
#[derive(Debug, Deserialize, Clone)]
pub struct RepositorySpec {
    pub url: String,
    /// New base parcel; triggers coordinate relocation after cloning.
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// Declares a multi-project workspace. Advisory: flattening is
    /// driven by the descriptor file actually present in the clone.
    #[serde(default, rename = "isWorkspace")]
    pub is_workspace: bool,
    #[serde(default, rename = "isPortableExperience")]
    pub is_portable_experience: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryList {
    pub repositories: Vec<RepositorySpec>,
}

impl RepositoryList {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Acquisition(format!("cannot read repository list {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Acquisition(format!("cannot parse repository list {}: {e}", path.display()))
        })
    }
}

pub struct RepositoryAcquirer {
    toolchain: Arc<dyn Toolchain>,
    concurrency: usize,
}

impl RepositoryAcquirer {
    pub fn new(toolchain: Arc<dyn Toolchain>, concurrency: usize) -> Self {
        Self {
            toolchain,
            concurrency,
        }
    }

    /// Fetches every listed repository into `scene_root`, one directory
    /// per logical scene. Fail-fast: the first failure stops admission
    /// and is returned once in-flight clones have drained.
    pub async fn acquire_all(&self, scene_root: &Path, list: RepositoryList) -> Result<()> {
        std::fs::create_dir_all(scene_root)?;
        info!(
            "Acquiring {} repositories (concurrency {})",
            list.repositories.len(),
            self.concurrency
        );

        let admission = Arc::new(Semaphore::new(self.concurrency));
        let failed = Arc::new(AtomicBool::new(false));

        let mut fetches = JoinSet::new();
        for spec in list.repositories {
            let toolchain = Arc::clone(&self.toolchain);
            let scene_root = scene_root.to_path_buf();
            let admission = Arc::clone(&admission);
            let failed = Arc::clone(&failed);
            fetches.spawn(async move {
                let _permit = admission
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Internal("acquisition semaphore closed".into()))?;
                if failed.load(Ordering::SeqCst) {
                    return Ok(());
                }
                let result = fetch_repository(toolchain.as_ref(), &scene_root, &spec).await;
                if let Err(e) = &result {
                    error!("Repository {} failed: {e}", spec.url);
                    failed.store(true, Ordering::SeqCst);
                }
                result
            });
        }

        let mut first_error = None;
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(Error::Internal(format!("fetch task panicked: {e}")));
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Clones one repository and normalizes its layout.
async fn fetch_repository(
    toolchain: &dyn Toolchain,
    scene_root: &Path,
    spec: &RepositorySpec,
) -> Result<()> {
    validate_url(&spec.url)?;

    let stem = destination_stem(&spec.url);
    remove_stale_clones(scene_root, &stem);

    // Timestamped destination: collision-free across retries and
    // re-runs of the same list.
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    let dest = scene_root.join(format!("{stem}-{timestamp}"));

    toolchain
        .clone_repo(&spec.url, &dest, spec.branch.as_deref())
        .await?;
    debug!(
        "Cloned {} into {} (workspace: {}, portable: {})",
        spec.url,
        dest.display(),
        spec.is_workspace,
        spec.is_portable_experience
    );

    if dest.join(WORKSPACE_DESCRIPTOR).exists() {
        flatten_workspace(&dest)?;
    } else {
        if let Some(base) = &spec.base {
            relocate_scene(&dest, base)?;
        }
        let git_dir = dest.join(".git");
        if git_dir.exists() {
            std::fs::remove_dir_all(&git_dir)?;
        }
    }
    Ok(())
}

/// Only a secure transport is accepted for external scene sources.
fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|e| Error::Acquisition(format!("repository URL '{url}' is invalid: {e}")))?;
    if parsed.scheme() != "https" {
        return Err(Error::Acquisition(format!(
            "repository {url} is not safe, only https transport is accepted"
        )));
    }
    Ok(())
}

/// Directory-name stem derived from the URL, e.g.
/// `github.com_org_repo` for `https://github.com/org/repo`.
fn destination_stem(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_end_matches('/')
        .replace('/', "_")
}

/// Drops leftovers of earlier runs of the same repository so the
/// inventory never holds two copies of one source.
fn remove_stale_clones(scene_root: &Path, stem: &str) {
    let Ok(entries) = std::fs::read_dir(scene_root) else {
        return;
    };
    let prefix = format!("{stem}-");
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            debug!("Removing stale clone {}", entry.path().display());
            fsutil::remove_best_effort(&entry.path());
        }
    }
}

/// Splits a multi-project clone into sibling scene directories named
/// `<clone>-<subpath>` and deletes the wrapper (its `.git` included).
fn flatten_workspace(dest: &Path) -> Result<()> {
    let descriptor = WorkspaceDescriptor::load(dest)?;
    let parent = dest
        .parent()
        .ok_or_else(|| Error::Internal(format!("{} has no parent", dest.display())))?;
    let dest_name = dest.file_name().unwrap_or_default().to_string_lossy();

    info!(
        "Flattening workspace {} ({} projects)",
        dest.display(),
        descriptor.folders.len()
    );
    for folder in &descriptor.folders {
        let source = dest.join(&folder.path);
        if !source.is_dir() {
            return Err(Error::Acquisition(format!(
                "workspace folder '{}' missing in {}",
                folder.path,
                dest.display()
            )));
        }
        let flat_name = format!("{dest_name}-{}", folder.path.replace(['/', '\\'], "-"));
        std::fs::rename(&source, parent.join(flat_name))?;
    }
    std::fs::remove_dir_all(dest)?;
    Ok(())
}

/// Pure translation of the scene's coordinates: the delta between the
/// override and the current base is added to the base and to every
/// parcel, preserving parcel count and relative shape.
fn relocate_scene(scene_dir: &Path, new_base: &str) -> Result<()> {
    let mut manifest = SceneManifest::load(scene_dir)?;
    let coords = manifest.scene.as_mut().ok_or_else(|| {
        Error::Manifest(format!(
            "scene {} has no coordinates to relocate",
            scene_dir.display()
        ))
    })?;

    let target: Coord = new_base.parse()?;
    let current: Coord = coords.base.parse()?;
    let dx = target.x - current.x;
    let dy = target.y - current.y;

    for parcel in coords.parcels.iter_mut() {
        let coord: Coord = parcel.as_str().parse()?;
        *parcel = Coord {
            x: coord.x + dx,
            y: coord.y + dy,
        }
        .to_string();
    }
    coords.base = target.to_string();

    debug!(
        "Relocated {} to base {new_base} (delta {dx},{dy})",
        scene_dir.display()
    );
    manifest.save(scene_dir)
}
