//! Scene inventory: scanning and workspace metadata.
//!
//! A directory immediately under the scene root is a scene iff it holds a
//! `scene.json`. The scanner turns each one into a [`SceneDescriptor`];
//! everything downstream (coordinator, executor) works from descriptors
//! and never re-reads the manifest.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::manifest::{
    EcsVersion, SceneManifest, WorkspaceDescriptor, WorkspaceFolder, PACKAGE_MANIFEST,
    SCENE_MANIFEST,
};
use crate::toolchain::Toolchain;

/// Everything the build phase needs to know about one scene.
/// Identity is the filesystem path; read-only after scanning.
#[derive(Debug, Clone)]
pub struct SceneDescriptor {
    /// Directory name, used in logs and error messages.
    pub name: String,
    pub path: PathBuf,
    pub ecs_version: EcsVersion,
    /// Manifest-declared artifact, relative to the scene directory.
    pub main: String,
    /// Scene ships its own dependency manifest → built self-contained.
    pub has_own_package_json: bool,
}

impl SceneDescriptor {
    /// Where the build artifact must exist after a successful build.
    pub fn artifact_path(&self) -> PathBuf {
        self.path.join(&self.main)
    }
}

/// Enumerates the scene directories under `scene_root`, in name order.
///
/// A qualifying directory with a corrupt manifest (or one without `main`)
/// fails the scan: a half-readable inventory would silently drop scenes.
pub fn scan(scene_root: &Path) -> Result<Vec<SceneDescriptor>> {
    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(scene_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if !entry.path().join(SCENE_MANIFEST).exists() {
            debug!(
                "Skipping {}: no {SCENE_MANIFEST}",
                entry.path().display()
            );
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let mut descriptors = Vec::with_capacity(names.len());
    for name in names {
        let path = scene_root.join(&name);
        let manifest = SceneManifest::load(&path)?;
        let main = manifest.require_main(&path)?;
        descriptors.push(SceneDescriptor {
            ecs_version: manifest.ecs_version(),
            has_own_package_json: path.join(PACKAGE_MANIFEST).exists(),
            main,
            name,
            path,
        });
    }

    info!("Inventory: {} scenes", descriptors.len());
    Ok(descriptors)
}

/// Writes the inventory metadata after a successful build phase: a
/// workspace descriptor listing every scene, plus a shared package.json
/// (taken from the next-dialect boilerplate) with its dependencies
/// installed once, so the whole root opens as a single workspace.
pub async fn finalize_workspace(
    scene_root: &Path,
    ecs7_boilerplate: &Path,
    toolchain: &dyn Toolchain,
) -> Result<()> {
    let folders = scan(scene_root)?
        .into_iter()
        .map(|scene| WorkspaceFolder { path: scene.name })
        .collect();

    let descriptor = WorkspaceDescriptor {
        folders,
        settings: serde_json::Map::new(),
    };
    descriptor.save(scene_root)?;

    std::fs::copy(
        ecs7_boilerplate.join(PACKAGE_MANIFEST),
        scene_root.join(PACKAGE_MANIFEST),
    )?;
    toolchain.install(scene_root).await?;

    info!("Workspace metadata written to {}", scene_root.display());
    Ok(())
}
