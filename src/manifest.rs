//! JSON surfaces of the scene inventory.
//!
//! Two files identify and shape a scene tree:
//!
//!   scene.json          — marks a directory as a scene; declares the main
//!                         output file, the authoring dialect and the parcel
//!                         coordinates
//!   dcl-workspace.json  — marks a multi-project repository; lists the
//!                         sub-project folders to be flattened into the
//!                         inventory
//!
//! Manifests are rewritten in place during relocation, so unknown fields
//! are preserved through a flattened extra map.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File that marks a directory as a scene.
pub const SCENE_MANIFEST: &str = "scene.json";

/// File that marks a cloned repository as a multi-project workspace.
pub const WORKSPACE_DESCRIPTOR: &str = "dcl-workspace.json";

/// A scene carrying its own dependency manifest is built self-contained.
pub const PACKAGE_MANIFEST: &str = "package.json";

/// Authoring dialect of a scene. The two dialects are mutually
/// incompatible and build against different boilerplate and SDKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcsVersion {
    /// Legacy dialect (`decentraland-ecs`).
    Ecs6,
    /// Next dialect (`@dcl/sdk`), selected by `runtimeVersion: "7"`.
    Ecs7,
}

impl fmt::Display for EcsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsVersion::Ecs6 => write!(f, "ecs6"),
            EcsVersion::Ecs7 => write!(f, "ecs7"),
        }
    }
}

/// A parcel coordinate, serialized as `"x,y"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl FromStr for Coord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, ',');
        let x = parts.next().unwrap_or("").trim();
        let y = parts.next().unwrap_or("").trim();
        match (x.parse(), y.parse()) {
            (Ok(x), Ok(y)) => Ok(Coord { x, y }),
            _ => Err(Error::Manifest(format!("invalid coordinate '{s}'"))),
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Parsed `scene.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SceneManifest {
    /// Relative name of the build artifact (e.g. `game.js`). Required for
    /// a buildable scene, but kept optional here so a corrupt manifest is
    /// reported by the scanner rather than as a deserialization failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(rename = "runtimeVersion", skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<SceneCoords>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The `scene` block: base parcel plus the full parcel list.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SceneCoords {
    pub base: String,
    pub parcels: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SceneManifest {
    /// Reads `scene.json` from a scene directory. Missing or corrupt
    /// manifests are manifest errors, not I/O errors: the file is what
    /// qualifies the directory as a scene in the first place.
    pub fn load(scene_dir: &Path) -> Result<Self> {
        let path = scene_dir.join(SCENE_MANIFEST);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Manifest(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Manifest(format!("cannot parse {}: {e}", path.display()))
        })
    }

    /// Rewrites `scene.json` in place, pretty-printed.
    pub fn save(&self, scene_dir: &Path) -> Result<()> {
        let path = scene_dir.join(SCENE_MANIFEST);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content + "\n")?;
        Ok(())
    }

    /// The declared main output file, or a manifest error naming the scene.
    pub fn require_main(&self, scene_dir: &Path) -> Result<String> {
        self.main.clone().ok_or_else(|| {
            Error::Manifest(format!(
                "scene {} has corrupt scene.json, main is not defined",
                scene_dir.display()
            ))
        })
    }

    /// Dialect rule: `runtimeVersion: "7"` selects ECS7, anything else
    /// (including an absent field) selects the legacy dialect.
    pub fn ecs_version(&self) -> EcsVersion {
        match self.runtime_version.as_deref() {
            Some("7") => EcsVersion::Ecs7,
            _ => EcsVersion::Ecs6,
        }
    }
}

/// Parsed `dcl-workspace.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkspaceDescriptor {
    pub folders: Vec<WorkspaceFolder>,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkspaceFolder {
    pub path: String,
}

impl WorkspaceDescriptor {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(WORKSPACE_DESCRIPTOR);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Manifest(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::Manifest(format!("cannot parse {}: {e}", path.display()))
        })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(WORKSPACE_DESCRIPTOR);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content + "\n")?;
        Ok(())
    }
}
