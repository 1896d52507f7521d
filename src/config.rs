use serde::Deserialize;
use std::path::PathBuf;

/// All paths and concurrency widths for one run.
///
/// There is no process-wide state: the config is built once in `main`
/// and passed by reference to every component constructor.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Root holding one directory per scene.
    #[serde(default = "default_scene_root")]
    pub scene_root: PathBuf,
    /// Root under which the reusable sandboxes are provisioned.
    #[serde(default = "default_generated_root")]
    pub generated_root: PathBuf,
    /// ECS6 boilerplate template (base files for legacy sandboxes).
    #[serde(default = "default_ecs6_boilerplate")]
    pub ecs6_boilerplate: PathBuf,
    /// ECS7 boilerplate template (base files for next-dialect sandboxes).
    #[serde(default = "default_ecs7_boilerplate")]
    pub ecs7_boilerplate: PathBuf,
    /// JSON list of external repositories to clone before scanning.
    /// The acquisition phase is skipped when the file does not exist.
    #[serde(default = "default_repository_list")]
    pub repository_list: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Sandboxes provisioned per dialect; also the per-dialect build
    /// concurrency, since each templated build borrows one sandbox.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Width of the network-bound acquisition phase.
    #[serde(default = "default_clone_concurrency")]
    pub clone_concurrency: usize,
}

fn default_scene_root() -> PathBuf {
    PathBuf::from("test-scenes")
}

fn default_generated_root() -> PathBuf {
    PathBuf::from("generated/scene")
}

fn default_ecs6_boilerplate() -> PathBuf {
    PathBuf::from("boilerplate/ecs6")
}

fn default_ecs7_boilerplate() -> PathBuf {
    PathBuf::from("boilerplate/ecs7")
}

fn default_repository_list() -> PathBuf {
    PathBuf::from("scenes-repository-list.json")
}

fn default_pool_size() -> usize {
    3
}

fn default_clone_concurrency() -> usize {
    10
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scene_root: default_scene_root(),
            generated_root: default_generated_root(),
            ecs6_boilerplate: default_ecs6_boilerplate(),
            ecs7_boilerplate: default_ecs7_boilerplate(),
            repository_list: default_repository_list(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            clone_concurrency: default_clone_concurrency(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${SCENE_ROOT}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
