//! Per-scene build execution.
//!
//! Two strategies, selected by whether the scene ships its own
//! dependency manifest:
//!
//! - **self-contained**: the scene's `package.json` wins; install its
//!   dependencies in place and compile in the scene directory.
//! - **sandboxed**: the scene only carries sources; overlay them onto a
//!   borrowed sandbox that already holds the dialect's boilerplate and
//!   node_modules, compile there, and copy the artifact back.
//!
//! Either way the build is only successful once the declared artifact
//! actually exists in the scene directory.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::inventory::SceneDescriptor;
use crate::manifest::EcsVersion;
use crate::pool::Sandbox;
use crate::toolchain::Toolchain;

/// Files a sandbox keeps across builds; everything else is scrubbed
/// after each job so the next overlay starts template-clean.
const SANDBOX_BASE_FILES: [&str; 5] = [
    "package.json",
    "README.md",
    "tsconfig.example.json",
    ".dclignore",
    "node_modules",
];

/// Compiler configuration template shipped with the boilerplate.
const TSCONFIG_EXAMPLE: &str = "tsconfig.example.json";

/// Active compiler configuration consumed by `dcl build`.
const TSCONFIG: &str = "tsconfig.json";

/// Dependency cache directory created by the installer.
const NODE_MODULES: &str = "node_modules";

/// SDK package every externally-authored scene is expected to declare.
const SDK_PACKAGE_PATH: &str = "node_modules/@dcl/sdk";

/// Pinned pre-release SDK installed when the scene's own dependency set
/// lacks the expected package.
const SDK_NEXT_SPEC: &str = "@dcl/sdk@next";

pub struct BuildExecutor {
    toolchain: Arc<dyn Toolchain>,
}

impl BuildExecutor {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self { toolchain }
    }

    /// Strategy A: the scene declares its own dependencies. Install them
    /// in place, compile in place, then drop the dependency cache.
    pub async fn build_self_contained(&self, scene: &SceneDescriptor) -> Result<()> {
        info!("Building scene '{}' (self-contained)", scene.name);

        self.toolchain.install(&scene.path).await?;

        // Externally-authored scenes sometimes pin SDK versions that no
        // longer resolve; fall back to the pinned pre-release.
        if !scene.path.join(SDK_PACKAGE_PATH).exists() {
            debug!(
                "Scene '{}' did not install the SDK, adding {SDK_NEXT_SPEC}",
                scene.name
            );
            self.toolchain
                .install_package(&scene.path, SDK_NEXT_SPEC)
                .await?;
        }

        self.toolchain.build(&scene.path).await?;

        // Disk hygiene: a run over hundreds of scenes cannot leave a
        // node_modules in each of them.
        fsutil::remove_best_effort(&scene.path.join(NODE_MODULES));

        self.verify_artifact(scene)
    }

    /// Strategy B: compile in a borrowed sandbox and copy the artifact
    /// back. The sandbox is left template-clean for the next job.
    pub async fn build_in_sandbox(&self, scene: &SceneDescriptor, sandbox: &Sandbox) -> Result<()> {
        info!(
            "Building scene '{}' in sandbox {}",
            scene.name,
            sandbox.path.display()
        );

        fsutil::copy_tree(&scene.path, &sandbox.path)?;

        std::fs::copy(
            sandbox.path.join(TSCONFIG_EXAMPLE),
            sandbox.path.join(TSCONFIG),
        )?;
        // ECS7 builds resolve the output name from the manifest on their
        // own; the legacy compiler needs it patched into the config.
        if scene.ecs_version == EcsVersion::Ecs6 {
            patch_out_file(&sandbox.path, &scene.main)?;
        }

        self.toolchain.build(&sandbox.path).await?;

        let built = sandbox.path.join(&scene.main);
        if built.exists() {
            let target = scene.path.join(&scene.main);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&built, &target)?;

            let lib_name = format!("{}.lib", scene.main);
            let built_lib = sandbox.path.join(&lib_name);
            if built_lib.exists() {
                std::fs::copy(&built_lib, scene.path.join(&lib_name))?;
            }
        }

        fsutil::scrub_dir(&sandbox.path, &SANDBOX_BASE_FILES);

        self.verify_artifact(scene)
    }

    /// Post-condition for both strategies: the declared artifact exists.
    fn verify_artifact(&self, scene: &SceneDescriptor) -> Result<()> {
        if scene.path.join(&scene.main).exists() {
            Ok(())
        } else {
            Err(Error::Verification(format!(
                "scene '{}' reported a successful build but {} is missing",
                scene.name, scene.main
            )))
        }
    }
}

/// Points the active compiler configuration at the scene's declared
/// output file.
fn patch_out_file(sandbox_dir: &Path, main: &str) -> Result<()> {
    let path = sandbox_dir.join(TSCONFIG);
    let content = std::fs::read_to_string(&path)?;
    let mut tsconfig: serde_json::Value = serde_json::from_str(&content)?;
    tsconfig["compilerOptions"]["outFile"] = serde_json::Value::String(main.to_string());
    std::fs::write(&path, serde_json::to_string_pretty(&tsconfig)? + "\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Toolchain double: `install` materializes a node_modules tree,
    /// `build` writes the artifact and records what configuration was
    /// active at compile time.
    struct FakeToolchain {
        artifact: &'static str,
        sdk_installed_by_install: bool,
        build_succeeds: bool,
        installed_packages: Mutex<Vec<String>>,
        seen_tsconfigs: Mutex<Vec<Option<String>>>,
        build_dirs: Mutex<Vec<PathBuf>>,
    }

    impl FakeToolchain {
        fn new(artifact: &'static str) -> Self {
            Self {
                artifact,
                sdk_installed_by_install: false,
                build_succeeds: true,
                installed_packages: Mutex::new(Vec::new()),
                seen_tsconfigs: Mutex::new(Vec::new()),
                build_dirs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Toolchain for FakeToolchain {
        async fn clone_repo(&self, _url: &str, _dest: &Path, _branch: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn install(&self, workdir: &Path) -> Result<()> {
            let modules = if self.sdk_installed_by_install {
                workdir.join(SDK_PACKAGE_PATH)
            } else {
                workdir.join(NODE_MODULES).join("left-pad")
            };
            std::fs::create_dir_all(modules).unwrap();
            Ok(())
        }

        async fn install_package(&self, workdir: &Path, package: &str) -> Result<()> {
            self.installed_packages.lock().unwrap().push(package.to_string());
            std::fs::create_dir_all(workdir.join(SDK_PACKAGE_PATH)).unwrap();
            Ok(())
        }

        async fn build(&self, workdir: &Path) -> Result<()> {
            self.build_dirs.lock().unwrap().push(workdir.to_path_buf());
            self.seen_tsconfigs
                .lock()
                .unwrap()
                .push(std::fs::read_to_string(workdir.join(TSCONFIG)).ok());
            if !self.build_succeeds {
                return Err(Error::Build("dcl build exited with code 1".into()));
            }
            let artifact = workdir.join(self.artifact);
            if let Some(parent) = artifact.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&artifact, "// compiled").unwrap();
            std::fs::write(workdir.join(format!("{}.lib", self.artifact)), "// lib").unwrap();
            Ok(())
        }
    }

    fn scene_in(dir: &Path, name: &str, version: EcsVersion, own_package: bool) -> SceneDescriptor {
        let path = dir.join(name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("scene.json"), r#"{"main": "game.js"}"#).unwrap();
        std::fs::write(path.join("game.ts"), "// source").unwrap();
        if own_package {
            std::fs::write(path.join("package.json"), "{}").unwrap();
        }
        SceneDescriptor {
            name: name.to_string(),
            path,
            ecs_version: version,
            main: "game.js".to_string(),
            has_own_package_json: own_package,
        }
    }

    fn sandbox_in(dir: &Path, version: EcsVersion) -> Sandbox {
        let path = dir.join("sandbox-0");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("package.json"), "{}").unwrap();
        std::fs::write(path.join("README.md"), "boilerplate").unwrap();
        std::fs::write(path.join(".dclignore"), "").unwrap();
        std::fs::write(
            path.join(TSCONFIG_EXAMPLE),
            r#"{"compilerOptions": {"module": "amd"}}"#,
        )
        .unwrap();
        std::fs::create_dir_all(path.join("node_modules/@dcl")).unwrap();
        Sandbox {
            path,
            ecs_version: version,
        }
    }

    #[tokio::test]
    async fn test_self_contained_installs_sdk_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene_in(dir.path(), "portable", EcsVersion::Ecs6, true);
        let toolchain = Arc::new(FakeToolchain::new("game.js"));
        let executor = BuildExecutor::new(toolchain.clone());

        executor.build_self_contained(&scene).await.unwrap();

        assert_eq!(
            *toolchain.installed_packages.lock().unwrap(),
            vec![SDK_NEXT_SPEC.to_string()]
        );
        // Compiled in place, artifact present, dependency cache gone.
        assert_eq!(*toolchain.build_dirs.lock().unwrap(), vec![scene.path.clone()]);
        assert!(scene.path.join("game.js").exists());
        assert!(!scene.path.join(NODE_MODULES).exists());
    }

    #[tokio::test]
    async fn test_self_contained_skips_sdk_when_declared() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene_in(dir.path(), "portable", EcsVersion::Ecs6, true);
        let toolchain = Arc::new(FakeToolchain {
            sdk_installed_by_install: true,
            ..FakeToolchain::new("game.js")
        });
        let executor = BuildExecutor::new(toolchain.clone());

        executor.build_self_contained(&scene).await.unwrap();

        assert!(toolchain.installed_packages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_build_patches_out_file_for_ecs6() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene_in(dir.path(), "cube-wave", EcsVersion::Ecs6, false);
        let sandbox = sandbox_in(dir.path(), EcsVersion::Ecs6);
        let toolchain = Arc::new(FakeToolchain::new("game.js"));
        let executor = BuildExecutor::new(toolchain.clone());

        executor.build_in_sandbox(&scene, &sandbox).await.unwrap();

        let seen = toolchain.seen_tsconfigs.lock().unwrap();
        let tsconfig: serde_json::Value =
            serde_json::from_str(seen[0].as_deref().unwrap()).unwrap();
        assert_eq!(tsconfig["compilerOptions"]["outFile"], "game.js");
        // The template's own settings survive the patch.
        assert_eq!(tsconfig["compilerOptions"]["module"], "amd");
    }

    #[tokio::test]
    async fn test_sandbox_build_leaves_ecs7_config_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene_in(dir.path(), "cube-wave-7", EcsVersion::Ecs7, false);
        let sandbox = sandbox_in(dir.path(), EcsVersion::Ecs7);
        let toolchain = Arc::new(FakeToolchain::new("game.js"));
        let executor = BuildExecutor::new(toolchain.clone());

        executor.build_in_sandbox(&scene, &sandbox).await.unwrap();

        let seen = toolchain.seen_tsconfigs.lock().unwrap();
        let tsconfig: serde_json::Value =
            serde_json::from_str(seen[0].as_deref().unwrap()).unwrap();
        assert!(tsconfig["compilerOptions"].get("outFile").is_none());
    }

    #[tokio::test]
    async fn test_sandbox_build_copies_artifact_and_companion_back() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene_in(dir.path(), "cube-wave", EcsVersion::Ecs6, false);
        let sandbox = sandbox_in(dir.path(), EcsVersion::Ecs6);
        let executor = BuildExecutor::new(Arc::new(FakeToolchain::new("game.js")));

        executor.build_in_sandbox(&scene, &sandbox).await.unwrap();

        assert!(scene.path.join("game.js").exists());
        assert!(scene.path.join("game.js.lib").exists());
    }

    #[tokio::test]
    async fn test_sandbox_reset_to_template_clean() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene_in(dir.path(), "cube-wave", EcsVersion::Ecs6, false);
        let sandbox = sandbox_in(dir.path(), EcsVersion::Ecs6);
        let executor = BuildExecutor::new(Arc::new(FakeToolchain::new("game.js")));

        executor.build_in_sandbox(&scene, &sandbox).await.unwrap();

        // Base files and the dependency cache stay; overlay, active
        // config and artifacts are gone.
        for base in SANDBOX_BASE_FILES {
            assert!(sandbox.path.join(base).exists(), "missing {base}");
        }
        assert!(!sandbox.path.join("game.ts").exists());
        assert!(!sandbox.path.join(TSCONFIG).exists());
        assert!(!sandbox.path.join("game.js").exists());
        assert!(!sandbox.path.join("scene.json").exists());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_verification_error() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene_in(dir.path(), "cube-wave", EcsVersion::Ecs6, false);
        let sandbox = sandbox_in(dir.path(), EcsVersion::Ecs6);
        // Compiler "succeeds" but emits a different file than declared.
        let executor = BuildExecutor::new(Arc::new(FakeToolchain::new("other.js")));

        let err = executor.build_in_sandbox(&scene, &sandbox).await.unwrap_err();
        assert!(matches!(err, Error::Verification(_)));
    }

    #[tokio::test]
    async fn test_compiler_failure_is_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let scene = scene_in(dir.path(), "cube-wave", EcsVersion::Ecs6, false);
        let sandbox = sandbox_in(dir.path(), EcsVersion::Ecs6);
        let executor = BuildExecutor::new(Arc::new(FakeToolchain {
            build_succeeds: false,
            ..FakeToolchain::new("game.js")
        }));

        let err = executor.build_in_sandbox(&scene, &sandbox).await.unwrap_err();
        assert!(matches!(err, Error::Build(_)));
        assert!(!scene.path.join("game.js").exists());
    }

    #[tokio::test]
    async fn test_nested_main_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path(), "nested", EcsVersion::Ecs7, false);
        scene.main = "bin/game.js".to_string();
        let sandbox = sandbox_in(dir.path(), EcsVersion::Ecs7);
        let executor = BuildExecutor::new(Arc::new(FakeToolchain::new("bin/game.js")));

        executor.build_in_sandbox(&scene, &sandbox).await.unwrap();

        assert!(scene.path.join("bin/game.js").exists());
    }
}
