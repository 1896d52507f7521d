mod acquire;
mod config;
mod coordinator;
mod error;
mod executor;
mod fsutil;
mod inventory;
mod manifest;
mod pool;
mod toolchain;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::acquire::{RepositoryAcquirer, RepositoryList};
use crate::config::Config;
use crate::coordinator::BuildCoordinator;
use crate::manifest::EcsVersion;
use crate::pool::SandboxPool;
use crate::toolchain::{CommandToolchain, Toolchain};

fn print_help() {
    println!(
        "\
scene-builder v{}

Builds every Decentraland test scene under the scene root, reusing a
bounded pool of pre-provisioned build sandboxes per SDK dialect.

USAGE:
    scene-builder [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/builder.toml]

OPTIONS:
    -v, --verbose    Debug logging (same as RUST_LOG=scene_builder=debug)
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, scene_builder=debug,warn)

EXAMPLES:
    scene-builder                  # defaults, config/builder.toml if present
    scene-builder -v build.toml    # custom config, debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

struct CliArgs {
    verbose: bool,
    config_path: Option<String>,
}

fn parse_args() -> CliArgs {
    let mut args = CliArgs {
        verbose: false,
        config_path: None,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("scene-builder v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--verbose" | "-v" => args.verbose = true,
            other => args.config_path = Some(other.to_string()),
        }
    }
    args
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    // Initialize logging (RUST_LOG wins over the verbosity flag)
    let default_filter = if args.verbose {
        "scene_builder=debug"
    } else {
        "scene_builder=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    // The sole place mapping run outcomes to process exit codes.
    if let Err(e) = run(args).await {
        error!("Build run failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let config = match args.config_path {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(&path)?
        }
        None if std::path::Path::new("config/builder.toml").exists() => {
            info!("Loading configuration from config/builder.toml");
            Config::load("config/builder.toml")?
        }
        None => Config::default(),
    };

    info!("Scene root: {}", config.paths.scene_root.display());
    info!(
        "Sandboxes per dialect: {}, clone concurrency: {}",
        config.build.pool_size, config.build.clone_concurrency
    );

    let toolchain: Arc<dyn Toolchain> = Arc::new(CommandToolchain);

    // ── Acquisition ────────────────────────────────────────────────
    if config.paths.repository_list.exists() {
        let list = RepositoryList::load(&config.paths.repository_list)?;
        RepositoryAcquirer::new(Arc::clone(&toolchain), config.build.clone_concurrency)
            .acquire_all(&config.paths.scene_root, list)
            .await?;
    } else {
        info!(
            "No repository list at {}, skipping acquisition",
            config.paths.repository_list.display()
        );
    }

    // ── Inventory ──────────────────────────────────────────────────
    let scenes = inventory::scan(&config.paths.scene_root)?;
    if scenes.is_empty() {
        info!("Nothing to build");
        return Ok(());
    }

    // ── Sandbox provisioning ───────────────────────────────────────
    let mut pools: HashMap<EcsVersion, Arc<SandboxPool>> = HashMap::new();
    for version in [EcsVersion::Ecs6, EcsVersion::Ecs7] {
        if !scenes.iter().any(|scene| scene.ecs_version == version) {
            continue;
        }
        let boilerplate = match version {
            EcsVersion::Ecs6 => &config.paths.ecs6_boilerplate,
            EcsVersion::Ecs7 => &config.paths.ecs7_boilerplate,
        };
        let pool = SandboxPool::provision(
            version,
            config.build.pool_size,
            boilerplate,
            &config.paths.generated_root,
            toolchain.as_ref(),
        )
        .await?;
        pools.insert(version, Arc::new(pool));
    }

    // ── Build dispatch ─────────────────────────────────────────────
    let coordinator = BuildCoordinator::new(Arc::clone(&toolchain));
    let summary = coordinator.run(scenes, &pools).await?;
    info!(
        "Build phase complete: {} built, {} skipped",
        summary.built, summary.skipped
    );

    // ── Workspace metadata + teardown ──────────────────────────────
    inventory::finalize_workspace(
        &config.paths.scene_root,
        &config.paths.ecs7_boilerplate,
        toolchain.as_ref(),
    )
    .await?;
    fsutil::remove_best_effort(&config.paths.generated_root);

    info!("All scenes built");
    Ok(())
}
