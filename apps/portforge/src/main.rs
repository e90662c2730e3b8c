//! portforge - source-based package manager
//!
//! The CLI wires configuration, the event channel, and the engine
//! crates together; every operation goes through the handles built in
//! `setup`.

mod cli;
mod commands;
mod events;
mod setup;

use clap::Parser;
use cli::{Cli, Commands};
use portforge_config::Config;
use portforge_errors::Error;
use setup::Engine;
use std::process;
use tracing::error;

fn main() {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: runtime init failed: {e}");
            process::exit(1);
        }
    };

    init_tracing(cli.global.debug);

    let code = runtime.block_on(run(cli));
    process::exit(code);
}

fn init_tracing(debug: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if debug { "portforge=debug" } else { "portforge=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> i32 {
    let mut config = match Config::load_or_default(&cli.global.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    if let Err(e) = config.merge_env() {
        eprintln!("error: {e}");
        return 1;
    }

    let result = dispatch(cli, &mut config).await;

    // normal-exit counterpart of the signal cleanup: any sandbox still
    // registered (crash-preserved work trees) comes down here
    portforge_sandbox::registry::cleanup_all().await;

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            1
        }
    }
}

async fn dispatch(cli: Cli, config: &mut Config) -> Result<(), Error> {
    // commands that need no engine
    match &cli.command {
        Commands::Repo { .. } | Commands::Logs { .. } => {}
        _ => return dispatch_engine(cli, config.clone()).await,
    }

    match cli.command {
        Commands::Repo { command } => commands::repo(config, &cli.global.config, command).await,
        Commands::Logs { file, bytes } => commands::logs(config, file, bytes).await,
        _ => unreachable!("handled above"),
    }
}

async fn dispatch_engine(cli: Cli, config: Config) -> Result<(), Error> {
    let (tx, rx) = portforge_events::channel();
    let renderer = tokio::spawn(events::render(rx));

    let mut engine = Engine::init(config, tx).await?;
    let result = match cli.command {
        Commands::Scan => commands::scan(&mut engine).await,
        Commands::Search { query } => {
            commands::search(&engine, &query);
            Ok(())
        }
        Commands::Info { pkgref } => commands::info(&engine, &pkgref),
        Commands::Fetch { pkgref } => commands::fetch(&engine, &pkgref).await,
        Commands::Build {
            pkgref,
            keep,
            deploy,
            dry_run,
        } => commands::build(&engine, &pkgref, keep, deploy, dry_run).await,
        Commands::Install { pkgrefs, dry_run } => {
            commands::install(&engine, &pkgrefs, dry_run).await
        }
        Commands::Remove {
            pkgrefs,
            force,
            dry_run,
        } => commands::remove(&engine, &pkgrefs, force, dry_run).await,
        Commands::Upgrade { pkgref } => commands::upgrade(&engine, &pkgref).await,
        Commands::UpgradeAll => commands::upgrade_all(&engine).await,
        Commands::Depclean { apply } => commands::depclean_cmd(&engine, apply).await,
        Commands::Revdep { pkgref } => commands::revdep_cmd(&engine, &pkgref).await,
        Commands::Rollback { deploy_id } => commands::rollback_cmd(&engine, &deploy_id).await,
        Commands::History => commands::history(&engine).await,
        Commands::Repo { .. } | Commands::Logs { .. } => unreachable!("engine-free commands"),
    };

    // close the channel so the renderer drains and stops
    drop(engine);
    let _ = renderer.await;
    result
}
