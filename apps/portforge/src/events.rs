//! Rendering of engine events on the terminal

use portforge_events::{
    AppEvent, BuildEvent, DeployEvent, EventReceiver, FetchEvent, GeneralEvent, SandboxEvent,
    StateEvent,
};
use tracing::debug;

/// Drain the event channel, printing user-relevant lines
pub async fn render(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            AppEvent::General(event) => render_general(&event),
            AppEvent::Fetch(event) => render_fetch(&event),
            AppEvent::Build(event) => render_build(&event),
            AppEvent::Deploy(event) => render_deploy(&event),
            AppEvent::State(event) => render_state(&event),
            AppEvent::Sandbox(event) => render_sandbox(&event),
            AppEvent::Resolver(_) => {}
        }
    }
}

fn render_general(event: &GeneralEvent) {
    match event {
        GeneralEvent::Debug { message } => debug!("{message}"),
        GeneralEvent::Warning { message, context } => match context {
            Some(context) => eprintln!("warning: {message} ({context})"),
            None => eprintln!("warning: {message}"),
        },
        GeneralEvent::Error { message } => eprintln!("error: {message}"),
        GeneralEvent::OperationStarted { operation } => println!(">>> {operation}"),
        GeneralEvent::OperationCompleted { operation, success } => {
            if *success {
                println!("<<< {operation} done");
            } else {
                eprintln!("<<< {operation} failed");
            }
        }
    }
}

fn render_fetch(event: &FetchEvent) {
    match event {
        FetchEvent::Started { url, .. } => println!("  fetching {url}"),
        FetchEvent::CacheHit { url, .. } => println!("  cached   {url}"),
        FetchEvent::Retrying { url, attempt, .. } => {
            eprintln!("  retrying {url} (attempt {attempt})");
        }
        FetchEvent::Completed { url, size, .. } => println!("  fetched  {url} ({size} bytes)"),
        FetchEvent::Failed { url, error } => eprintln!("  failed   {url}: {error}"),
    }
}

fn render_build(event: &BuildEvent) {
    match event {
        BuildEvent::StageStarted { package, stage } => println!("[{package}] {stage}..."),
        BuildEvent::StageCompleted { .. } => {}
        BuildEvent::CommandOutput { package, line } => println!("[{package}] {line}"),
        BuildEvent::HookRunning { package, stage, command } => {
            debug!("[{package}] hook {stage}: {command}");
        }
        BuildEvent::Stripped { package, files } => {
            println!("[{package}] stripped {files} binaries");
        }
        BuildEvent::Packaged { package, version, archive } => {
            println!("[{package}] packaged {version} -> {}", archive.display());
        }
        BuildEvent::Failed { package, stage, error } => {
            eprintln!("[{package}] {stage} failed: {error}");
        }
    }
}

fn render_deploy(event: &DeployEvent) {
    match event {
        DeployEvent::Started { deploy_id, package, version, .. } => {
            println!("[{package}] deploying {version} ({deploy_id})");
        }
        DeployEvent::FilesBackedUp { count, .. } => {
            if *count > 0 {
                println!("  backed up {count} existing files");
            }
        }
        DeployEvent::Completed { package, .. } => println!("[{package}] deployed"),
        DeployEvent::RolledBack { deploy_id, restored } => {
            println!("rolled back {deploy_id} ({restored} files restored)");
        }
        DeployEvent::RollbackFailed { deploy_id, error } => {
            eprintln!("rollback of {deploy_id} failed: {error}");
        }
    }
}

fn render_state(event: &StateEvent) {
    match event {
        StateEvent::PackageInstalled { name, version, .. } => {
            println!("installed {name}-{version}");
        }
        StateEvent::PackageRemoved { name, files_removed } => {
            println!("removed {name} ({files_removed} files)");
        }
    }
}

fn render_sandbox(event: &SandboxEvent) {
    match event {
        SandboxEvent::CleanupCompleted { root, success } if !*success => {
            eprintln!("warning: sandbox cleanup incomplete under {}", root.display());
        }
        _ => {}
    }
}
