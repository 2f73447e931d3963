use anyhow::{bail, Context, Result};
use notifier_broker::{names, Watcher};
use tokio::signal::unix::{signal, SignalKind};

pub fn run(notify_parent: bool) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().context("Failed to initialize tokio runtime")?;
    rt.block_on(serve(notify_parent))
}

async fn serve(notify_parent: bool) -> Result<()> {
    let con = zbus::Connection::session().await.context("Failed to connect to the session bus")?;
    let is_owner = Watcher::new().attach_to(&con).await.context("Failed to start the StatusNotifierWatcher")?;
    if !is_owner {
        bail!("{} is already owned by another process", names::WATCHER_BUS);
    }
    log::info!("serving {} at {}", names::WATCHER_BUS, names::WATCHER_OBJECT);

    if notify_parent {
        let parent = nix::unistd::getppid();
        nix::sys::signal::kill(parent, nix::sys::signal::Signal::SIGCONT)
            .with_context(|| format!("Failed to notify parent process {}", parent))?;
    }

    let mut terminate = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    log::info!("shutting down");
    Ok(())
}
