use color_eyre::{eyre::eyre, Result};
use sixaxis::config::SessionConfig;
use sixaxis::controller::{
    DeviceSession, EventKinds, HidrawTransport, LogListener, SessionNotice,
};
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = load_config()?;
    let device_path = config.device.path.clone();
    info!(
        "Reading {} from {}",
        config.device.profile.name,
        device_path.display()
    );

    let mut session =
        DeviceSession::new(config).map_err(|e| eyre!("Failed to create session: {}", e))?;
    session.subscribe(EventKinds::all(), LogListener::new(Level::INFO));

    let notices = session.notices();
    let _notice_handle = notices.map(|mut notices| {
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                log_notice(&notice);
            }
        })
    });

    session
        .open(HidrawTransport::new(&device_path))
        .await
        .map_err(|e| eyre!("Failed to open {}: {}", device_path.display(), e))?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, shutting down");
        }
        result = session.join() => {
            if let Err(e) = result {
                error!("Session ended: {}", e);
            }
        }
    }

    session
        .close()
        .await
        .map_err(|e| eyre!("Session ended with error: {}", e))?;
    info!("Session closed");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

// First argument overrides the default config location
fn load_config() -> Result<SessionConfig> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => SessionConfig::load_from(&path),
        None => SessionConfig::load(),
    };
    config.map_err(|e| eyre!("Failed to load configuration: {}", e))
}

fn log_notice(notice: &SessionNotice) {
    match notice {
        SessionNotice::DroppedFrame(e) => warn!("Dropped frame: {}", e),
        SessionNotice::ListenerFailures(failures) => {
            warn!("{} listener(s) failed", failures.len())
        }
        SessionNotice::Reconnecting { attempt, cause } => {
            warn!("Reconnecting (attempt {}): {}", attempt, cause)
        }
        SessionNotice::Reconnected { attempts } => {
            info!("Reconnected after {} attempt(s)", attempts)
        }
        SessionNotice::ConnectionLost { attempts, cause } => {
            error!("Connection lost after {} attempt(s): {}", attempts, cause)
        }
    }
}
