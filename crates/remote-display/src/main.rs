mod backend;
mod dispatcher;
mod http;
mod mpv;

use clap::{CommandFactory, Parser};
use remote_proto::channel::ChannelSet;
use remote_proto::command::Command;
use remote_proto::config::Config;
use remote_proto::remote::Remote;
use remote_proto::status::StatusRegister;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::dispatcher::Dispatcher;
use crate::mpv::MpvBackend;

#[derive(Parser, Debug)]
#[command(
    name = "mpv-play",
    version,
    about = "Media display process of the mpv remote"
)]
struct Cli {
    #[arg(short = 's', long, help = "Run the mpv remote player service")]
    start: bool,

    #[arg(
        short = 'f',
        long,
        requires = "start",
        help = "Kill a display process that is already running first"
    )]
    force: bool,

    #[arg(
        short = 'k',
        long,
        conflicts_with = "start",
        help = "Kill the running display process"
    )]
    kill: bool,
}

fn init_logging() -> anyhow::Result<()> {
    let data_dir = remote_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("display.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,remote_display=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);
    Ok(())
}

// ── termination signals ───────────────────────────────────────────────────────

#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}

#[cfg(windows)]
struct ShutdownSignals;

#[cfg(windows)]
impl ShutdownSignals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C"
    }
}

// ── entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    let channels = ChannelSet::new(config.channel_dir());

    if cli.kill {
        let mut remote = Remote::new(channels, config.timeouts.clone());
        let outcome = tokio::task::spawn_blocking(move || remote.kill()).await??;
        std::process::exit(outcome.exit_code());
    }

    if !cli.start {
        Cli::command().print_help()?;
        std::process::exit(1);
    }

    let mut register = StatusRegister::new(&channels);
    register.pull()?;
    if register.status().running {
        if !cli.force {
            println!("Another MPV remote player process is already running");
            std::process::exit(1);
        }
        println!("Force start attempting to kill blocking processes");
        let mut remote = Remote::new(channels.clone(), config.timeouts.clone());
        tokio::task::spawn_blocking(move || remote.send(&Command::Kill)).await??;
    }

    let backend = MpvBackend::new(config.mpv.clone());
    let mut dispatcher = Dispatcher::new(backend, channels.clone(), config.timeouts.clone());
    dispatcher.start()?;
    println!("Running MPV remote player");

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            channels.clone(),
        );
    }

    let mut signals = ShutdownSignals::new()?;
    info!("Display started on {:?}, running poll loop", channels.dir());

    let reason = loop {
        tokio::select! {
            name = signals.recv() => break name,
            result = dispatcher.tick() => {
                if let Err(e) = result {
                    warn!("poll loop: {:#}", e);
                }
            }
        }
        if dispatcher.kill_requested() {
            break "kill command";
        }
    };
    info!(
        "Shutting down on {} (phase {:?}, media open: {})",
        reason,
        dispatcher.phase(),
        dispatcher.in_session()
    );

    dispatcher.shutdown().await?;
    Ok(())
}
