use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gadget_lab::config::AppConfig;
use gadget_lab::session::{EffectiveUid, Granted, Privilege, Session};
use gadget_lab::shell::Shell;
use gadget_lab::writer::ImageWriter;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Gadget Lab command line arguments
#[derive(Parser, Debug)]
#[command(name = "gadget-lab")]
#[command(version, about = "USB gadget lab tool: image emulation, keyboard and image writer", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "warn")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run without root, e.g. against a ConfigFS mirror set up in the config file
    #[arg(long)]
    allow_unprivileged: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting Gadget Lab v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config.as_deref())?;

    let privilege: Box<dyn Privilege> = if args.allow_unprivileged {
        tracing::warn!("Running with --allow-unprivileged, privilege checks disabled");
        Box::new(Granted(true))
    } else {
        if !EffectiveUid.is_privileged() {
            anyhow::bail!("This tool must be run as root");
        }
        Box::new(EffectiveUid)
    };

    let session = Session::new(&config, privilege);
    let writer = ImageWriter::new(&config.writer);
    Shell::new(session, writer).run().await?;

    tracing::info!("Gadget Lab stopped");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "gadget_lab=error",
        LogLevel::Warn => "gadget_lab=warn",
        LogLevel::Info => "gadget_lab=info",
        LogLevel::Verbose | LogLevel::Debug => "gadget_lab=debug",
        LogLevel::Trace => "gadget_lab=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    // Logs go to stderr; stdout belongs to the shell
    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
