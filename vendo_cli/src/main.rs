mod cli;
mod fill;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use eyre::{Result, WrapErr};
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();
    let _ = JSON_MODE.set(args.json);

    let cfg = load_config(&args.config)?;
    init_logging(&args, &cfg.logging)?;
    cfg.validate()?;

    let code = match &args.cmd {
        Commands::Fill { size, max_fill_ms } => {
            fill::run_fill(&cfg, size, *max_fill_ms, args.json)?
        }
        Commands::Volumes => {
            fill::run_volumes(&cfg, args.json)?;
            0
        }
        Commands::Telemetry { count } => {
            fill::run_telemetry(&cfg, *count, args.json)?;
            0
        }
        Commands::SelfCheck => fill::run_self_check(&cfg, args.json)?,
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Missing file means defaults; a present but malformed file is an error.
fn load_config(path: &Path) -> Result<vendo_config::Config> {
    if !path.exists() {
        return Ok(vendo_config::Config::default());
    }
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    vendo_config::load_toml(&text)
        .wrap_err_with(|| format!("invalid config {}", path.display()))
}

/// Console layer (pretty or JSON lines) plus an optional rotating JSON file
/// layer. CLI level beats the config level; RUST_LOG beats both.
fn init_logging(args: &Cli, logging: &vendo_config::Logging) -> Result<()> {
    let level = args
        .log_level
        .as_deref()
        .or(logging.level.as_deref())
        .unwrap_or("info");
    let filter = |level: &str| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let console: Box<dyn Layer<Registry> + Send + Sync> = if args.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter(level))
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter(level))
            .boxed()
    };
    let mut layers = vec![console];

    if let Some(file) = &logging.file {
        let path = Path::new(file);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let dir = dir.unwrap_or_else(|| Path::new("."));
        let appender = match logging.rotation.as_deref().unwrap_or("never") {
            "never" => tracing_appender::rolling::never(dir, name),
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            other => eyre::bail!("logging.rotation must be never|daily|hourly, got {other:?}"),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(filter(level))
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(())
}
