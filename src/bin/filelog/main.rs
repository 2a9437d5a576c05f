// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing::{error, info};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use filelog::init::args::FileConsumerArgs;
use filelog::{JsonFileCheckpointStore, WriterSink};

#[derive(Debug, Parser)]
#[command(name = "filelog")]
#[command(bin_name = "filelog")]
#[command(version, about, long_about = None)]
struct Arguments {
    #[arg(value_enum, long, env = "FILELOG_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    #[command(flatten)]
    consumer: FileConsumerArgs,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let _guard = match setup_logging(&opt.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(opt.consumer) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = e, "Failed to run file consumer.");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run(args: FileConsumerArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let store = Arc::new(JsonFileCheckpointStore::new(&args.offsets_path));
    let sink = Arc::new(WriterSink::new(std::io::stdout()));
    let manager = args.build_config().build(sink, store)?;

    let cancel = CancellationToken::new();
    let mut consumer = tokio::spawn(manager.run(cancel.clone()));

    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
            cancel.cancel();
        }
        res = &mut consumer => {
            return Ok(res??);
        }
    }

    consumer.await??;
    Ok(())
}

// Records go to stdout, so our own logs go to stderr
fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, Box<dyn Error + Send + Sync>> {
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = std::io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}
