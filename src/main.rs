mod cli;
mod config;
mod filter_args;
mod render;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use logscope_backend::HttpBackend;
use logscope_query::{BUCKET_CATALOG, QuerySet, Session, check_catalog};
use logscope_types::{ClientRequest, ServerMessage};

use crate::cli::Args;
use crate::config::Config;
use crate::render::{OutputFormat, render};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Run the application
    let result = run_app(args).await;

    // Handle any errors
    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

/// Log to stderr so stdout carries only results
fn init_tracing(level: &str) {
    let directive: Directive = level
        .parse()
        .unwrap_or_else(|_| tracing::Level::WARN.into());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();
}

async fn run_app(args: Args) -> Result<()> {
    let mut config = Config::resolve(args.config.as_deref())?;
    init_tracing(&config.logging.level);

    check_catalog(&BUCKET_CATALOG).context("Bucket catalog is inconsistent")?;

    if let Some(ms) = args.poll_interval_ms {
        config.query.poll_interval_ms = ms;
    }

    let log_groups = if args.log_groups.is_empty() {
        config.query.log_groups.clone()
    } else {
        args.log_groups.clone()
    };
    if log_groups.is_empty() {
        bail!("No log groups to search; pass --log-group or set query.log_groups in the config file");
    }

    let backend = HttpBackend::new(config.backend()).context("Failed to create backend client")?;
    info!(endpoint = backend.endpoint(), ?log_groups, "using backend");
    let query_set = QuerySet::new(Arc::new(backend), log_groups, config.poll());

    if args.stdio {
        serve_stdio(query_set).await
    } else {
        run_once(&args, query_set).await
    }
}

/// Run the command-line query set and print its results
async fn run_once(args: &Args, query_set: QuerySet) -> Result<()> {
    let time_range = args.time_range(Utc::now())?;
    let queries = args.queries()?;
    let format = args.format;

    let (emit_tx, mut emit_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let query = query_set.run(
        time_range,
        queries,
        |descriptor| {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, stopping queries");
                    descriptor.stop();
                }
            });
        },
        emit_tx,
    );

    let output = async {
        let mut failure = None;
        while let Some(message) = emit_rx.recv().await {
            render(&message, format, &mut std::io::stdout().lock())?;
            if let ServerMessage::DoneLoadingEntries {
                error_message: Some(error),
            } = message
            {
                failure = Some(error);
            }
        }
        Ok::<_, anyhow::Error>(failure)
    };

    let ((), failure) = tokio::join!(query, output);

    if let Some(error) = failure? {
        bail!("Query failed: {}", error);
    }
    Ok(())
}

/// Line-delimited JSON session over stdin/stdout
async fn serve_stdio(query_set: QuerySet) -> Result<()> {
    let (emit_tx, mut emit_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (request_tx, request_rx) = mpsc::unbounded_channel::<ClientRequest>();

    let session = Session::new(Arc::new(query_set), emit_tx);
    let server = tokio::spawn(session.serve(request_rx));

    let writer = tokio::spawn(async move {
        while let Some(message) = emit_rx.recv().await {
            if let Err(e) = render(&message, OutputFormat::Json, &mut std::io::stdout().lock()) {
                warn!(error = %e, "failed to write message");
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ClientRequest>(&line) {
            Ok(request) => {
                if request_tx.send(request).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "ignoring malformed request"),
        }
    }

    drop(request_tx);
    server.await?;
    writer.await?;
    Ok(())
}
