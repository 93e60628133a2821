//! `xlproc` -- command-line client for the spreadsheet processing service.
//!
//! Submits Excel files to one of the service's processing functions,
//! follows the job's progress stream and downloads the result.
//!
//! # Environment variables
//!
//! | Variable                      | Default                 | Description                          |
//! |-------------------------------|-------------------------|--------------------------------------|
//! | `XLPROC_API_URL`              | `http://localhost:8000` | Service base URL                     |
//! | `XLPROC_REQUEST_TIMEOUT_SECS` | `300`                   | Submit/upload/export request timeout |
//! | `XLPROC_CONNECT_TIMEOUT_SECS` | `10`                    | TCP connect timeout                  |
//! | `XLPROC_STREAM_RECONNECTS`    | `3`                     | Progress stream reconnect attempts   |
//! | `XLPROC_OUTPUT_DIR`           | `.`                     | Where results are saved              |

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xlproc_client::api::ProcessorApi;
use xlproc_client::config::ClientConfig;
use xlproc_client::orchestrator::{JobOrchestrator, JobRequest};
use xlproc_client::payload::{build, read_files, SubmissionPayload};
use xlproc_client::retriever::ResultRetriever;
use xlproc_core::functions::{find_function, PROCESSING_FUNCTIONS};
use xlproc_core::types::{FormFields, FunctionId, ResultHandle};

#[derive(Parser)]
#[command(name = "xlproc", version, about = "Client for the spreadsheet processing service")]
struct Cli {
    /// Service base URL (overrides XLPROC_API_URL).
    #[arg(long, global = true, value_name = "URL")]
    api_url: Option<String>,

    /// Directory for downloaded results (overrides XLPROC_OUTPUT_DIR).
    #[arg(long, global = true, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the processing functions the service offers.
    Functions,
    /// Run a processing function over files and download the result.
    Run {
        /// Function to run, e.g. `func1`.
        function_id: FunctionId,

        #[command(flatten)]
        inputs: Inputs,

        /// Keep the result on the server instead of downloading it.
        #[arg(long)]
        no_download: bool,
    },
    /// Upload files to the service without processing them.
    Upload {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Download a result by its handle.
    Export {
        /// Result handle as printed by `run --no-download`.
        handle: String,
    },
}

#[derive(Args)]
struct Inputs {
    /// Excel files to send.
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    #[arg(long, default_value = "")]
    text1: String,

    #[arg(long, default_value = "")]
    text2: String,

    #[arg(long, default_value = "")]
    text3: String,

    /// Reference date, `YYYY-MM-DD` (default: today).
    #[arg(long, value_name = "DATE")]
    date: Option<String>,
}

impl Inputs {
    async fn into_payload(self) -> anyhow::Result<SubmissionPayload> {
        let selected_date = match self.date.as_deref() {
            Some(raw) => FormFields::parse_date(raw)?,
            None => today(),
        };
        let files = read_files(&self.files).await?;
        Ok(build(
            files,
            FormFields {
                text1: self.text1,
                text2: self.text2,
                text3: self.text3,
                selected_date,
            },
        ))
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xlproc=warn,xlproc_client=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env().context("Invalid configuration")?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }

    match cli.command {
        Command::Functions => list_functions(),
        Command::Run {
            function_id,
            inputs,
            no_download,
        } => run(&config, function_id, inputs, no_download).await,
        Command::Upload { inputs } => upload(&config, inputs).await,
        Command::Export { handle } => export(&config, handle).await,
    }
}

fn list_functions() -> anyhow::Result<()> {
    for function in PROCESSING_FUNCTIONS {
        println!("{:<8} {:<28} {}", function.id, function.name, function.description);
    }
    Ok(())
}

async fn run(
    config: &ClientConfig,
    function_id: FunctionId,
    inputs: Inputs,
    no_download: bool,
) -> anyhow::Result<()> {
    if find_function(function_id.as_str()).is_none() {
        tracing::warn!(function_id = %function_id, "Function is not in the known catalog");
    }

    let payload = inputs.into_payload().await?;
    let orchestrator = JobOrchestrator::from_config(config)?;
    let renderer = tokio::spawn(render::follow(orchestrator.subscribe()));

    tracing::info!(api_url = %config.api_url, function_id = %function_id, "Submitting job");

    let submission = orchestrator.submit(JobRequest::new(function_id, payload));
    tokio::pin!(submission);

    let mut interrupted = false;
    let outcome = loop {
        tokio::select! {
            outcome = &mut submission => break outcome,
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    anyhow::bail!("Interrupted");
                }
                interrupted = true;
                orchestrator.cancel();
                eprintln!("Progress updates stopped; still waiting for the result (Ctrl-C again to quit)");
            }
        }
    };

    // The renderer only stops by itself on a terminal job.
    if orchestrator.snapshot().state.is_terminal() {
        if let Err(e) = renderer.await {
            tracing::warn!(error = %e, "Progress renderer failed");
        }
    } else {
        renderer.abort();
    }

    let handle = outcome?;
    if no_download {
        println!("{handle}");
        return Ok(());
    }

    let path = orchestrator
        .retriever()
        .fetch_and_save(Some(&handle), &config.output_dir)
        .await
        .with_context(|| format!("Job succeeded but the result '{handle}' could not be saved"))?;
    println!("{}", path.display());
    Ok(())
}

async fn upload(config: &ClientConfig, inputs: Inputs) -> anyhow::Result<()> {
    let payload = inputs.into_payload().await?;
    let orchestrator = JobOrchestrator::from_config(config)?;

    for path in orchestrator.upload(&payload).await? {
        println!("{path}");
    }
    Ok(())
}

async fn export(config: &ClientConfig, handle: String) -> anyhow::Result<()> {
    let api = ProcessorApi::from_config(config)?;
    let retriever = ResultRetriever::new(Arc::new(api));

    let path = retriever
        .fetch_and_save(Some(&ResultHandle::new(handle)), &config.output_dir)
        .await?;
    println!("{}", path.display());
    Ok(())
}
