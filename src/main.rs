use anyhow::Context;
use clap::{Parser, Subcommand};
use msa_pipeline::config::Config;
use msa_pipeline::pipeline::Pipeline;
use msa_pipeline::types::GapFill;
use msa_pipeline::upload::{upload_artifacts, UploadOutcome};
use msa_pipeline::{logging, publish, server, telemetry};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "msa_pipeline")]
#[command(about = "County COVID-19 counts aggregated to metropolitan statistical areas")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to ./msa_pipeline.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the feed, aggregate to MSAs and write the artifacts
    Run {
        /// Feed URL or local CSV path
        #[arg(long)]
        source: Option<String>,
        /// FIPS→MSA reference CSV
        #[arg(long)]
        reference: Option<PathBuf>,
        /// Directory the artifacts are written to
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Also write the state-level view of rows without an MSA
        #[arg(long)]
        unallocated: bool,
        /// Fill reporting gaps with the last cumulative value instead of zero
        #[arg(long)]
        carry_forward: bool,
        /// Write exact rolling means instead of rounding them up
        #[arg(long)]
        exact: bool,
        /// Replace the remote tables after a successful run
        #[arg(long)]
        upload: bool,
        /// Commit the refreshed artifacts to git
        #[arg(long)]
        commit: bool,
        /// Push the commit to origin (implies --commit)
        #[arg(long)]
        push: bool,
    },
    /// Serve the artifacts over HTTP
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Replace the remote tables with the current artifacts
    Upload,
    /// Commit the current artifacts to git
    Commit {
        #[arg(long)]
        push: bool,
    },
}

fn artifact_paths(config: &Config) -> Vec<PathBuf> {
    let out = &config.output;
    [
        out.cases(),
        out.deaths(),
        out.rolling_cases(),
        out.rolling_deaths(),
        out.unallocated_cases(),
        out.unallocated_deaths(),
    ]
    .into_iter()
    .filter(|p| p.exists())
    .collect()
}

fn report_upload(outcome: &UploadOutcome) {
    match outcome {
        UploadOutcome::Uploaded { .. } => println!("✅ Upload done"),
        UploadOutcome::Skipped { reason } | UploadOutcome::Failed { reason } => {
            println!("⚠️  Upload not performed: {reason}")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = logging::init_logging();
    let metrics = telemetry::init_metrics();
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            source,
            reference,
            output_dir,
            unallocated,
            carry_forward,
            exact,
            upload,
            commit,
            push,
        } => {
            if let Some(s) = source {
                config.source_url = s;
            }
            if let Some(r) = reference {
                config.reference_path = r;
            }
            if let Some(d) = output_dir {
                config.output.dir = d;
            }
            config.unallocated |= unallocated;
            if carry_forward {
                config.gap_fill = GapFill::CarryForward;
            }
            if exact {
                config.round_up = false;
            }

            let summary = match Pipeline::run(&config).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!("Pipeline failed: {}", e);
                    return Err(e.into());
                }
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);

            if upload {
                report_upload(&upload_artifacts(&config).await);
            }
            if commit || push {
                publish::commit_artifacts(&std::env::current_dir()?, &summary.files_written, push)
                    .context("committing artifacts")?;
            }
        }
        Commands::Serve { port } => {
            if let Some(p) = port {
                config.server.port = p;
            }
            server::start_server(&config, metrics).await?;
        }
        Commands::Upload => {
            report_upload(&upload_artifacts(&config).await);
        }
        Commands::Commit { push } => {
            let paths = artifact_paths(&config);
            info!("Committing {} artifacts", paths.len());
            match publish::commit_artifacts(&std::env::current_dir()?, &paths, push)? {
                Some(oid) => println!("📝 Committed {oid}"),
                None => println!("Nothing to commit"),
            }
        }
    }
    Ok(())
}
