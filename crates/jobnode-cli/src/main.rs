//! jobnode CLI - Command line client for a jobnode node.

mod error;
mod http;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use jobnode_core::{RunId, RunRequest, TaskId};
use tracing_subscriber::EnvFilter;

use http::HttpClient;

/// jobnode CLI - submit runs and collect their results
#[derive(Parser)]
#[command(name = "jobnode-cli")]
#[command(about = "CLI for a jobnode node", long_about = None)]
struct Cli {
    /// Node address
    #[arg(short, long, env = "JOBNODE_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a run
    Submit {
        /// Run ID
        #[arg(long)]
        run_id: u64,

        /// Task ID
        #[arg(long)]
        task_id: u64,

        /// Parent task ID
        #[arg(long)]
        parent_id: Option<u64>,

        /// Container image
        #[arg(long)]
        image: String,

        /// Algorithm argument as name=value, in order
        #[arg(long = "arg", value_parser = parse_arg)]
        args: Vec<(String, String)>,

        /// Dataset label to make available
        #[arg(long = "database")]
        databases: Vec<String>,

        /// File holding the token handed to the algorithm
        #[arg(long)]
        token_file: Option<PathBuf>,

        /// File whose bytes the algorithm reads as its input
        #[arg(long)]
        input_file: Option<PathBuf>,
    },

    /// Fetch the next finished run
    #[command(name = "next-result")]
    NextResult {
        /// Seconds to wait for a result
        #[arg(long, default_value = "30")]
        wait_secs: u64,

        /// Write the artifact to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Leave the result unacknowledged, so the node hands it out again
        #[arg(long)]
        no_ack: bool,
    },

    /// Check node health
    Health,
}

fn parse_arg(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = HttpClient::new(&cli.server);

    match cli.command {
        Commands::Submit {
            run_id,
            task_id,
            parent_id,
            image,
            args,
            databases,
            token_file,
            input_file,
        } => {
            let mut request = RunRequest::new(RunId::new(run_id), TaskId::new(task_id), image);
            for (name, value) in args {
                request = request.with_arg(name, value);
            }
            for label in databases {
                request = request.with_database(label);
            }
            if let Some(parent) = parent_id {
                request = request.with_parent(TaskId::new(parent));
            }
            if let Some(path) = token_file {
                let token = std::fs::read_to_string(&path)
                    .map_err(|e| format!("Failed to read token from '{}': {}", path.display(), e))?;
                request = request.with_token(token.trim());
            }
            if let Some(path) = input_file {
                let input = std::fs::read(&path)
                    .map_err(|e| format!("Failed to read input from '{}': {}", path.display(), e))?;
                request = request.with_input(input);
            }

            let status = client.submit(&request).await?;
            println!("Run {}: {}", run_id, status);
        }
        Commands::NextResult {
            wait_secs,
            output,
            no_ack,
        } => {
            let Some(run) = client.next_result(wait_secs).await? else {
                println!("No finished run");
                return Ok(());
            };

            println!("Run:      {}", run.run_id);
            println!("Task:     {}", run.task_id);
            if let Some(parent) = run.parent_id {
                println!("Parent:   {}", parent);
            }
            println!("Status:   {}", run.status);
            println!("Finished: {}", run.finished_at);
            println!("Logs:");
            println!("{}", run.logs);

            let artifact = run.artifact()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &artifact)?;
                    println!("Artifact: {} bytes written to {}", artifact.len(), path.display());
                }
                None if !artifact.is_empty() => {
                    println!("Artifact:");
                    println!("{}", String::from_utf8_lossy(&artifact));
                }
                None => {}
            }

            if !no_ack {
                client.ack(run.run_id).await?;
            }
        }
        Commands::Health => {
            if client.health().await? {
                println!("Node is healthy");
            } else {
                println!("Node is not healthy");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
