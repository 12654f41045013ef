mod config;
use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use stashio_core::{BlobId, BlobStore, Headers};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Exit status for a delete refused because the blob is in use.
const EXIT_IN_USE: u8 = 2;

#[derive(Parser)]
#[command(name = "stashio")]
#[command(about = "Pluggable binary object storage")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "stashio.yaml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file as a new blob and print its id
    Put {
        file: PathBuf,

        /// Header to attach, as key=value; repeatable
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
    /// Write a blob's content to stdout or a file
    Get {
        id: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a blob's headers and metrics as JSON
    Head { id: String },
    /// Delete a blob and print whether it existed
    Delete {
        id: String,

        /// Ignore locks held by readers
        #[arg(long)]
        hard: bool,
    },
    /// Print store metrics as JSON
    Stats,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn main() -> ExitCode {
    // Logs go to stderr so `get` can stream content on stdout.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stashio=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            tracing::error!("{:#}", error);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let cfg = Config::from_file(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config))?;
    let store = cfg.store.builder().build().context("failed to open store")?;
    execute(store.as_ref(), cli.command, &mut io::stdout().lock())
}

fn execute(
    store: &dyn BlobStore,
    command: Commands,
    out: &mut dyn Write,
) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Put { file, headers } => {
            let headers: Headers = headers.into_iter().collect();
            let mut input = BufReader::new(
                File::open(&file).with_context(|| format!("failed to open {}", file.display()))?,
            );
            let blob = store.create(&mut input, &headers)?;
            tracing::info!("Stored {} as blob {}", file.display(), blob.id());
            writeln!(out, "{}", blob.id())?;
        }
        Commands::Get { id, output } => {
            let blob_id = BlobId::new(id)?;
            let Some(blob) = store.get(&blob_id)? else {
                anyhow::bail!("blob {} not found", blob_id);
            };
            let mut stream = blob.input_stream()?;
            match output {
                Some(path) => {
                    let mut file = File::create(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    io::copy(&mut stream, &mut file)?;
                }
                None => {
                    io::copy(&mut stream, out)?;
                }
            }
        }
        Commands::Head { id } => {
            let blob_id = BlobId::new(id)?;
            let Some(blob) = store.get(&blob_id)? else {
                anyhow::bail!("blob {} not found", blob_id);
            };
            let report = serde_json::json!({
                "id": blob.id(),
                "headers": blob.headers()?,
                "metrics": blob.metrics()?,
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        }
        Commands::Delete { id, hard } => {
            let blob_id = BlobId::new(id)?;
            let outcome = if hard {
                store.delete_hard(&blob_id)
            } else {
                store.delete(&blob_id)
            };
            match outcome {
                Ok(deleted) => writeln!(out, "{}", deleted)?,
                Err(error) if error.is_in_use() => {
                    tracing::error!("{}", error);
                    return Ok(ExitCode::from(EXIT_IN_USE));
                }
                Err(error) => return Err(error.into()),
            }
        }
        Commands::Stats => {
            let metrics = store.metrics()?;
            writeln!(out, "{}", serde_json::to_string_pretty(&metrics)?)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashio_core::InMemoryBlobStore;
    use tempfile::TempDir;

    fn run_command(store: &dyn BlobStore, args: &[&str]) -> (ExitCode, String) {
        let cli = Cli::try_parse_from(std::iter::once("stashio").chain(args.iter().copied()))
            .unwrap();
        let mut out = Vec::new();
        let code = execute(store, cli.command, &mut out).unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("name=a=b").unwrap(),
            ("name".to_string(), "a=b".to_string())
        );
        assert!(parse_header("novalue").is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["stashio", "stats", "--config", "other.toml"]).unwrap();
        assert_eq!(cli.config, "other.toml");
        assert!(matches!(cli.command, Commands::Stats));
    }

    #[test]
    fn test_put_get_head_delete() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.bin");
        std::fs::write(&input, b"cli payload").unwrap();
        let store = InMemoryBlobStore::new();

        let (_, id) = run_command(
            &store,
            &["put", input.to_str().unwrap(), "-H", "name=payload"],
        );
        let id = id.trim().to_string();

        let (_, content) = run_command(&store, &["get", &id]);
        assert_eq!(content, "cli payload");

        let (_, head) = run_command(&store, &["head", &id]);
        let head: serde_json::Value = serde_json::from_str(&head).unwrap();
        assert_eq!(head["headers"]["name"], "payload");
        assert_eq!(head["metrics"]["content_size"], 11);

        let (_, stats) = run_command(&store, &["stats"]);
        let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
        assert_eq!(stats["blob_count"], 1);

        let (_, deleted) = run_command(&store, &["delete", &id]);
        assert_eq!(deleted.trim(), "true");
        let (_, deleted) = run_command(&store, &["delete", &id, "--hard"]);
        assert_eq!(deleted.trim(), "false");
    }

    #[test]
    fn test_get_missing_blob_fails() {
        let store = InMemoryBlobStore::new();
        let cli = Cli::try_parse_from(["stashio", "get", "nothing"]).unwrap();
        assert!(execute(&store, cli.command, &mut Vec::new()).is_err());
    }
}
