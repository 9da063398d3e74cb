//! tideline command line
//!
//! - `validate`: check a query descriptor and print its options summary
//! - `demo`: run a small Task live query against an in-process server

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

use tideline::client::{EventName, Notification};
use tideline::query::QueryMode;
use tideline::{
    ClientSession, DocId, Document, EngineConfig, FrameFormat, LiveServer, LocalTransport, MemoryStore,
    QueryDescriptor, QueryValidator,
};

#[derive(Parser, Debug)]
#[command(name = "tideline")]
#[command(about = "Live query descriptor validation and demo")]
struct Args {
    /// Engine configuration file (JSON)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a query descriptor
    Validate {
        /// JSON array of steps, or @path to a file holding one
        descriptor: String,

        /// Validate for a live query instead of a one-shot query
        #[arg(long)]
        live: bool,
    },
    /// Run the Task scenario over the loopback transport
    Demo {
        /// Frame encoding, defaults to the configured one
        #[arg(long, value_enum)]
        format: Option<Format>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Cbor,
}

impl From<Format> for FrameFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => FrameFormat::Json,
            Format::Cbor => FrameFormat::Cbor,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let config = config.from_env();
    config.validate()?;
    Ok(config)
}

fn validate(config: &EngineConfig, descriptor: &str, live: bool) -> Result<()> {
    let text = match descriptor.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?,
        None => descriptor.to_string(),
    };
    let raw: Value = serde_json::from_str(&text).context("descriptor is not JSON")?;
    let mode = if live { QueryMode::Live } else { QueryMode::OneShot };

    let validator = QueryValidator::new(config.max_query_length);
    let validated = validator.validate_value(&raw, mode)?;
    let descriptor = QueryDescriptor::from_value(&raw)?;
    let report = json!({
        "digest": descriptor.digest(),
        "steps": descriptor.len(),
        "options": validated.options,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn log_notification(notification: &Notification) {
    log::info!("{}: {:?}", notification.event_name(), notification);
}

async fn demo(config: EngineConfig, format: FrameFormat) -> Result<()> {
    let store = Arc::new(MemoryStore::new().with_model("Task", &["done"]));
    store
        .seed(
            "Task",
            vec![
                Document::new(1u64).with("done", false),
                Document::new(2u64).with("done", false),
            ],
        )
        .await?;

    let server = Arc::new(LiveServer::new(store, config));
    server.register_model("Task").await;

    let (transport, pushes) = LocalTransport::connect(server.clone(), format).await;
    let session = Arc::new(ClientSession::new(transport));
    let dispatch = session.spawn_dispatch(pushes);
    println!("models: {:?}", session.list_models().await?);
    let tasks = session.model("Task");

    let open = QueryDescriptor::new()
        .find(json!({"done": false}))
        .sort("_id")
        .limit(10);
    let live = tasks.live_query(open)?;
    live.on(EventName::Any, log_notification);
    live.populated().await?;
    println!("open tasks: {:?}", ids(&live.docs()));

    tasks.update(Document::new(1u64).with("done", true)).await?;
    let settled = tokio::time::timeout(Duration::from_secs(2), async {
        while live.count() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if settled.is_err() {
        bail!("live query did not settle, docs: {:?}", ids(&live.docs()));
    }
    println!("open tasks after completing 1: {:?}", ids(&live.docs()));

    if let Some(report) = session.health().await? {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    live.stop().await?;
    server.shutdown().await;
    dispatch.abort();
    Ok(())
}

fn ids(docs: &[Document]) -> Vec<DocId> {
    docs.iter().map(|d| d.id.clone()).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(args.config.as_ref())?;
    match args.command {
        Command::Validate { descriptor, live } => validate(&config, &descriptor, live),
        Command::Demo { format } => {
            let format = format.map(FrameFormat::from).unwrap_or(config.frame_format);
            demo(config, format).await
        }
    }
}
