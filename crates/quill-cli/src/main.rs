//! Quill CLI - command bridge for a poll-only design agent
//!
//! Usage:
//!   quill init                      Write .quill/config.toml
//!   quill serve                     Run the HTTP bridge
//!   quill status                    Show queue and cache statistics
//!   quill submit <kind> -p k=v      Queue a command
//!   quill wait <id>                 Block until a command resolves
//!   quill backups                   List pre-mutation backups

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quill_bridge::{BackoffPolicy, BridgeServer, BridgeState};
use quill_core::{CommandKind, Priority, QuillConfig};
use quill_upstream::HttpDocumentApi;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "quill")]
#[command(author, version, about = "Command bridge for a poll-only design agent")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Bridge base URL for client commands
    #[arg(long, default_value = "http://127.0.0.1:3055", global = true)]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Project root (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run the HTTP bridge
    Serve {
        /// Configuration file (defaults to .quill/config.toml)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Fail instead of terminating whatever holds the port
        #[arg(long)]
        no_reclaim: bool,
    },

    /// Show queue and cache statistics
    Status,

    /// Queue a command
    Submit {
        /// Command kind (e.g. create_frame, set_fill, delete)
        kind: String,

        /// Parameter as key=value; values are parsed as JSON when possible
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Target file key (defaults to the bridge's current file)
        #[arg(short, long)]
        file: Option<String>,

        /// Parent node id
        #[arg(long)]
        parent: Option<String>,

        /// interactive, batch, refactor or low
        #[arg(long)]
        priority: Option<String>,

        /// Command deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Preview without queueing
        #[arg(long)]
        dry_run: bool,

        /// Block until the command resolves
        #[arg(short, long)]
        wait: bool,
    },

    /// Wait for a queued command to resolve
    Wait {
        id: String,

        /// Give up after this many seconds
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// List backups for a file
    Backups {
        #[arg(short, long)]
        file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Serve {
            config,
            host,
            port,
            no_reclaim,
        } => cmd_serve(config, host, port, no_reclaim).await,
        Commands::Status => cmd_status(&Client::new(&cli.url)?).await,
        Commands::Submit {
            kind,
            params,
            file,
            parent,
            priority,
            timeout_ms,
            dry_run,
            wait,
        } => {
            let body = submit_body(SubmitArgs {
                kind,
                params,
                file,
                parent,
                priority,
                timeout_ms,
                dry_run,
                wait,
            })?;
            cmd_submit(&Client::new(&cli.url)?, body).await
        }
        Commands::Wait { id, timeout } => {
            cmd_wait(&Client::new(&cli.url)?, &id, Duration::from_secs(timeout)).await
        }
        Commands::Backups { file } => cmd_backups(&Client::new(&cli.url)?, file).await,
    }
}

fn cmd_init(path: PathBuf) -> Result<()> {
    let written = QuillConfig::write_default(&path).context("Failed to write config")?;
    println!("Initialized Quill in {:?}", path);
    println!("Created:");
    println!("  {}", written.display());
    println!("\nNext steps:");
    println!("  1. Export the API token named in [upstream].token_env");
    println!("  2. Run 'quill serve' and point the execution agent at the bridge");
    Ok(())
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    no_reclaim: bool,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => QuillConfig::load(&path)?,
        None => QuillConfig::load_or_default(&std::env::current_dir()?)?,
    };
    if let Some(host) = host {
        config.bridge.host = host;
    }
    if let Some(port) = port {
        config.bridge.port = port;
    }
    if no_reclaim {
        config.bridge.reclaim_port = false;
    }

    let mut builder = BridgeState::builder(config.clone());
    match HttpDocumentApi::from_config(&config.upstream) {
        Ok(api) => {
            info!("Upstream API at {}", config.upstream.base_url);
            builder = builder.upstream(Arc::new(api));
        }
        Err(e) => warn!("{}", e),
    }

    let state = builder.build().await;
    BridgeServer::new(state).run().await?;
    Ok(())
}

async fn cmd_status(client: &Client) -> Result<()> {
    let stats = client.get("/stats").await?;

    println!("Quill Status");
    println!("============");
    match stats["currentFile"]["fileKey"].as_str() {
        Some(key) => println!("Current file: {}", key),
        None => println!("Current file: (none)"),
    }
    println!("Uptime: {}s", stats["uptimeSecs"]);

    println!("\nQueue: {} command(s)", stats["queue"]["total"]);
    if let Some(by_status) = stats["queue"]["byStatus"].as_object() {
        for (status, count) in by_status {
            println!("  {:<10} {}", status, count);
        }
    }

    let cache = &stats["cache"];
    println!(
        "\nCache: {} entries, {} hits, {} misses",
        cache["entries"], cache["hits"], cache["misses"]
    );
    Ok(())
}

struct SubmitArgs {
    kind: String,
    params: Vec<String>,
    file: Option<String>,
    parent: Option<String>,
    priority: Option<String>,
    timeout_ms: Option<u64>,
    dry_run: bool,
    wait: bool,
}

fn submit_body(args: SubmitArgs) -> Result<Value> {
    let kind: CommandKind = args.kind.parse().map_err(anyhow::Error::msg)?;
    let priority = args
        .priority
        .map(|p| p.parse::<Priority>().map_err(anyhow::Error::msg))
        .transpose()?;

    let mut params = Map::new();
    for pair in &args.params {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Parameter '{}' is not key=value", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        params.insert(key.to_string(), value);
    }

    let mut body = json!({
        "command": kind,
        "params": params,
        "dryRun": args.dry_run,
        "wait": args.wait,
    });
    if let Some(file) = args.file {
        body["fileKey"] = json!(file);
    }
    if let Some(parent) = args.parent {
        body["parent"] = json!(parent);
    }
    if let Some(priority) = priority {
        body["priority"] = json!(priority);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        body["timeoutMs"] = json!(timeout_ms);
    }
    Ok(body)
}

async fn cmd_submit(client: &Client, body: Value) -> Result<()> {
    let outcome = client.post("/commands", &body).await?;

    if outcome["queued"] == json!(false) {
        println!("Dry run (nothing queued)");
    } else {
        println!("Queued {} [{}]", outcome["commandId"], outcome["status"]);
    }
    if let Some(warnings) = outcome["preview"]["warnings"].as_array() {
        for warning in warnings {
            println!("  {}", warning.as_str().unwrap_or_default());
        }
    }
    if let Some(conflicts) = outcome["conflicts"].as_array() {
        for conflict in conflicts {
            println!("  conflict: {}", conflict["description"].as_str().unwrap_or_default());
        }
    }
    if let Some(backup) = outcome["backup"]["id"].as_str() {
        println!("  backup: {}", backup);
    }
    if !outcome["response"].is_null() {
        println!("{}", serde_json::to_string_pretty(&outcome["response"])?);
    }
    Ok(())
}

async fn cmd_wait(client: &Client, id: &str, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    let mut backoff = BackoffPolicy::default().start();
    let mut last_status = String::new();

    loop {
        let queued = client.get(&format!("/commands/{}", id)).await?;
        let status = queued["status"].as_str().unwrap_or_default().to_string();

        match status.as_str() {
            "completed" => {
                println!("{}", serde_json::to_string_pretty(&queued["response"])?);
                return Ok(());
            }
            "failed" | "timeout" => {
                let error = &queued["response"]["error"];
                bail!(
                    "Command {} {}: [{}] {}",
                    id,
                    status,
                    error["code"].as_str().unwrap_or("UNKNOWN"),
                    error["message"].as_str().unwrap_or_default()
                );
            }
            _ => {}
        }

        let changed = !last_status.is_empty() && last_status != status;
        let delay = backoff.observe(changed);
        last_status = status;

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            bail!("Gave up waiting for {} after {:?} ({})", id, elapsed, last_status);
        }
        debug!("{} is {}; polling again in {:?}", id, last_status, delay);
        tokio::time::sleep(delay.min(timeout - elapsed)).await;
    }
}

async fn cmd_backups(client: &Client, file: Option<String>) -> Result<()> {
    let query: Vec<(&str, &str)> = file.iter().map(|f| ("file", f.as_str())).collect();
    let backups = client.get_with("/backups", &query).await?;
    let backups = backups.as_array().cloned().unwrap_or_default();

    if backups.is_empty() {
        println!("No backups");
        return Ok(());
    }
    for backup in backups {
        println!(
            "{}  {}  {}  {}",
            backup["createdAt"].as_str().unwrap_or_default(),
            backup["id"].as_str().unwrap_or_default(),
            backup["fileName"].as_str().unwrap_or_default(),
            backup["commandId"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}

/// Thin JSON client for the bridge
struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.get_with(path, &[]).await
    }

    /// GET with query parameters encoded by reqwest
    async fn get_with(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .get_request(path, query)
            .send()
            .await
            .with_context(|| format!("Is the bridge running at {}?", self.base))?;
        Self::decode(response).await
    }

    fn get_request(&self, path: &str, query: &[(&str, &str)]) -> reqwest::RequestBuilder {
        self.http.get(format!("{}{}", self.base, path)).query(query)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Is the bridge running at {}?", self.base))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let error = &body["error"];
            bail!(
                "{} [{}]: {}",
                status,
                error["code"].as_str().unwrap_or("UNKNOWN"),
                error["message"].as_str().unwrap_or_default()
            );
        }
        Ok(body)
    }
}
