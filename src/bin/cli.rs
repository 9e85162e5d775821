//! CLI for cluster operations

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use shardkv::client::{HttpClusterTransport, RoutingClient};
use shardkv::common::types::{ServiceDescriptor, ServiceKind, StatusResponse};
use shardkv::discovery::DiscoveryClient;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv")]
#[command(about = "shardkv distributed key-value store CLI")]
#[command(version)]
struct Cli {
    /// Discovery registry URL
    #[arg(long, default_value = "http://localhost:4000")]
    discovery: String,

    /// Client id registered with discovery
    #[arg(long, default_value = "1")]
    client_id: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set a key
    Set { key: String, value: String },

    /// Get a key
    Get { key: String },

    /// Set keys from a file of `key,value` lines
    SetFromFile { path: PathBuf },

    /// Register a storage server with the master and rebalance onto it
    AddServer { id: u32 },

    /// Drain and remove a storage server
    DeleteServer { id: u32 },

    /// Re-partition the cluster into a new number of shards
    ShardCount { count: u32 },

    /// Print the master's topology maps
    Topology,

    /// Print a storage node's status
    Status { id: u32 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let discovery = DiscoveryClient::new(cli.discovery.clone());

    match cli.command {
        Commands::Set { key, value } => {
            let client = routing_client(&discovery, cli.client_id).await?;
            client.set(&key, &value).await?;
            println!("OK");
        }
        Commands::Get { key } => {
            let client = routing_client(&discovery, cli.client_id).await?;
            match client.get(&key).await? {
                Some(value) => println!("{value}"),
                None => println!("(nil)"),
            }
        }
        Commands::SetFromFile { path } => {
            let client = routing_client(&discovery, cli.client_id).await?;
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let mut count = 0usize;
            for (lineno, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Some((key, value)) = line.split_once(',') else {
                    bail!("{}:{}: expected `key,value`", path.display(), lineno + 1);
                };
                client.set(key.trim(), value.trim()).await?;
                count += 1;
            }
            println!("OK ({count} keys)");
        }
        Commands::AddServer { id } => {
            let response = master_post(&discovery, &format!("/servers/{id}")).await?;
            report(response)?;
        }
        Commands::DeleteServer { id } => {
            let master = discovery.get_master_with_retries().await?;
            let response: StatusResponse = reqwest::Client::new()
                .delete(format!("{}/servers/{id}", master.base_url()))
                .send()
                .await?
                .json()
                .await?;
            report(response)?;
        }
        Commands::ShardCount { count } => {
            let response = master_post(&discovery, &format!("/shard-count/{count}")).await?;
            report(response)?;
        }
        Commands::Topology => {
            let master = discovery.get_master_with_retries().await?;
            let base = master.base_url();
            let http = reqwest::Client::new();
            let servers: serde_json::Value =
                http.get(format!("{base}/topology/servers")).send().await?.json().await?;
            let shards: serde_json::Value =
                http.get(format!("{base}/topology/shards")).send().await?.json().await?;
            let states: serde_json::Value =
                http.get(format!("{base}/topology/states")).send().await?.json().await?;
            println!("servers: {}", serde_json::to_string_pretty(&servers)?);
            println!("shards:  {}", serde_json::to_string_pretty(&shards)?);
            println!("states:  {}", serde_json::to_string_pretty(&states)?);
        }
        Commands::Status { id } => {
            let node = discovery.get_node_with_retries(id).await?;
            let status: serde_json::Value = reqwest::Client::new()
                .get(format!("{}/status", node.base_url()))
                .send()
                .await?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

async fn routing_client(
    discovery: &DiscoveryClient,
    client_id: u32,
) -> anyhow::Result<RoutingClient<HttpClusterTransport>> {
    // Clients register too so the registry shows who is on the cluster.
    discovery
        .register(&ServiceDescriptor {
            id: client_id,
            kind: ServiceKind::Client,
            host: "localhost".to_string(),
            port: 0,
        })
        .await?;
    Ok(RoutingClient::new(HttpClusterTransport::new(
        discovery.clone(),
    )))
}

async fn master_post(discovery: &DiscoveryClient, path: &str) -> anyhow::Result<StatusResponse> {
    let master = discovery.get_master_with_retries().await?;
    let response = reqwest::Client::new()
        .post(format!("{}{path}", master.base_url()))
        .send()
        .await?
        .json()
        .await?;
    Ok(response)
}

fn report(response: StatusResponse) -> anyhow::Result<()> {
    if response.success {
        println!("OK: {}", response.message);
        Ok(())
    } else {
        bail!("{}", response.message)
    }
}
