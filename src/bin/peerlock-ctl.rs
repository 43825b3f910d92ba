use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;

use peerlock::api::paths;
use peerlock::node::{PeersResponse, ResourceResponse, StatusResponse};

#[derive(Parser)]
#[command(name = "peerlock-ctl")]
#[command(about = "Control a running peerlock peer over its HTTP API")]
struct Cli {
    /// HTTP address of the peer (e.g., "127.0.0.1:8420")
    #[arg(long, default_value = "127.0.0.1:8420", env("PEERLOCK_CTL_TARGET"))]
    target: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the peers this peer knows about
    Peers,
    /// Show this peer's mutex state
    Status,
    /// Ask for the shared resource
    Acquire,
    /// Give the shared resource back early
    Release,
    /// Leave the group
    Leave,
    /// Poll status until the peer holds the resource
    Wait {
        /// Give up after this many seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::builder().timeout(Duration::from_secs(35)).build()?;
    let base = format!("http://{}", cli.target);

    match cli.command {
        Commands::Peers => show_peers(&client, &base).await?,
        Commands::Status => show_status(&client, &base).await?,
        Commands::Acquire => post_resource(&client, &base, paths::resource::ACQUIRE).await?,
        Commands::Release => post_resource(&client, &base, paths::resource::RELEASE).await?,
        Commands::Leave => post_resource(&client, &base, paths::LEAVE).await?,
        Commands::Wait { timeout_secs } => wait_for_hold(&client, &base, timeout_secs).await?,
    }

    Ok(())
}

async fn show_peers(client: &Client, base: &str) -> Result<(), Box<dyn std::error::Error>> {
    let response: PeersResponse = client
        .get(format!("{}{}", base, paths::PEERS))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    println!("Peers known to {}:", response.peer_id);
    for peer in &response.peers {
        let marker = if Some(&peer.id) == response.holder.as_ref() {
            "🔒"
        } else {
            "  "
        };
        println!(
            "{} {:<16} {:<8} last heartbeat {}",
            marker,
            peer.id,
            peer.status,
            peer.last_heartbeat.format("%H:%M:%S%.3f")
        );
    }
    if response.holder.is_none() {
        println!("Nobody holds the resource");
    }
    Ok(())
}

async fn show_status(client: &Client, base: &str) -> Result<(), Box<dyn std::error::Error>> {
    let status = fetch_status(client, base).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn fetch_status(client: &Client, base: &str) -> Result<StatusResponse, reqwest::Error> {
    client
        .get(format!("{}{}", base, paths::STATUS))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

async fn post_resource(
    client: &Client,
    base: &str,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client.post(format!("{}{}", base, path)).send().await?;
    if response.status().is_success() {
        let body: ResourceResponse = response.json().await?;
        println!("✅ {} ({}): {}", body.peer_id, body.status, body.message);
        return Ok(());
    }

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("no details");
    println!("❌ {} failed with {}: {}", paths::drop_leading_slash(path), status, message);
    Err(format!("request failed with {}", status).into())
}

async fn wait_for_hold(
    client: &Client,
    base: &str,
    timeout_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        let status = fetch_status(client, base).await?;
        if status.status == peerlock::node::PeerStatus::Holding {
            println!("🔒 {} holds the resource", status.peer_id);
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("{} still {} after {}s", status.peer_id, status.status, timeout_secs).into());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
