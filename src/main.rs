use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use jobwarden::api::{
    AckResponse, MigrateRequest, StatusResponse, MIGRATE_PATH, RECOVER_TRIGGER_PATH, STATUS_PATH,
};
use jobwarden::config::NodeConfig;
use jobwarden::error::WardenError;
use jobwarden::membership::NodeAddress;
use jobwarden::node::Node;
use jobwarden::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "jobwarden")]
#[command(version)]
#[command(about = "Failover and partitioning coordinator for a distributed batch-job scheduler")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a coordinator node
    Server(ServerArgs),

    /// Move all work off a node, as if it had been reported dead
    Migrate {
        #[command(flatten)]
        client: ClientArgs,

        /// Address of the node to drain
        #[arg(long)]
        node: String,
    },

    /// Make a node re-scan the work assigned to it
    Trigger {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Show coordinator state of a node
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for the node API
    #[arg(long, default_value = "8090")]
    port: u16,

    /// Address peers use to reach this node (defaults to 127.0.0.1:<port>)
    #[arg(long)]
    advertise: Option<String>,

    /// Peer node addresses (comma-separated, format: "host:port")
    #[arg(long, default_value = "")]
    peers: String,

    /// Start as leader
    #[arg(long)]
    leader: bool,

    /// Rows read per page while reclaiming a dead node
    #[arg(long, default_value = "1000")]
    page_size: usize,

    /// Heartbeat timeout before a peer is reported dead
    #[arg(long, default_value = "10000")]
    heartbeat_timeout_ms: u64,
}

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Node API address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8090")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn parse_peers(peers: &str) -> Result<Vec<NodeAddress>, WardenError> {
    peers
        .split(',')
        .map(str::trim)
        .filter(|peer| !peer.is_empty())
        .map(|peer| {
            if peer.contains(':') {
                Ok(NodeAddress::new(peer))
            } else {
                Err(WardenError::Config(format!(
                    "invalid peer {:?}, expected host:port",
                    peer
                )))
            }
        })
        .collect()
}

fn endpoint(addr: &str, path: &str) -> String {
    let base = addr.trim_end_matches('/');
    if base.contains("://") {
        format!("{}{}", base, path)
    } else {
        format!("http://{}{}", base, path)
    }
}

// =============================================================================
// Server
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let advertise = args
        .advertise
        .unwrap_or_else(|| format!("127.0.0.1:{}", args.port));

    let mut config = NodeConfig::new(listen_addr).with_advertised_address(advertise);
    for peer in parse_peers(&args.peers)? {
        config = config.with_peer(peer);
    }
    config.coordinator = config.coordinator.with_page_size(args.page_size);
    config.monitor.heartbeat_timeout_ms = args.heartbeat_timeout_ms;

    tracing::info!(
        listen_addr = %config.listen_addr,
        local_address = %config.local_address(),
        peers = ?config.peers.iter().map(NodeAddress::as_str).collect::<Vec<_>>(),
        leader = args.leader,
        "Starting jobwarden node"
    );

    let shutdown = install_shutdown_handler()?;
    let node = Node::new(config)?;
    node.set_leader(args.leader);
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

fn print_ack(ack: &AckResponse, action: &str, output_format: &OutputFormat) -> serde_json::Result<()> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(ack)?),
        OutputFormat::Table => {
            if ack.success {
                println!("{}: ok", action);
            } else {
                println!(
                    "{}: failed ({})",
                    action,
                    ack.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    Ok(())
}

async fn handle_migrate(
    client: &reqwest::Client,
    args: &ClientArgs,
    node: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let ack: AckResponse = client
        .post(endpoint(&args.addr, MIGRATE_PATH))
        .json(&MigrateRequest { node: node.clone() })
        .send()
        .await?
        .json()
        .await?;
    print_ack(&ack, &format!("Migrate {}", node), &args.output)?;
    Ok(())
}

async fn handle_trigger(
    client: &reqwest::Client,
    args: &ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let ack: AckResponse = client
        .post(endpoint(&args.addr, RECOVER_TRIGGER_PATH))
        .send()
        .await?
        .json()
        .await?;
    print_ack(&ack, "Recovery trigger", &args.output)?;
    Ok(())
}

async fn handle_status(
    client: &reqwest::Client,
    args: &ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let status: StatusResponse = client
        .get(endpoint(&args.addr, STATUS_PATH))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Table => {
            println!("Coordinator Status");
            println!("{}", "=".repeat(40));
            println!("Address:         {}", status.local_address);
            println!("State:           {}", status.state);
            println!("Pending reports: {}", status.pending_reports);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Migrate { client, node } => {
            handle_migrate(&reqwest::Client::new(), &client, node).await?;
        }
        Commands::Trigger { client } => {
            handle_trigger(&reqwest::Client::new(), &client).await?;
        }
        Commands::Status { client } => {
            handle_status(&reqwest::Client::new(), &client).await?;
        }
    }

    Ok(())
}
