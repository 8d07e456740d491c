//! # Lodestar CLI Entry Point
//!
//! Demo binary for the Lodestar RPC runtime: a calculator server, a matching
//! client, and a self-contained discovery demo.
//!
//! ## Usage
//!
//! ```bash
//! # Start a calculator server
//! lodestar server -b 127.0.0.1:9000
//!
//! # Call it
//! lodestar client -a 127.0.0.1:9000 Add 10 20
//!
//! # Start a server that registers with the in-process registry and run the
//! # discovery demo (three replicas + a round-robin client, one process)
//! lodestar demo
//! ```
//!
//! The registry backend is in-process: `server --registry` and
//! `client --registry` only see each other inside one process, which is what
//! the `demo` subcommand shows off. Cross-process setups use direct mode.

mod calculator;

use std::sync::Arc;

use anyhow::Result;
use argh::FromArgs;
use lodestar_client::RpcClient;
use lodestar_common::codec::WireCodec;
use lodestar_common::ServerConfig;
use lodestar_registry::{BalancerFactory, EphemeralRegistry};
use lodestar_server::RpcServer;

use calculator::{calculator_service, BinaryOp, CalcResult};

/// Lodestar - a small RPC runtime with discovery and load balancing
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available subcommands: serve the calculator, call it, or run the
/// self-contained discovery demo.
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Server(ServerArgs),
    Client(ClientArgs),
    Demo(DemoArgs),
}

/// start a calculator RPC server
#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
struct ServerArgs {
    /// address to bind, host:port
    ///
    /// Defaults to "0.0.0.0:8080". Port 0 picks a free port; the bound
    /// address is logged at startup.
    #[argh(option, short = 'b', default = "\"0.0.0.0:8080\".into()")]
    bind: String,

    /// register with the in-process registry
    #[argh(switch, long = "registry")]
    registry: bool,

    /// registry address (namespace) to register under
    #[argh(option, long = "registry-addr", default = "\"lodestar-local\".into()")]
    registry_addr: String,

    /// wire codec: "binary" or "json"
    #[argh(option, short = 's', default = "\"binary\".into()")]
    serializer: String,

    /// instance weight advertised to weighted balancers
    #[argh(option, long = "weight", default = "1")]
    weight: i32,

    /// dispatch worker threads; 0 means hardware parallelism
    #[argh(option, long = "workers", default = "0")]
    workers: usize,
}

/// call the calculator service
#[derive(FromArgs)]
#[argh(subcommand, name = "client")]
struct ClientArgs {
    /// server address for direct mode, host:port
    #[argh(option, short = 'a', default = "\"127.0.0.1:8080\".into()")]
    addr: String,

    /// resolve the server through the in-process registry instead of --addr
    #[argh(switch, long = "registry")]
    registry: bool,

    /// registry address (namespace) to discover from
    #[argh(option, long = "registry-addr", default = "\"lodestar-local\".into()")]
    registry_addr: String,

    /// load balancer for discovery mode
    #[argh(option, long = "balancer", default = "\"round_robin\".into()")]
    balancer: String,

    /// wire codec: "binary" or "json"
    #[argh(option, short = 's', default = "\"binary\".into()")]
    serializer: String,

    /// method to call: Add, Sub, Mul, or Div
    #[argh(positional)]
    method: String,

    /// left operand
    #[argh(positional)]
    a: i32,

    /// right operand
    #[argh(positional)]
    b: i32,
}

/// run the discovery demo: three replicas plus a round-robin client
#[derive(FromArgs)]
#[argh(subcommand, name = "demo")]
struct DemoArgs {
    /// number of calculator replicas to start
    #[argh(option, short = 'n', default = "3")]
    replicas: usize,

    /// number of calls to spread over the replicas
    #[argh(option, short = 'c', default = "30")]
    calls: i32,

    /// load balancer to demonstrate
    #[argh(option, long = "balancer", default = "\"round_robin\".into()")]
    balancer: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default log level INFO; RUST_LOG overrides.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Client(args) => run_client(args).await,
        Commands::Demo(args) => run_demo(args).await,
    }
}

fn split_bind(bind: &str) -> Result<(String, u16)> {
    let (host, port) = bind
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("bind address '{}' is not host:port", bind))?;
    Ok((host.to_string(), port.parse()?))
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let (host, port) = split_bind(&args.bind)?;
    let mut config = ServerConfig::default()
        .with_bind(host, port)
        .with_serializer(&args.serializer)
        .with_service_weight(args.weight)
        .with_worker_threads(args.workers);
    if args.registry {
        config = config.with_registry("memory", &args.registry_addr);
    }

    let codec = WireCodec::by_name(&args.serializer)?;
    let server = RpcServer::new(config)?;
    server.register_service(calculator_service(codec))?;

    let addr = server.start().await?;
    tracing::info!(%addr, "calculator server running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.stop().await;
    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let codec = WireCodec::by_name(&args.serializer)?;
    let client = if args.registry {
        let registry = EphemeralRegistry::connect(&args.registry_addr, 30_000)?;
        let balancer = BalancerFactory::create(&args.balancer)?;
        RpcClient::with_discovery(registry, balancer).with_codec(codec)
    } else {
        RpcClient::direct(&args.addr).with_codec(codec)
    };

    let op = BinaryOp {
        a: args.a,
        b: args.b,
    };
    let method = args.method.clone();
    let result: CalcResult =
        tokio::task::spawn_blocking(move || client.call_typed("Calculator", &method, &op))
            .await??;

    println!("{}", result.result);
    Ok(())
}

async fn run_demo(args: DemoArgs) -> Result<()> {
    let registry_addr = "lodestar-demo";

    let mut replicas = Vec::new();
    for _ in 0..args.replicas.max(1) {
        let config = ServerConfig::default()
            .with_bind("127.0.0.1", 0)
            .with_registry("memory", registry_addr);
        let server = Arc::new(RpcServer::new(config)?);
        server.register_service(calculator_service(WireCodec::Binary))?;
        let addr = server.start().await?;
        tracing::info!(%addr, "replica started");
        replicas.push(server);
    }

    let registry = EphemeralRegistry::connect(registry_addr, 30_000)?;
    let balancer = BalancerFactory::create(&args.balancer)?;
    let client = RpcClient::with_discovery(registry, balancer);

    let calls = args.calls;
    tokio::task::spawn_blocking(move || -> Result<()> {
        for i in 1..=calls {
            let result: CalcResult =
                client.call_typed("Calculator", "Add", &BinaryOp { a: i * 10, b: i * 5 })?;
            tracing::info!(call = i, result = result.result, "Add({}, {})", i * 10, i * 5);
        }
        Ok(())
    })
    .await??;

    for replica in replicas {
        replica.stop().await;
    }
    tracing::info!("demo complete");
    Ok(())
}
