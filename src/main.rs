//! Private Gateway CLI
//!
//! Usage:
//!   private-gateway serve                      # Run the parcel collection endpoint
//!   private-gateway serve --port 13276         # ... on a specific port
//!   private-gateway register [ADDRESS]         # Register with a public gateway
//!   private-gateway courier-sync               # Run one courier sync (subprocess entry)

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use private_gateway::courier::cogrpc::WsCourierClientFactory;
use private_gateway::courier::{CourierSyncDriver, ProcNetRouteResolver, StageNotifier};
use private_gateway::registrar::{GatewayRegistrar, HttpPowebClientFactory};
use private_gateway::server::ws::{serve, ParcelCollectionState};
use private_gateway::stores::SqliteStore;

fn print_usage() {
    println!("Private Gateway v0.1.0");
    println!();
    println!("Usage:");
    println!("  private-gateway serve                   Run the parcel collection endpoint");
    println!("  private-gateway register [ADDRESS]      Register with a public gateway");
    println!("  private-gateway courier-sync            Run one courier sync");
    println!();
    println!("Options:");
    println!("  --db-path <PATH>        Database path (default: gateway.db)");
    println!("  --port <PORT>           Parcel collection port (default: 13276)");
    println!("  --help, -h              Show this help");
    println!();
    println!("Environment:");
    println!("  RUST_LOG                Set log level (e.g., info, debug)");
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") || args.len() < 2 {
        print_usage();
        return;
    }

    // Logs go to stderr: in courier-sync mode stdout carries the IPC
    // stream to the parent process.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let db_path: PathBuf = args
        .windows(2)
        .find(|w| w[0] == "--db-path")
        .map(|w| PathBuf::from(&w[1]))
        .unwrap_or_else(|| PathBuf::from("gateway.db"));

    let store = match SqliteStore::open(&db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Failed to open database {}: {}", db_path.display(), e);
            std::process::exit(2);
        }
    };

    match args[1].as_str() {
        "serve" => {
            let port: u16 = args
                .windows(2)
                .find(|w| w[0] == "--port")
                .and_then(|w| w[1].parse().ok())
                .unwrap_or(13276);
            let addr: SocketAddr = ([127, 0, 0, 1], port).into();

            info!(db = %db_path.display(), "starting parcel collection endpoint");
            let state = ParcelCollectionState {
                parcel_store: store.clone(),
                key_store: store,
            };
            if let Err(e) = serve(addr, state).await {
                eprintln!("Server failed: {e}");
                std::process::exit(2);
            }
        }
        "register" => {
            let registrar = GatewayRegistrar::new(
                store.clone(),
                store,
                Arc::new(HttpPowebClientFactory),
            );
            let result = match args.get(2).filter(|a| !a.starts_with("--")) {
                Some(address) => registrar.register(address).await,
                None => registrar.register_if_unregistered().await,
            };
            if let Err(e) = result {
                eprintln!("Registration failed: {e}");
                std::process::exit(2);
            }
            println!("Registered.");
        }
        "courier-sync" => {
            let driver = CourierSyncDriver::new(
                store.clone(),
                store.clone(),
                store,
                Arc::new(WsCourierClientFactory),
                Arc::new(ProcNetRouteResolver),
            );
            let mut notifier = StageNotifier::new(tokio::io::stdout());
            let code = driver.run(&mut notifier).await;
            std::process::exit(code);
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            std::process::exit(2);
        }
    }
}
