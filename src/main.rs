//! EmberKV - A Versioned Key-Value Storage Node
//!
//! Main entry point: parses the command line, sets up logging, registers
//! the node's stores, and hands the socket to the selector loop.

use std::sync::Arc;

use emberkv::protocol::NativeRequestHandler;
use emberkv::server::Server;
use emberkv::store::{ErrorCodeMapper, MemoryStore, Store, StoreRepository};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Store names to register at startup
    stores: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: emberkv::DEFAULT_HOST.to_string(),
            port: emberkv::DEFAULT_PORT,
            stores: vec!["test".to_string()],
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let mut named_stores = Vec::new();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        config.host = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --host requires a value");
                        std::process::exit(1);
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        config.port = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                        i += 2;
                    } else {
                        eprintln!("Error: --port requires a value");
                        std::process::exit(1);
                    }
                }
                "--store" | "-s" => {
                    if i + 1 < args.len() {
                        named_stores.push(args[i + 1].clone());
                        i += 2;
                    } else {
                        eprintln!("Error: --store requires a name");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("EmberKV version {}", emberkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        if !named_stores.is_empty() {
            config.stores = named_stores;
        }
        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_help() {
    println!(
        r#"
EmberKV - A Versioned Key-Value Storage Node

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>     Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>     Port to listen on (default: 6666)
    -s, --store <NAME>    Register a store (repeatable; default: "test")
    -v, --version         Print version information
        --help            Print this help message

EXAMPLES:
    emberkv                               # Serve "test" on 127.0.0.1:6666
    emberkv --port 7000                   # Serve on port 7000
    emberkv -s users -s sessions          # Register two stores
"#
    );
}

fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    // Build the repository all connections share. Without a routing tier in
    // front of us, every store answers both routed and local requests.
    let repository = Arc::new(StoreRepository::new());
    for name in &config.stores {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(name.clone()));
        repository.add_local(Arc::clone(&store));
        repository.add_routed(store);
        info!(store = %name, "registered store");
    }

    let handler = Arc::new(NativeRequestHandler::new(repository, ErrorCodeMapper::new()));

    let addr = config.bind_address().parse()?;
    let server = Server::bind(addr, handler)?;
    info!(addr = %config.bind_address(), version = emberkv::VERSION, "EmberKV starting");

    server.run()?;
    Ok(())
}
