use clap::Parser;
use radius_edge::{Config, EdgeServer, ModuleRegistry};
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RADIUS edge proxy: sticky load balancing and CoA reverse routing
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "radius_edge")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    config_path: String,

    /// Validate configuration and exit (doesn't start listeners)
    #[arg(short, long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate {
                eprintln!("Configuration validation failed: {}", e);
                process::exit(1);
            }

            if std::path::Path::new(&cli.config_path).exists() {
                error!("Invalid configuration in {}: {}", cli.config_path, e);
                process::exit(1);
            }

            warn!("Could not load config file from: {}", cli.config_path);
            info!("Creating example configuration at: {}", cli.config_path);
            if let Err(e) = Config::example().to_file(&cli.config_path) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }
            info!("Please edit {} and restart the proxy", cli.config_path);
            process::exit(0);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully");
        println!("  Session storage: {:?}", config.session_storage.backend);
        println!("  Service tiers: {}", config.load_balance.service_tiers.len());
        println!("  Canaries: {}", config.load_balance.canaries.len());
        let filters: Vec<&str> = config.filters.iter().map(|f| f.name.as_str()).collect();
        println!("  Filters: [{}]", filters.join(", "));
        println!(
            "  Request cache: {:?} TTL, {} entries",
            config.request_cache_ttl(),
            config.request_cache_max_entries()
        );
        for listener in &config.listeners {
            let modules: Vec<&str> = listener.modules.iter().map(|m| m.name.as_str()).collect();
            println!(
                "  Listener {} on {}:{} -> [{}]",
                listener.name,
                listener.address,
                listener.port,
                modules.join(", ")
            );
        }
        process::exit(0);
    }

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("RADIUS edge proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config_path);

    if config.listeners.is_empty() {
        warn!("No listeners configured; nothing to serve");
    }

    let server = match EdgeServer::from_config(&config, &ModuleRegistry::new()).await {
        Ok(srv) => srv,
        Err(e) => {
            error!("Failed to start proxy: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Proxy error: {}", e);
        process::exit(1);
    }
}
