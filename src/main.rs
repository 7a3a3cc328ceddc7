use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use std::io::Write;
use std::path::{Path, PathBuf};
use tenant_router::config::{Config, ConfigError};
use tenant_router::TenantRouter;

#[derive(Parser)]
#[command(name = "tenant-router")]
#[command(about = "Resolve tenants to the backend endpoints serving them")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve tenants once and print the routing report as JSON
    Resolve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/dev.toml")]
        config: PathBuf,
        /// Tenant ids to resolve
        #[arg(short, long, required = true)]
        tenant: Vec<String>,
    },
    /// Run the router with background refresh until Ctrl-C
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/dev.toml")]
        config: PathBuf,
    },
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve { config, tenant } => resolve_tenants(config, tenant).await?,
        Commands::Run { config } => run_router(config).await?,
        Commands::Config { output } => generate_config(output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

fn load_config(config_path: &Path) -> anyhow::Result<Config> {
    let config = Config::load_from_file(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(&config);
    Ok(config)
}

async fn resolve_tenants(config_path: PathBuf, tenants: Vec<String>) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;
    let router = TenantRouter::from_config(&config).context("Failed to build tenant router")?;

    for tenant in &tenants {
        let connections = router.get_connections(tenant).await?;
        info!("Tenant {} -> {} descriptors", tenant, connections.len());
    }

    let report = router.routing_report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_router(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path)?;

    info!("Starting tenant-router v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);
    info!(
        "Instance {} routing to service {} port {}",
        config.instance.instance_id, config.instance.service_id, config.instance.port_name
    );

    let mut router = TenantRouter::from_config(&config).context("Failed to build tenant router")?;
    router.start();
    router.warm(&config.cache.warm_tenants).await?;

    let mut report_interval =
        tokio::time::interval(std::time::Duration::from_secs(config.cache.refresh_interval_sec));

    loop {
        tokio::select! {
            _ = report_interval.tick() => {
                let report = router.routing_report().await;
                info!(
                    "Routing {} tenants across {} owners",
                    report.tenant_count(),
                    report.owner_count()
                );
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
                break;
            }
        }
    }

    router.shutdown().await?;
    Ok(())
}

fn generate_config(output: PathBuf) -> anyhow::Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  tenant-router run --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Instance id: {}", config.instance.instance_id);
            println!("  Service: {} (port {})", config.instance.service_id, config.instance.port_name);
            println!(
                "  Cache TTL: {}s, refresh every {}s",
                config.cache.ttl_sec, config.cache.refresh_interval_sec
            );
            println!("  Static routes: {}", config.discovery.routes.len());
            for (i, route) in config.discovery.routes.iter().enumerate() {
                println!(
                    "    {}: {} -> {} ({} endpoints)",
                    i + 1,
                    route.tenant,
                    route.owner,
                    route.endpoints.len()
                );
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("tenant-router v{}", env!("CARGO_PKG_VERSION"));
    println!("Resolve tenants to the backend endpoints serving them");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Two-level tenant -> owner -> descriptors cache");
    println!("  • Single in-flight discovery call per tenant");
    println!("  • Background refresh ahead of expiry");
    println!("  • Routing report for diagnostics");
}

fn init_logging(config: &Config) {
    let log_level = match config.logging.level.as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).parse_default_env();

    if config.logging.format == "json" {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "level": record.level().to_string(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        });
    }

    builder.init();
    info!("Logging initialized at level: {:?}", log_level);
}
