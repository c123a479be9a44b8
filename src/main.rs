use clap::Parser;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use tokio::signal;
use yubikiri_proxy::config::{Config, LogFormat, LogLevel};
use yubikiri_proxy::config_validation::validate_config;
use yubikiri_proxy::logging::{CustomLogger, init_fallback, parse_log_format, parse_log_level};
use yubikiri_proxy::server::ProxyServer;
use yubikiri_proxy::RewritingProxy;

#[derive(Parser)]
#[clap(
    version,
    about = "A rewriting HTTP proxy that routes every page reference back through itself"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., 127.0.0.1:3000)")]
    listen: Option<SocketAddr>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,

    #[clap(long, value_name = "URL", help = "Origin browsers use to reach this proxy (e.g., https://proxy.example.org)")]
    public_origin: Option<String>,

    #[clap(long, value_name = "NUM", help = "Maximum redirect hops to follow")]
    max_redirects: Option<usize>,

    #[clap(long, value_name = "SECONDS", help = "Upstream connect timeout in seconds")]
    connect_timeout: Option<u64>,

    #[clap(long, value_name = "SECONDS", help = "Upstream request timeout in seconds")]
    request_timeout: Option<u64>,

    #[clap(long, help = "Scope rewritten stylesheets to a container element")]
    scope_css: bool,

    #[clap(long, value_name = "SELECTOR", help = "Selector used for CSS scoping (default: #proxy-root)")]
    scope_selector: Option<String>,

    #[clap(long, help = "Do not inject a <base> element into rewritten documents")]
    no_base: bool,

    #[clap(long, help = "Route sub-resources through the proxy endpoint instead of the resource endpoint")]
    single_endpoint: bool,

    #[clap(long, value_name = "FILE", help = "Private key file path for HTTPS")]
    private_key: Option<String>,

    #[clap(long, value_name = "FILE", help = "Certificate file path for HTTPS")]
    certificate: Option<String>,

    #[clap(long, value_name = "LEVEL", value_parser = parse_log_level, help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<LogLevel>,

    #[clap(long, value_name = "FORMAT", value_parser = parse_log_format, help = "Log format: text or json")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        Config::default().to_file(config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let mut config = if let Some(config_file) = &args.config {
        if !Path::new(config_file).exists() {
            return Err(format!("Configuration file not found: {}", config_file).into());
        }
        Config::from_file(config_file)?
    } else {
        Config::default()
    };
    apply_args(&mut config, &args);

    init_logging(&config, &args)?;

    let validation = validate_config(&config);
    for warning in &validation.warnings {
        warn!("⚠️  {}", warning);
    }
    for suggestion in &validation.suggestions {
        info!("💡 {}", suggestion);
    }
    if !validation.is_valid {
        for e in &validation.errors {
            error!("❌ {}", e);
        }
        return Err(format!("Invalid configuration: {}", validation.errors.join("; ")).into());
    }

    info!("Starting rewriting proxy...");
    info!(
        "Endpoints: {} (navigation), {} (resources{})",
        config.proxy_path,
        config.resource_path,
        if config.split_endpoints { "" } else { ", unused" }
    );

    let server = ProxyServer::new(RewritingProxy::from_config(&config));
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down gracefully...");
        }
        result = server_handle => {
            if let Err(e) = result {
                error!("Server task error: {}", e);
            }
        }
    }

    info!("👋 Proxy server stopped. Goodbye!");
    Ok(())
}

fn apply_args(config: &mut Config, args: &Args) {
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(origin) = &args.public_origin {
        config.public_origin = Some(origin.clone());
    }
    if let Some(max_redirects) = args.max_redirects {
        config.max_redirects = max_redirects;
    }
    if let Some(secs) = args.connect_timeout {
        config.connect_timeout_secs = secs;
    }
    if let Some(secs) = args.request_timeout {
        config.request_timeout_secs = secs;
    }
    if args.scope_css {
        config.scope_css = true;
    }
    if let Some(selector) = &args.scope_selector {
        config.scope_selector = selector.clone();
    }
    if args.no_base {
        config.inject_base = false;
    }
    if args.single_endpoint {
        config.split_endpoints = false;
    }
    if args.private_key.is_some() {
        config.private_key = args.private_key.clone();
    }
    if args.certificate.is_some() {
        config.certificate = args.certificate.clone();
    }
}

fn init_logging(config: &Config, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    match config.logging.clone() {
        Some(mut logging) => {
            if args.log_level.is_some() {
                logging.level = args.log_level;
            }
            if args.log_format.is_some() {
                logging.format = args.log_format;
            }
            CustomLogger::init(logging)
        }
        None => {
            init_fallback(args.log_level, args.log_format);
            Ok(())
        }
    }
}
