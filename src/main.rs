//! Server Analytics CLI.

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zentinel_server_analytics::{Config, Decision, InboundRequest, ServerAnalytics};

#[derive(Parser, Debug)]
#[command(name = "zentinel-server-analytics")]
#[command(about = "Server analytics admission - decide which requests are recorded and why")]
#[command(version)]
struct Args {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Client IP of a request to check
    #[arg(long, value_name = "IP")]
    ip: Option<String>,

    /// HTTP method of the request to check
    #[arg(long, default_value = "GET")]
    method: String,

    /// URL or path of the request to check
    #[arg(long, default_value = "/")]
    url: String,

    /// User agent of the request to check
    #[arg(long)]
    user_agent: Option<String>,

    /// Authenticated user id of the request to check
    #[arg(long)]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match args.config {
        Some(ref path) => {
            info!(config = %path.display(), "Loading configuration");
            Config::load(path)?
        }
        None => Config::default(),
    };

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let Some(ip) = args.ip else {
        anyhow::bail!("Nothing to do: pass --ip to check a request, or --validate / --print-config");
    };

    let analytics = ServerAnalytics::new(config)?;

    let mut request = InboundRequest::new(ip, args.method, args.url);
    if let Some(user_agent) = args.user_agent {
        request = request.with_user_agent(user_agent);
    }
    if let Some(user) = args.user {
        request = request.with_user(user);
    }

    let decision = analytics.decide(&request).await;
    let output = match decision {
        Decision::Admit => {
            let record = analytics.build_record(analytics.request_details(&request));
            json!({
                "admitted": true,
                "tag": decision.tag(),
                "record": record,
            })
        }
        Decision::Exclude(reason) => json!({
            "admitted": false,
            "reason": reason.as_str(),
            "tag": decision.tag(),
        }),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    analytics.flush().await;

    Ok(())
}
