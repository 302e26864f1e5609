use clap::Parser;
use janusd::config::ProxyConfig;
use janusd::server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "janusd")]
#[command(version)]
#[command(about = "Anthropic Messages front end for OpenAI-compatible backends")]
#[command(long_about = "
janusd accepts Anthropic Messages API requests on a local port, rewrites them
into Chat Completions requests for the backend configured via OPENAI_BASE_URL,
and rewrites the responses (including tool calls, thinking blocks, and SSE
streams) back into Messages format.

Configuration is taken from the environment:
  OPENAI_API_KEY                  backend API key (optional for local backends)
  OPENAI_BASE_URL                 backend base URL (default https://api.openai.com/v1)
  ANTHROPIC_API_KEY               optional shared secret checked on x-api-key
  ANTHROPIC_DEFAULT_OPUS_MODEL    model override for the opus tier
  ANTHROPIC_DEFAULT_SONNET_MODEL  model override for the sonnet tier
  ANTHROPIC_DEFAULT_HAIKU_MODEL   model override for the haiku tier
  HOST / PORT                     listen address (default 0.0.0.0:8082)
  OPENROUTER_APP_NAME / _URL      aggregator attribution headers
")]
struct Cli {
    /// Set logging level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Override listen host
    #[arg(long)]
    host: Option<String>,

    /// Override listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match ProxyConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    info!(
        base_url = %config.openai_base_url,
        backend = %config.backend(),
        routing = config.routing_mode(),
        "starting janusd"
    );
    if let Some(model) = &config.overrides.opus {
        info!(tier = "opus", %model, "model override");
    }
    if let Some(model) = &config.overrides.sonnet {
        info!(tier = "sonnet", %model, "model override");
    }
    if let Some(model) = &config.overrides.haiku {
        info!(tier = "haiku", %model, "model override");
    }
    if config.anthropic_api_key.is_none() {
        info!("ANTHROPIC_API_KEY not set; inbound requests are not authenticated");
    }
    if config.passthrough_mode {
        warn!("PASSTHROUGH_MODE is set but not supported by this build; requests are translated");
    }

    server::run(config).await
}
