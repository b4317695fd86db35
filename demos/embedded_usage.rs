// # embedded_usage - altroute embedding example
//
// Wires the routing engine with the RFC 8484 DoH provider and the pinned
// HTTPS transport, issues one API request through it, and prints what
// happened. A blocked primary is handled transparently by discovery.
//
// ## Configuration
//
// - `ALTROUTE_PRIMARY_DOMAIN`: primary API domain (required)
// - `ALTROUTE_ZONE`: DNS zone publishing the alternate TXT records (required)
// - `ALTROUTE_DOH_PROVIDERS`: comma-separated DoH query URLs, in priority order
// - `ALTROUTE_PINS`: comma-separated `domain=base64pin` entries (`*` for discovered alternates)
// - `ALTROUTE_ALLOW_ALTERNATIVE_ROUTING`: `false` to never leave the primary (default `true`)
// - `ALTROUTE_PROXY_STORE_PATH`: JSON file for known proxies (memory when unset)
// - `ALTROUTE_REQUEST_PATH`: path requested once started (default `/tests/ping`)
// - `ALTROUTE_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export ALTROUTE_PRIMARY_DOMAIN=api.example.com
// export ALTROUTE_ZONE=routing.example.net
// export ALTROUTE_PINS='*=EU6TS9MO0L/GsDHvVc9D5fChYLNy5JdGYpJw0ccgetM='
// cargo run -p embedded_usage
// ```

use altroute_core::store::open_store;
use altroute_core::traits::DohProviderFactory;
use altroute_core::{
    ApiRequest, ProxyCacheConfig, RoutingConfig, RoutingEngine, RoutingEvent, UserFacingError,
};
use altroute_doh::Rfc8484ProviderFactory;
use altroute_transport::HttpsConnector;
use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_DOH_PROVIDERS: &str = "https://dns11.quad9.net/dns-query,https://dns.google/dns-query";

/// Exit codes
#[derive(Debug, Clone, Copy)]
enum DemoExitCode {
    /// Request completed
    Success = 0,
    /// Configuration or startup error
    ConfigError = 1,
    /// Service could not be reached
    Unreachable = 2,
    /// Connection could not be trusted
    Untrusted = 3,
}

impl From<DemoExitCode> for ExitCode {
    fn from(code: DemoExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Settings read from the environment
struct Settings {
    routing: RoutingConfig,
    request_path: String,
    log_level: String,
}

impl Settings {
    fn from_env() -> Result<Self> {
        let primary = env::var("ALTROUTE_PRIMARY_DOMAIN").context("ALTROUTE_PRIMARY_DOMAIN is required")?;
        let zone = env::var("ALTROUTE_ZONE").context("ALTROUTE_ZONE is required")?;

        let mut routing = RoutingConfig::new(primary, zone);

        let providers = env::var("ALTROUTE_DOH_PROVIDERS").unwrap_or_else(|_| DEFAULT_DOH_PROVIDERS.to_string());
        for url in providers.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            routing = routing.with_doh_provider(url);
        }

        if let Ok(pins) = env::var("ALTROUTE_PINS") {
            for entry in pins.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let (domain, pin) = entry
                    .split_once('=')
                    .with_context(|| format!("ALTROUTE_PINS entry '{}' is not domain=pin", entry))?;
                routing = routing.with_pin(domain.trim(), pin.trim());
            }
        }

        if let Ok(allow) = env::var("ALTROUTE_ALLOW_ALTERNATIVE_ROUTING") {
            let allow = allow
                .parse::<bool>()
                .with_context(|| format!("ALTROUTE_ALLOW_ALTERNATIVE_ROUTING must be true or false, got '{}'", allow))?;
            routing = routing.with_alternative_routing(allow);
        }

        if let Ok(path) = env::var("ALTROUTE_PROXY_STORE_PATH") {
            routing.proxy_cache = ProxyCacheConfig::File { path };
        }

        Ok(Self {
            routing,
            request_path: env::var("ALTROUTE_REQUEST_PATH").unwrap_or_else(|_| "/tests/ping".to_string()),
            log_level: env::var("ALTROUTE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DemoExitCode::ConfigError.into();
        }
    };

    if let Err(e) = settings.routing.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DemoExitCode::ConfigError.into();
    }

    let log_level = match settings.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DemoExitCode::ConfigError.into();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DemoExitCode::ConfigError.into();
        }
    };

    runtime.block_on(run(settings)).into()
}

async fn run(settings: Settings) -> DemoExitCode {
    let engine = match start(&settings.routing).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            return DemoExitCode::ConfigError;
        }
    };

    info!("Requesting {} via {}", settings.request_path, engine.active_domain());

    match engine.execute(ApiRequest::get(settings.request_path.as_str())).await {
        Ok(response) => {
            info!("{} answered {} ({} bytes)", engine.active_domain(), response.status, response.body.len());
            DemoExitCode::Success
        }
        Err(e) => match e.user_facing() {
            Some(class) => {
                error!("{} ({})", class.message(), e);
                match class {
                    UserFacingError::CannotReachService => DemoExitCode::Unreachable,
                    UserFacingError::ConnectionNotTrusted => DemoExitCode::Untrusted,
                }
            }
            None => {
                error!("Request failed: {}", e);
                DemoExitCode::Unreachable
            }
        },
    }
}

async fn start(config: &RoutingConfig) -> Result<RoutingEngine> {
    let providers = Rfc8484ProviderFactory::new()?.create_all(&config.doh_providers)?;
    let connector = Arc::new(HttpsConnector::new(config.transport.clone()));
    let store = open_store(&config.proxy_cache).await?;

    let (engine, mut events) = RoutingEngine::new(config.clone(), providers, connector, store).await?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RoutingEvent::PinMismatch { domain } => {
                    warn!("Rejected {}: certificate not pinned", domain)
                }
                RoutingEvent::Switched { from, to, .. } => info!("Now routing via {} (was {})", to, from),
                other => info!("Routing event: {:?}", other),
            }
        }
    });

    Ok(engine)
}
