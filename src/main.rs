//! Petpet Server
//!
//! Serves petpet GIFs generated from provider avatars, behind a
//! request-coalescing cache.

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use petpet_server::cache::CompressionAlgorithm;
use petpet_server::{
    ApiServer, ApiServerConfig, CacheType, CommandGenerator, ConfigReloader, Error,
    HttpAvatarFetcher, PetPetCache, PolicyHandle, Result, Settings, Sweeper,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Petpet Server - petpet GIF generation with a coalescing cache
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, short, env = "PETPET_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind host
    #[arg(long, env = "PETPET_HOST")]
    host: Option<String>,

    /// HTTP port
    #[arg(long, short, env = "PETPET_PORT")]
    port: Option<u16>,

    /// Result lifetime in milliseconds
    #[arg(long, env = "PETPET_CACHE_TIME")]
    cache_time: Option<u64>,

    /// Sweep interval in milliseconds
    #[arg(long, env = "PETPET_CACHE_CHECK_TIME")]
    cache_check_time: Option<u64>,

    /// Disable caching entirely
    #[arg(long, env = "PETPET_NO_CACHE")]
    no_cache: bool,

    /// Do not cache avatars
    #[arg(long, env = "PETPET_NO_AVATARS")]
    no_avatars: bool,

    /// Never expire cached results
    #[arg(long, env = "PETPET_PERMANENT_CACHE")]
    permanent_cache: bool,

    /// Cache backing: code, fs or both
    #[arg(long, env = "PETPET_CACHE_TYPE")]
    cache_type: Option<CacheType>,

    /// Filesystem cache root
    #[arg(long, env = "PETPET_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Codec for cached payloads: none, lz4, zstd or snappy
    #[arg(long, env = "PETPET_COMPRESSION")]
    compression: Option<CompressionAlgorithm>,

    /// Reload the cache policy when the config file changes
    #[arg(long, env = "PETPET_WATCH")]
    watch: bool,

    /// Avatar provider base URL
    #[arg(long, env = "PETPET_PROVIDER_URL")]
    provider_url: Option<String>,

    /// Renderer executable
    #[arg(long, env = "PETPET_RENDERER")]
    renderer: Option<String>,

    /// Metrics and health bind address
    #[arg(long, env = "PETPET_METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PETPET_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "PETPET_LOG_JSON")]
    log_json: bool,

    /// Wipe both cache backings before serving
    #[arg(long, env = "PETPET_CLEAR_CACHE")]
    clear_cache: bool,
}

impl Args {
    /// Layer flags and environment over file settings
    fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(addr) = &self.metrics_addr {
            settings.server.metrics_addr = addr.clone();
        }

        let cache = &mut settings.cache;
        if let Some(cache_time) = self.cache_time {
            cache.cache_time = cache_time;
        }
        if let Some(check) = self.cache_check_time {
            cache.cache_check_time = check;
        }
        if self.no_cache {
            cache.enabled = false;
        }
        if self.no_avatars {
            cache.avatars = false;
        }
        if self.permanent_cache {
            cache.permanent = true;
        }
        if let Some(cache_type) = self.cache_type {
            cache.cache_type = cache_type;
        }
        if let Some(dir) = &self.cache_dir {
            cache.cache_dir = dir.clone();
        }
        if let Some(compression) = self.compression {
            cache.compression = compression;
        }

        if let Some(url) = &self.provider_url {
            settings.upstream.provider_url = url.clone();
        }
        if let Some(renderer) = &self.renderer {
            settings.renderer.command = renderer.clone();
        }
    }

    /// Defaults, then the config file, then flags and environment
    fn resolve(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };
        self.apply(&mut settings);
        settings.validate()?;
        Ok(settings)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let settings = args.resolve()?;

    info!("Starting Petpet Server");
    info!("  Version: {}", petpet_server::VERSION);
    info!("  HTTP: {}:{}", settings.server.host, settings.server.port);
    info!("  Provider: {}", settings.upstream.provider_url);
    info!("  Renderer: {}", settings.renderer.command);
    info!(
        enabled = settings.cache.enabled,
        cache_type = %settings.cache.cache_type,
        cache_time_ms = settings.cache.cache_time,
        permanent = settings.cache.permanent,
        avatars = settings.cache.avatars,
        dir = %settings.cache.cache_dir.display(),
        "Cache policy"
    );

    let policy = PolicyHandle::new(settings.cache.clone());
    let fetcher = Arc::new(HttpAvatarFetcher::new(&settings.upstream)?);
    let generator = Arc::new(CommandGenerator::new(&settings.renderer));
    let cache = PetPetCache::new(
        Arc::new(policy.clone()),
        &settings.cache.cache_dir,
        fetcher,
        generator,
    );

    if args.clear_cache {
        let report = cache.clear().await;
        info!(results = report.results, avatars = report.sources, "Cache cleared on startup");
    }

    let shutdown = CancellationToken::new();

    let sweeper = Sweeper::new(cache.clone(), policy.subscribe()).spawn(shutdown.clone());

    let reloader = match (&args.config, args.watch) {
        (Some(path), true) => {
            let layering = args.clone();
            let reloader = ConfigReloader::new(path, policy.clone(), move |path| {
                let mut settings = Settings::from_file(path)?;
                layering.apply(&mut settings);
                Ok(settings.cache)
            });
            Some(reloader.spawn(shutdown.clone())?)
        }
        (None, true) => {
            warn!("--watch has no effect without --config");
            None
        }
        _ => None,
    };

    // Start metrics and health server
    let metrics_addr = settings.server.metrics_addr.clone();
    let metrics_cache = cache.clone();
    let metrics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_cache, metrics_shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        signal.cancel();
    });

    let api_server = ApiServer::new(ApiServerConfig::from(&settings.server), cache);
    let outcome = api_server.run(shutdown.clone()).await;

    shutdown.cancel();
    let _ = sweeper.await;
    if let Some(reloader) = reloader {
        let _ = reloader.await;
    }

    outcome?;
    info!("Server shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "tower=warn", "tower_http=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics & Health Server
// =============================================================================

/// Prometheus view of the cache statistics, refreshed on every scrape
#[derive(Clone)]
struct Exporter {
    cache: PetPetCache,
    entries: prometheus::IntGaugeVec,
    in_flight: prometheus::IntGaugeVec,
    memory_bytes: prometheus::IntGaugeVec,
    responses: prometheus::IntGaugeVec,
    engine: prometheus::IntGaugeVec,
    average_ms: prometheus::GaugeVec,
}

impl Exporter {
    fn register(cache: PetPetCache) -> Result<Self> {
        let registered = |e: prometheus::Error| Error::Internal(format!("metrics: {}", e));

        Ok(Self {
            cache,
            entries: prometheus::register_int_gauge_vec!(
                "petpet_cache_entries",
                "Cached entries by kind and backing",
                &["kind", "tier"]
            )
            .map_err(registered)?,
            in_flight: prometheus::register_int_gauge_vec!(
                "petpet_in_flight",
                "Productions currently running by kind",
                &["kind"]
            )
            .map_err(registered)?,
            memory_bytes: prometheus::register_int_gauge_vec!(
                "petpet_cache_memory_bytes",
                "Payload bytes held in memory by kind",
                &["kind"]
            )
            .map_err(registered)?,
            responses: prometheus::register_int_gauge_vec!(
                "petpet_responses",
                "Responses served since start by route and outcome",
                &["route", "outcome"]
            )
            .map_err(registered)?,
            engine: prometheus::register_int_gauge_vec!(
                "petpet_engine_events",
                "Productions, avatar fetches and evictions since start",
                &["event"]
            )
            .map_err(registered)?,
            average_ms: prometheus::register_gauge_vec!(
                "petpet_response_time_average_ms",
                "Average response time by origin",
                &["origin"]
            )
            .map_err(registered)?,
        })
    }

    async fn refresh(&self) {
        let stats = self.cache.stats().await;

        for (kind, kind_stats) in [("gif", &stats.cache.gif), ("avatar", &stats.cache.avatar)] {
            let tiers = kind_stats.tiers;
            self.entries.with_label_values(&[kind, "memory"]).set(tiers.memory as i64);
            self.entries.with_label_values(&[kind, "filesystem"]).set(tiers.filesystem as i64);
            self.in_flight.with_label_values(&[kind]).set(kind_stats.processing as i64);
            self.memory_bytes.with_label_values(&[kind]).set(kind_stats.memory_bytes as i64);
        }

        let routes = &stats.response.routes;
        for (route, snapshot) in [("/:id", routes.petpet), ("/avatar/:id", routes.avatar)] {
            self.responses.with_label_values(&[route, "success"]).set(snapshot.successful as i64);
            self.responses.with_label_values(&[route, "failure"]).set(snapshot.failed as i64);
        }

        let engine = &stats.engine;
        self.engine.with_label_values(&["production"]).set(engine.productions as i64);
        self.engine.with_label_values(&["fetch"]).set(engine.fetches as i64);
        self.engine.with_label_values(&["eviction"]).set(engine.evictions as i64);

        let average = &stats.response.average;
        self.average_ms.with_label_values(&["scratch"]).set(average.from_scratch);
        self.average_ms.with_label_values(&["cache"]).set(average.from_cache);
    }
}

async fn run_metrics_server(
    addr: &str,
    cache: PetPetCache,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    fn plain(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        response
    }

    let exporter = Exporter::register(cache)?;

    let make_svc = make_service_fn(move |_conn| {
        let exporter = exporter.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let exporter = exporter.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            exporter.refresh().await;
                            let mut buffer = Vec::new();
                            match TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
                                Ok(()) => {
                                    let mut response = plain(StatusCode::OK, buffer);
                                    response.headers_mut().insert(
                                        CONTENT_TYPE,
                                        HeaderValue::from_static(prometheus::TEXT_FORMAT),
                                    );
                                    response
                                }
                                Err(e) => plain(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                            }
                        }
                        "/healthz" | "/livez" | "/readyz" => plain(StatusCode::OK, "ok"),
                        _ => plain(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
