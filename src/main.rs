//! mjpeg-proxy: republish MJPEG camera streams to many HTTP clients
//!
//! Run with a single source:
//!   mjpeg-proxy --source http://camera.local/video.mjpg --bind :8080 --path /cam
//!
//! Or with a JSON sources file:
//!   mjpeg-proxy --sources sources.json --bind unix:/run/mjpeg-proxy.sock
//!
//! ```json
//! [
//!   {"Source": "http://cam1/video.mjpg", "Path": "/cam1"},
//!   {"Source": "http://cam2/video.mjpg", "Username": "admin", "Password": "secret", "Digest": true, "Path": "/cam2", "Rate": 5}
//! ]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use mjpeg_proxy::server::load_sources;
use mjpeg_proxy::{BindAddr, HubConfig, IngestConfig, ProxyServer, ServerConfig, SourceEntry};

/// Republish MJPEG streams over HTTP
#[derive(Parser, Debug)]
#[command(name = "mjpeg-proxy", version)]
#[command(about = "Fan out an MJPEG camera stream to any number of HTTP clients", long_about = None)]
struct Cli {
    /// Source URL
    #[arg(long, env = "SOURCE_URL", default_value = "http://example.com/img.mjpg")]
    source: String,

    /// Source username
    #[arg(long, env = "SOURCE_USERNAME", default_value = "")]
    username: String,

    /// Source password
    #[arg(long, env = "SOURCE_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Source uses digest authentication
    #[arg(long)]
    digest: bool,

    /// JSON file to load sources from (overrides --source)
    #[arg(long, env = "SOURCES_JSON")]
    sources: Option<PathBuf>,

    /// Bind address: host:port, :port or unix:/path
    #[arg(long, env = "SERVE_BIND", default_value = ":8080")]
    bind: String,

    /// Serving path
    #[arg(long, env = "SERVE_PATH", default_value = "/")]
    path: String,

    /// Limit output frame rate (0 = unlimited)
    #[arg(long, default_value_t = 0.0)]
    rate: f64,

    /// Limit number of worker threads (0 = one per CPU)
    #[arg(long, default_value_t = 0)]
    maxprocs: usize,

    /// Reconnect when no frame arrives within this time
    #[arg(long = "frametimeout", value_parser = humantime::parse_duration, default_value = "60s")]
    frame_timeout: Duration,

    /// Keep following the source this long after the last client left
    #[arg(long = "stopduration", value_parser = humantime::parse_duration, default_value = "60s")]
    stop_duration: Duration,

    /// Request header carrying the client address
    #[arg(long = "clientheader", default_value = "")]
    client_header: String,
}

impl Cli {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let sources = match &self.sources {
            Some(file) => load_sources(file)?,
            None => vec![SourceEntry {
                source: self.source.clone(),
                username: self.username.clone(),
                password: self.password.clone(),
                digest: self.digest,
                path: self.path.clone(),
                rate: self.rate,
            }],
        };

        let config = ServerConfig::default()
            .bind(BindAddr::parse(&self.bind)?)
            .sources(sources)
            .ingest(IngestConfig::default().frame_timeout(self.frame_timeout))
            .hub(
                HubConfig::default()
                    .stop_delay(self.stop_duration)
                    .client_header(self.client_header.clone()),
            );

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_proxy=info".parse()?),
        )
        .init();

    let config = cli.server_config().context("config")?;

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if cli.maxprocs > 0 {
        runtime.worker_threads(cli.maxprocs);
    }
    let runtime = runtime.build().context("failed to start runtime")?;

    runtime.block_on(async move {
        let server = ProxyServer::new(config).context("config")?;

        server
            .run_until(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .context("server")
    })
}
