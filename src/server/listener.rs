//! HTTP listener
//!
//! Builds one ingester and hub per configured source and serves every hub on
//! a single TCP or unix socket listener.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::error::{ConfigError, Result};
use crate::hub::Hub;
use crate::ingest::Ingester;
use crate::server::config::{BindAddr, ServerConfig};

/// MJPEG proxy server
pub struct ProxyServer {
    config: ServerConfig,
    hubs: Vec<Arc<Hub>>,
}

impl ProxyServer {
    /// Validate the configuration and start one hub per source
    ///
    /// Must be called inside a tokio runtime. Upstreams are only contacted
    /// once a client joins.
    pub fn new(config: ServerConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let mut hubs = Vec::with_capacity(config.sources.len());
        for entry in &config.sources {
            let ingester = Ingester::new(entry.source_config(), config.ingest.clone())?;
            tracing::info!(path = %entry.path, source = %ingester.describe(), "Serving source");

            let hub = Arc::new(Hub::new(entry.path.clone(), ingester, config.hub.clone()));
            hub.start();
            hubs.push(hub);
        }

        Ok(Self { config, hubs })
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Hubs in configuration order
    pub fn hubs(&self) -> &[Arc<Hub>] {
        &self.hubs
    }

    /// Router serving every hub at its path
    pub fn router(&self) -> Router {
        self.hubs
            .iter()
            .fold(Router::new(), |router, hub| router.merge(hub.router()))
    }

    /// Run the server until the process is killed
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` completes every hub is shut down first, which ends all
    /// open streams, then the listener stops.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.config.bind {
            BindAddr::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                self.serve(listener, shutdown).await
            }
            BindAddr::Unix(path) => self.serve_unix(path, shutdown).await,
        }
    }

    /// Serve on an already bound TCP listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(addr = %listener.local_addr()?, "MJPEG proxy listening");

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(self.shutdown_signal(shutdown))
            .await?;

        tracing::info!("MJPEG proxy stopped");
        Ok(())
    }

    #[cfg(unix)]
    async fn serve_unix<F>(&self, path: &std::path::Path, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        use std::os::unix::fs::FileTypeExt;

        // Left behind by a previous run
        if let Ok(meta) = std::fs::symlink_metadata(path) {
            if meta.file_type().is_socket() {
                std::fs::remove_file(path)?;
            }
        }

        let listener = tokio::net::UnixListener::bind(path)?;
        tracing::info!(path = %path.display(), "MJPEG proxy listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(self.shutdown_signal(shutdown))
            .await?;

        tracing::info!("MJPEG proxy stopped");
        Ok(())
    }

    #[cfg(not(unix))]
    async fn serve_unix<F>(&self, path: &std::path::Path, _shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Err(ConfigError::InvalidBindAddr(format!("unix:{}", path.display())).into())
    }

    fn shutdown_signal<F>(&self, shutdown: F) -> impl Future<Output = ()> + Send + 'static
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let hubs = self.hubs.clone();
        async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
            for hub in &hubs {
                hub.shutdown().await;
            }
        }
    }

    /// Shut down every hub without stopping a listener
    pub async fn shutdown(&self) {
        for hub in &self.hubs {
            hub.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubState;
    use crate::server::config::SourceEntry;

    fn config() -> ServerConfig {
        ServerConfig::default()
            .bind(BindAddr::parse("127.0.0.1:0").unwrap())
            .source(SourceEntry::new("http://127.0.0.1:1/a.mjpg", "/a"))
            .source(SourceEntry::new("http://127.0.0.1:1/b.mjpg", "/b"))
    }

    #[tokio::test]
    async fn test_new_starts_one_hub_per_source() {
        let server = ProxyServer::new(config()).unwrap();

        let paths: Vec<&str> = server.hubs().iter().map(|hub| hub.path()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);

        for hub in server.hubs() {
            let stats = hub.stats().await.unwrap();
            assert_eq!(stats.state, HubState::NoSubscribers);
            assert_eq!(stats.ingest.connects, 0);
        }
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = config().source(SourceEntry::new("http://127.0.0.1:1/c.mjpg", "/a"));
        assert_eq!(
            ProxyServer::new(config).err(),
            Some(ConfigError::DuplicatePath("/a".into()))
        );

        for path in ["/:cam", "/*all", "/cam/{x", "/{cam}"] {
            let config = ServerConfig::default().source(SourceEntry::new("http://127.0.0.1:1/", path));
            assert_eq!(
                ProxyServer::new(config).err(),
                Some(ConfigError::InvalidPath(path.into()))
            );
        }

        let config = ServerConfig::default().source(SourceEntry::new("not a url", "/"));
        assert!(matches!(
            ProxyServer::new(config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_router_accepts_validated_paths() {
        let config = config().source(SourceEntry::new("http://127.0.0.1:1/c.mjpg", "/cam:1/a*b"));
        let server = ProxyServer::new(config).unwrap();

        let _router = server.router();
        assert_eq!(server.hubs().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_closes_hubs() {
        let server = ProxyServer::new(config()).unwrap();
        server.shutdown().await;

        assert!(server.hubs().iter().all(|hub| hub.is_closed()));
    }
}
