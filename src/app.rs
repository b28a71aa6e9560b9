//! Application assembly: config → registry → shared state → serve.

use crate::cli::RunArgs;
use llm_relay_core::config::Config;
use llm_relay_core::keys::KeyRotator;
use llm_relay_core::middleware::MiddlewareChain;
use llm_relay_core::middleware::thought_signature::ThoughtSignatureMiddleware;
use llm_relay_core::registry::Registry;
use llm_relay_core::signature::SignatureCache;
use llm_relay_oauth::manager::TokenManager;
use llm_relay_oauth::store::CredentialStore;
use llm_relay_provider::UpstreamFactory;
use llm_relay_server::AppState;
use std::sync::Arc;
use std::time::Duration;

pub struct Application {
    addr: String,
    router: axum::Router,
}

impl Application {
    pub fn build(args: &RunArgs) -> anyhow::Result<Self> {
        let mut config = Config::load(&args.config)?;

        if let Some(ref host) = args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }

        let registry = Arc::new(Registry::from_config(&config)?);
        tracing::info!(
            providers = registry.list().len(),
            default = %registry.default().name,
            "provider registry initialized"
        );

        let signature_cache = Arc::new(SignatureCache::new(
            Duration::from_secs(config.signature_cache.ttl_secs),
            config.signature_cache.max_entries,
        ));
        signature_cache.spawn_sweeper(Duration::from_secs(
            config.signature_cache.sweep_interval_secs,
        ));

        let mut middleware = MiddlewareChain::new();
        middleware.add(Arc::new(ThoughtSignatureMiddleware::new(
            signature_cache.clone(),
        )));

        let tokens = TokenManager::new(CredentialStore::new(config.credentials_root()), false);

        let addr = format!("{}:{}", config.host, config.port);
        let state = AppState {
            config: Arc::new(config),
            registry,
            rotator: Arc::new(KeyRotator::new()),
            tokens: Arc::new(tokens),
            upstreams: Arc::new(UpstreamFactory::new()),
            middleware: Arc::new(middleware),
        };

        Ok(Self {
            addr,
            router: llm_relay_server::build_router(state),
        })
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        tracing::info!("starting server on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("server shut down");
        Ok(())
    }
}
