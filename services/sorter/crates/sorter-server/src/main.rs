//! smartbin server entry point.
//!
//! Initialises tracing, loads configuration from `SMARTBIN_*` environment
//! variables, connects the configured state store and serves the
//! classification API over HTTP or HTTPS.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use smartbin_common::config::ENV_PREFIX;
use smartbin_common::{ServerConfig, StoreSettings};
use tracing_subscriber::EnvFilter;

use smartbin_server::{
    install_crypto_provider, routes, store, AppState, BinLifecycleController, ImageFetcher,
    LifecycleConfig, RemoteModel,
};

fn load_config() -> Result<(ServerConfig, StoreSettings)> {
    let config: ServerConfig = envy::prefixed(ENV_PREFIX)
        .from_env()
        .context("failed to load server config from SMARTBIN_* env vars")?;
    let settings: StoreSettings = envy::prefixed(ENV_PREFIX)
        .from_env()
        .context("failed to load store settings from SMARTBIN_* env vars")?;
    check_config(&config, &settings)?;
    Ok((config, settings))
}

fn check_config(config: &ServerConfig, settings: &StoreSettings) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow!("invalid server config: {e}"))?;
    settings
        .validate()
        .map_err(|e| anyhow!("invalid store settings: {e}"))
}

fn lifecycle_config(config: &ServerConfig, settings: &StoreSettings) -> LifecycleConfig {
    LifecycleConfig {
        dwell: Duration::from_secs(config.dwell_secs),
        policy: config.cycle_policy,
        store_timeout: Duration::from_secs(settings.store_timeout_secs),
        write_queue: config.write_queue,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("smartbin-server starting");

    let (config, settings) = load_config()?;
    install_crypto_provider();

    tracing::info!(
        listen_addr  = %config.listen_addr,
        model_url    = %config.model_url,
        backend      = ?settings.store_backend,
        dwell_secs   = config.dwell_secs,
        cycle_policy = ?config.cycle_policy,
        tls_enabled  = config.tls_cert.is_some(),
        "configuration loaded",
    );

    let store = store::connect(&settings)
        .await
        .context("failed to connect state store")?;
    let controller = BinLifecycleController::new(store, lifecycle_config(&config, &settings));

    let model_timeout = Duration::from_secs(config.model_timeout_secs);
    let classifier = RemoteModel::new(&config.model_url, model_timeout)
        .context("failed to initialise model client")?;
    let fetcher = ImageFetcher::new(model_timeout, config.max_upload_bytes)
        .context("failed to initialise image downloader")?;

    let state = Arc::new(AppState::new(
        controller,
        Arc::new(classifier),
        fetcher,
        config.bin_location(),
        config.max_upload_bytes,
    ));
    let router = routes::router(state);

    let addr: std::net::SocketAddr = config
        .listen_addr
        .parse()
        .context("invalid listen address")?;

    if let (Some(cert_path), Some(key_path)) = (&config.tls_cert, &config.tls_key) {
        tracing::info!(cert = %cert_path, "TLS enabled");
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("failed to load TLS certificates")?;

        tracing::info!("smartbin API ready on https://{}", config.listen_addr);

        axum_server::bind_rustls(addr, tls_config)
            .serve(router.into_make_service())
            .await
            .context("HTTPS server error")?;
    } else {
        tracing::info!(
            "smartbin API ready on http://{} (TLS disabled)",
            config.listen_addr
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind TCP listener")?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;
    }

    tracing::info!("smartbin-server shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartbin_common::CyclePolicy;

    #[test]
    fn lifecycle_config_follows_env_settings() {
        let config = ServerConfig {
            dwell_secs: 3,
            cycle_policy: CyclePolicy::SingleActive,
            write_queue: 4,
            ..ServerConfig::default()
        };
        let settings = StoreSettings {
            store_timeout_secs: 2,
            ..StoreSettings::default()
        };
        let lifecycle = lifecycle_config(&config, &settings);
        assert_eq!(lifecycle.dwell, Duration::from_secs(3));
        assert_eq!(lifecycle.policy, CyclePolicy::SingleActive);
        assert_eq!(lifecycle.store_timeout, Duration::from_secs(2));
        assert_eq!(lifecycle.write_queue, 4);
    }

    #[test]
    fn zero_timings_fail_config_check() {
        let defaults = (ServerConfig::default(), StoreSettings::default());
        assert!(check_config(&defaults.0, &defaults.1).is_ok());

        let no_dwell = ServerConfig {
            dwell_secs: 0,
            ..ServerConfig::default()
        };
        let err = check_config(&no_dwell, &defaults.1).unwrap_err();
        assert!(err.to_string().contains("SMARTBIN_DWELL_SECS"));

        let no_timeout = StoreSettings {
            store_timeout_secs: 0,
            ..StoreSettings::default()
        };
        let err = check_config(&defaults.0, &no_timeout).unwrap_err();
        assert!(err.to_string().contains("SMARTBIN_STORE_TIMEOUT_SECS"));
    }

    #[test]
    fn default_config_uses_ten_second_dwell() {
        let lifecycle = lifecycle_config(&ServerConfig::default(), &StoreSettings::default());
        assert_eq!(lifecycle, LifecycleConfig::default());
    }
}
