//! Purpose: Wire the bus, store, page service, renderer, bridge, and HTTP instances together.
//! Exports: `start`, `AppHandle`.
//! Role: The one place that knows deployment order; the binary calls `start` then `run_until`.
//! Invariants: HTTP instances accept traffic only after the schema is prepared.
//! Invariants: Every instance shares one listening socket and one bus.

use futures::future;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bridge::Bridge;
use crate::bus::{EventBus, ServiceRegistration};
use crate::config::WikiConfig;
use crate::core::error::{Error, ErrorKind};
use crate::http::{self, ApiConfig};
use crate::markdown;
use crate::page::{self, PageService, PageServiceClient};
use crate::store::Store;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct AppHandle {
    local_addr: SocketAddr,
    bus: EventBus,
    store: Arc<Store>,
    registrations: Vec<ServiceRegistration>,
    shutdown_tx: watch::Sender<bool>,
    instances: Vec<JoinHandle<Result<(), Error>>>,
}

/// Prepares the store, registers the bus services, and starts
/// `http_instances` servers on one bound socket.
pub async fn start(config: WikiConfig) -> Result<AppHandle, Error> {
    config.validate()?;

    let bus = EventBus::new();
    let store = Arc::new(Store::new(config.store_config())?);
    store.start().await?;

    let service = Arc::new(PageService::new(Arc::clone(&store)));
    let registrations = vec![
        page::register(&bus, &config.wikidb_queue, service),
        markdown::register(&bus, &config.markdown_address),
    ];

    let bridge = Bridge::new(bus.clone(), config.bridge.clone());

    let listener = std::net::TcpListener::bind(config.bind).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to bind server on {}", config.bind))
            .with_source(err)
    })?;
    listener.set_nonblocking(true).map_err(io_error)?;
    let local_addr = listener.local_addr().map_err(io_error)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut instances = Vec::with_capacity(config.http_instances);
    for index in 0..config.http_instances {
        let std_listener = listener.try_clone().map_err(io_error)?;
        let listener = tokio::net::TcpListener::from_std(std_listener).map_err(io_error)?;
        let router = http::router(ApiConfig {
            pages: PageServiceClient::new(bus.clone(), config.wikidb_queue.clone()),
            bus: bus.clone(),
            page_saved_address: config.page_saved_address.clone(),
            bridge: bridge.clone(),
        });
        let mut shutdown = shutdown_rx.clone();
        instances.push(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await
                .map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })
        }));
        tracing::info!(instance = index, %local_addr, "HTTP server running");
    }

    Ok(AppHandle {
        local_addr,
        bus,
        store,
        registrations,
        shutdown_tx,
        instances,
    })
}

impl AppHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Serves until `signal` resolves or an instance exits, then shuts down.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let instances = future::select_all(self.instances.iter_mut());
        let early_exit = tokio::select! {
            (result, index, _) = instances => Some((index, result)),
            _ = signal => None,
        };

        let Some((index, result)) = early_exit else {
            return self.shutdown().await;
        };
        drop(self.instances.swap_remove(index));
        let err = match result {
            Ok(Ok(())) => Error::new(ErrorKind::Internal)
                .with_message(format!("HTTP instance {index} exited unexpectedly")),
            Ok(Err(err)) => err,
            Err(join) => Error::new(ErrorKind::Internal)
                .with_message(format!("HTTP instance {index} panicked"))
                .with_source(join),
        };
        tracing::error!(error = %err, "HTTP instance stopped");
        let _ = self.shutdown().await;
        Err(err)
    }

    /// Stops accepting connections, drains in-flight requests, and drops
    /// the bus services.
    pub async fn shutdown(self) -> Result<(), Error> {
        let AppHandle {
            shutdown_tx,
            instances,
            registrations,
            ..
        } = self;
        let _ = shutdown_tx.send(true);

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, future::join_all(instances)).await;
        for registration in registrations {
            registration.unregister();
        }
        let results = drained.map_err(|_| {
            Error::new(ErrorKind::Io).with_message("server shutdown timed out")
        })?;
        for result in results {
            match result {
                Ok(outcome) => outcome?,
                Err(join) => {
                    return Err(Error::new(ErrorKind::Internal)
                        .with_message("HTTP instance panicked")
                        .with_source(join));
                }
            }
        }
        tracing::info!("wiki stopped");
        Ok(())
    }
}

fn io_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to prepare listener")
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::start;
    use crate::config::WikiConfig;
    use crate::page::PageServiceClient;
    use std::net::SocketAddr;

    fn memory_config() -> WikiConfig {
        WikiConfig {
            db_url: ":memory:".to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..WikiConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_registers_services_and_binds() {
        let app = start(memory_config()).await.expect("start");
        assert_ne!(app.local_addr().port(), 0);
        assert!(app.store().is_ready());
        assert_eq!(app.bus().handler_count("wikidb.queue"), 1);
        assert_eq!(app.bus().handler_count("app.markdown"), 1);

        let client = PageServiceClient::new(app.bus().clone(), "wikidb.queue");
        client.create_page("Home", "# Home").await.expect("create");
        assert_eq!(client.fetch_all_pages().await.expect("names"), vec!["Home"]);

        let bus = app.bus().clone();
        app.shutdown().await.expect("shutdown");
        for _ in 0..100 {
            if bus.handler_count("wikidb.queue") == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(bus.handler_count("wikidb.queue"), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_config_fails_before_binding() {
        let config = WikiConfig {
            http_instances: 0,
            ..memory_config()
        };
        let err = start(config).await.err().expect("invalid");
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Usage);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_until_returns_after_signal() {
        let app = start(memory_config()).await.expect("start");
        app.run_until(async {}).await.expect("clean stop");
    }
}
