use crate::config::Config;
use crate::error::ThrottlerResult;
use crate::middleware::ThrottleLayer;
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Demo HTTP server: a single `/` route behind the throttling layer.
pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    layer: ThrottleLayer,
}

impl Server {
    pub fn new(config: Config) -> ThrottlerResult<Self> {
        let bind_addr = config.bind_addr;
        let layer = ThrottleLayer::new(config.into_options()?)?;

        let app = Router::new()
            .route("/", get(root))
            .layer(layer.clone())
            .layer(TraceLayer::new_for_http());

        Ok(Self {
            app,
            bind_addr,
            layer,
        })
    }

    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn layer(&self) -> &ThrottleLayer {
        &self.layer
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM.
    pub async fn run(self) -> ThrottlerResult<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves, then
    /// flush the throttling notifier.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ThrottlerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Throttler server listening on {}", listener.local_addr()?);

        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        self.layer.shutdown().await;
        info!("Throttler server stopped");
        Ok(())
    }
}

async fn root() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
