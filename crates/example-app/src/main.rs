use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

/// Example web app served to the browser tests
#[derive(Parser, Debug)]
#[command(name = "example-app")]
struct Args {
    /// URL(s) to listen on; the first of a `;`-separated list is bound
    #[arg(long, env = "EXAMPLE_APP_URLS", default_value = "http://localhost:5000")]
    urls: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let (host, port) = example_app::bind_target(&args.urls)?;

    let listener = TcpListener::bind((host.as_str(), port)).await?;
    info!("Now listening on: http://{}", listener.local_addr()?);

    axum::serve(listener, example_app::router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Application is shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal");
}
