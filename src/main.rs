//! Driverkit binary - build Falco kernel artifacts from the command line

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use driverkit::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube and reqwest both link rustls; one process-wide crypto provider
    // must be installed before either opens a connection.
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install the default TLS crypto provider");
    }

    let cli = Cli::parse();
    let settings = cli.settings()?;

    // RUST_LOG wins when set; --loglevel seeds the filter otherwise.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.loglevel()))
        .map_err(|err| anyhow::anyhow!("invalid log level {:?}: {err}", settings.loglevel()))?;
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    cli.run(settings).await?;
    Ok(())
}
