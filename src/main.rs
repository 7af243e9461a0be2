//! Entry point wiring CLI dispatch to the training and classification pipelines.

mod cli;

use anyhow::Result;
use cli::Cli;
use miml_re::{config::Settings, logging};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose)?;
    let settings = Settings::load()?;

    info!(?cli, threads = settings.threads, "starting command");
    cli.dispatch(settings).await
}
