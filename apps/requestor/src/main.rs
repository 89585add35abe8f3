use ai_requestor::{Args, SessionTuning, StdinPrompts, init_tracing, run_session};
use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_file.as_deref())?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, shutting down");
        ctrl_c.cancel();
    });

    let mut prompts = StdinPrompts::default();
    let summary = run_session(&args, SessionTuning::default(), &mut prompts, &cancel).await?;
    info!(
        prompts = summary.prompts,
        images = summary.images_written.len(),
        "requestor finished"
    );
    Ok(())
}
