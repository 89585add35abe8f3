use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use compute_market::{
    AdmissionPolicy, ClusterConfig, ClusterView, ConstraintSet, ServiceConfig,
    SimulatedMarketConfig, SimulatedMarketplace, SimulatedProvider,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use txt2img_client::ProxyClient;
use txt2img_protocol::DEFAULT_CHUNK_SIZE;
use txt2img_server::{Txt2ImgService, make_txt2img_http_server};
use uuid::Uuid;

use crate::cli::Args;
use crate::driver::{DEFAULT_CALL_GRACE, Driver, DriverOptions, DriverSummary};
use crate::prompt::PromptSource;

/// Session-level knobs that are not exposed on the command line.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub deploy_delay: Duration,
    pub call_grace: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            deploy_delay: Duration::from_millis(500),
            call_grace: DEFAULT_CALL_GRACE,
        }
    }
}

/// Providers published by the local marketplace, all in `subnet`.
pub fn demo_providers(count: usize, subnet: &str) -> Vec<SimulatedProvider> {
    (0..count)
        .map(|index| {
            SimulatedProvider::new(format!("provider-{index}"), format!("sim-node-{index}"))
                .in_subnet(subnet)
        })
        .collect()
}

/// Hire instances, drive the prompt loop until `cancel` fires or prompts run out, then
/// release everything that was hired.
pub async fn run_session(
    args: &Args,
    tuning: SessionTuning,
    prompts: &mut dyn PromptSource,
    cancel: &CancellationToken,
) -> Result<DriverSummary> {
    let app_key = Uuid::new_v4().simple().to_string();
    let mirror = Txt2ImgService::builtin(DEFAULT_CHUNK_SIZE).with_auth_token(app_key.clone());
    let server = make_txt2img_http_server(SocketAddr::from(([127, 0, 0, 1], 0)), Arc::new(mirror))
        .await
        .map_err(|error| anyhow!(error))
        .context("failed to start local txt2img mirror")?;

    let mut market_config = SimulatedMarketConfig::new(server.address.clone(), app_key);
    market_config.subnet_tag = Some(args.subnet_tag.clone());
    market_config.deploy_delay = tuning.deploy_delay;
    market_config.providers = demo_providers(args.providers, &args.subnet_tag);
    let market = Arc::new(SimulatedMarketplace::new(market_config));

    let policy = Arc::new(AdmissionPolicy::with_selected_nodes(
        args.select_node.iter().cloned(),
        ConstraintSet::mid_agreement_payments(),
    ));

    info!(
        subnet_tag = %args.subnet_tag,
        payment_driver = %args.payment_driver,
        payment_network = %args.payment_network,
        budget = args.budget,
        instances = args.instances,
        "starting session"
    );

    let cluster = ClusterView::spawn(
        market,
        policy,
        ClusterConfig {
            instances: args.instances,
            service: ServiceConfig::default().with_runtime(args.runtime.clone()),
            offer_interval: args.poll_interval(),
            ..ClusterConfig::default()
        },
        cancel,
    );

    let driver = Driver::new(
        &cluster,
        ProxyClient::new(args.proxy_client_config()),
        DriverOptions {
            poll_interval: args.poll_interval(),
            output: args.output.clone(),
            steps: args.steps,
            representation: args.representation(),
            call_grace: tuning.call_grace,
        },
    );
    let outcome = driver.run(prompts, cancel).await;

    cluster.shutdown().await;
    server.close().await.map_err(|error| anyhow!(error))?;
    info!("session finished");
    outcome
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::prompt::ScriptedPrompts;

    fn fast_tuning() -> SessionTuning {
        SessionTuning {
            deploy_delay: Duration::ZERO,
            call_grace: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn prompt_produces_image_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("output.png");
        let args = Args::try_parse_from([
            "ai-requestor",
            "--output",
            output.to_str().context("utf-8 path")?,
            "--poll-interval-secs",
            "1",
            "--providers",
            "2",
        ])?;
        let mut prompts = ScriptedPrompts::new(["a lighthouse at dusk"]);

        let summary =
            run_session(&args, fast_tuning(), &mut prompts, &CancellationToken::new()).await?;

        assert_eq!(summary.prompts, 1);
        assert_eq!(summary.images_written, vec![output.clone()]);
        let png = std::fs::read(&output)?;
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
        Ok(())
    }

    #[tokio::test]
    async fn streamed_replies_write_one_file_per_instance() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("output.png");
        let args = Args::try_parse_from([
            "ai-requestor",
            "--output",
            output.to_str().context("utf-8 path")?,
            "--poll-interval-secs",
            "1",
            "--instances",
            "2",
            "--stream",
        ])?;
        let mut prompts = ScriptedPrompts::new(["two cats"]);

        let summary =
            run_session(&args, fast_tuning(), &mut prompts, &CancellationToken::new()).await?;

        assert_eq!(summary.images_written.len(), 2);
        for path in &summary.images_written {
            assert!(path.exists(), "{}", path.display());
        }
        Ok(())
    }

    #[tokio::test]
    async fn unwritable_output_is_skipped_and_prompting_continues() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("missing").join("output.png");
        let args = Args::try_parse_from([
            "ai-requestor",
            "--output",
            output.to_str().context("utf-8 path")?,
            "--poll-interval-secs",
            "1",
        ])?;
        let mut prompts = ScriptedPrompts::new(["first", "second"]);

        let summary =
            run_session(&args, fast_tuning(), &mut prompts, &CancellationToken::new()).await?;

        assert_eq!(summary.prompts, 2);
        assert!(summary.images_written.is_empty());
        assert!(!output.exists());
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_stops_session_without_running_instances() -> Result<()> {
        let args = Args::try_parse_from(["ai-requestor", "--providers", "0"])?;
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let mut prompts = ScriptedPrompts::new(["never asked"]);
        let summary = run_session(&args, fast_tuning(), &mut prompts, &cancel).await?;
        assert_eq!(summary, DriverSummary::default());
        Ok(())
    }
}
