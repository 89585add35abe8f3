//! Interactive prompt loop over a running cluster.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use compute_market::{BindingWaiter, ClusterView, InstanceState, ServiceInstance};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use txt2img_client::ProxyClient;
use txt2img_protocol::{GenerationRequest, Representation};

use crate::prompt::PromptSource;

pub const DEFAULT_CALL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub poll_interval: Duration,
    pub output: PathBuf,
    pub steps: u32,
    pub representation: Representation,
    /// How long an in-flight generation may continue after cancellation.
    pub call_grace: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSummary {
    pub prompts: usize,
    pub images_written: Vec<PathBuf>,
}

pub struct Driver<'a> {
    cluster: &'a ClusterView,
    client: ProxyClient,
    waiter: BindingWaiter,
    options: DriverOptions,
}

impl<'a> Driver<'a> {
    pub fn new(cluster: &'a ClusterView, client: ProxyClient, options: DriverOptions) -> Self {
        Self {
            cluster,
            client,
            waiter: BindingWaiter::default(),
            options,
        }
    }

    pub fn with_waiter(mut self, waiter: BindingWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Poll the cluster and, once an instance is running, turn each prompt into an image.
    /// Ends on cancellation or when the prompt source is exhausted.
    pub async fn run(
        &self,
        prompts: &mut dyn PromptSource,
        cancel: &CancellationToken,
    ) -> Result<DriverSummary> {
        let mut summary = DriverSummary::default();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let snapshots = self.cluster.list().await;
            let states: Vec<String> = snapshots
                .iter()
                .map(|snapshot| format!("{}: {}", snapshot.name, snapshot.state))
                .collect();
            info!(instances = ?states, "instances");

            if snapshots
                .iter()
                .any(|snapshot| snapshot.state == InstanceState::Running)
            {
                let prompt = tokio::select! {
                    () = cancel.cancelled() => break,
                    prompt = prompts.next_prompt() => prompt?,
                };
                let Some(prompt) = prompt else {
                    info!("no more prompts");
                    break;
                };
                let prompt = prompt.trim();
                if !prompt.is_empty() {
                    summary.prompts += 1;
                    let written = self.generate_all(prompt, cancel).await?;
                    summary.images_written.extend(written);
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
        Ok(summary)
    }

    async fn generate_all(&self, prompt: &str, cancel: &CancellationToken) -> Result<Vec<PathBuf>> {
        let instances = self.cluster.instances();
        let mut written = Vec::new();
        info!(prompt_chars = prompt.chars().count(), "sending prompt");

        for instance in instances {
            if instance.state().await.is_terminal() {
                continue;
            }
            let output = output_path(&self.options.output, instance.name(), instances.len() > 1);
            if self.generate_one(instance, prompt, &output, cancel).await? {
                written.push(output);
            }
        }
        Ok(written)
    }

    async fn generate_one(
        &self,
        instance: &ServiceInstance,
        prompt: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let binding = match self.waiter.wait(instance, cancel).await {
            Ok(binding) => binding,
            Err(error) => {
                warn!(instance = instance.name(), error = %error, "gave up on instance");
                return Ok(false);
            }
        };

        let request = GenerationRequest::new(prompt).with_steps(self.options.steps);
        let call = self
            .client
            .generate_images(&binding, &request, self.options.representation);
        let grace = async {
            cancel.cancelled().await;
            tokio::time::sleep(self.options.call_grace).await;
        };
        let images = tokio::select! {
            result = call => result,
            () = grace => {
                warn!(instance = instance.name(), "abandoned generation after cancellation");
                return Ok(false);
            }
        };

        let images = match images {
            Ok(images) => images,
            Err(error) => {
                warn!(instance = instance.name(), error = %error, "generation failed");
                return Ok(false);
            }
        };
        let Some(first) = images.first() else {
            warn!(instance = instance.name(), "response carried no images");
            return Ok(false);
        };

        if let Err(error) = tokio::fs::write(output, first).await {
            warn!(
                instance = instance.name(),
                path = %output.display(),
                error = %error,
                "failed to save image"
            );
            return Ok(false);
        }
        info!(
            instance = instance.name(),
            path = %output.display(),
            bytes = first.len(),
            "image saved"
        );
        Ok(true)
    }
}

/// `output.png` for a single instance; `output-<instance>.png` when several share one prompt.
pub fn output_path(base: &Path, instance: &str, per_instance: bool) -> PathBuf {
    if !per_instance {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let file_name = match base.extension() {
        Some(extension) => format!("{stem}-{instance}.{}", extension.to_string_lossy()),
        None => format!("{stem}-{instance}"),
    };
    base.with_file_name(file_name)
}
