use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admission::AdmissionPolicy;
use crate::instance::{InstanceSnapshot, InstanceState, ServiceConfig, ServiceInstance};
use crate::market::Marketplace;
use crate::offer::Agreement;

pub const DEFAULT_OFFER_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_NEGOTIATION_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub instances: usize,
    pub service: ServiceConfig,
    /// Pause between offer collection rounds while an instance has no agreement.
    pub offer_interval: Duration,
    /// How long a negotiation already in flight may finish after cancellation or expiration.
    pub negotiation_grace: Duration,
    pub name_prefix: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            instances: 1,
            service: ServiceConfig::default(),
            offer_interval: DEFAULT_OFFER_INTERVAL,
            negotiation_grace: DEFAULT_NEGOTIATION_GRACE,
            name_prefix: "ai-runtime".to_string(),
        }
    }
}

/// Set of service instances hired for one session, each driven by its own lifecycle task.
pub struct ClusterView {
    instances: Vec<Arc<ServiceInstance>>,
    market: Arc<dyn Marketplace>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterView {
    /// Create `config.instances` instances and start hiring for each. Lifecycle tasks stop
    /// when `cancel` (or [`shutdown`](Self::shutdown)) fires.
    pub fn spawn(
        market: Arc<dyn Marketplace>,
        policy: Arc<AdmissionPolicy>,
        config: ClusterConfig,
        cancel: &CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let instances: Vec<Arc<ServiceInstance>> = (0..config.instances)
            .map(|index| {
                Arc::new(ServiceInstance::new(
                    format!("{}-{index}", config.name_prefix),
                    config.service.clone(),
                    Arc::clone(&policy),
                ))
            })
            .collect();

        let tasks = instances
            .iter()
            .map(|instance| {
                let driver = InstanceDriver {
                    instance: Arc::clone(instance),
                    market: Arc::clone(&market),
                    policy: Arc::clone(&policy),
                    offer_interval: config.offer_interval,
                    negotiation_grace: config.negotiation_grace,
                    cancel: cancel.clone(),
                };
                tokio::spawn(driver.run())
            })
            .collect();

        info!(
            instances = config.instances,
            runtime = %config.service.runtime,
            expiration = %config.service.expiration,
            "cluster started"
        );

        Self {
            instances,
            market,
            cancel,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn instances(&self) -> &[Arc<ServiceInstance>] {
        &self.instances
    }

    pub async fn list(&self) -> Vec<InstanceSnapshot> {
        let mut snapshots = Vec::with_capacity(self.instances.len());
        for instance in &self.instances {
            snapshots.push(instance.snapshot().await);
        }
        snapshots
    }

    pub async fn running(&self) -> Vec<Arc<ServiceInstance>> {
        let mut running = Vec::new();
        for instance in &self.instances {
            if instance.state().await == InstanceState::Running {
                running.push(Arc::clone(instance));
            }
        }
        running
    }

    /// Stop every lifecycle task and drive all instances to `Terminated`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(error) = task.await {
                warn!(error = %error, "instance task ended abnormally");
            }
        }
        for instance in &self.instances {
            if instance.state().await != InstanceState::Terminated {
                release_instance(instance, self.market.as_ref()).await;
            }
        }
        info!("cluster shut down");
    }
}

struct InstanceDriver {
    instance: Arc<ServiceInstance>,
    market: Arc<dyn Marketplace>,
    policy: Arc<AdmissionPolicy>,
    offer_interval: Duration,
    negotiation_grace: Duration,
    cancel: CancellationToken,
}

impl InstanceDriver {
    async fn run(self) {
        if let Err(error) = self.instance.begin_negotiation().await {
            warn!(error = %error, "instance could not start negotiating");
            return;
        }

        // Fires on cancellation or expiration. A negotiation already in flight gets
        // `negotiation_grace` to finish so its agreement can be terminated.
        let stop = self.cancel.child_token();
        let watch_expiry = async {
            tokio::select! {
                () = stop.cancelled() => {}
                () = tokio::time::sleep(until(self.instance.config().expiration)) => {
                    info!(instance = self.instance.name(), "expiration reached");
                    stop.cancel();
                }
            }
        };
        let lifecycle = async {
            self.hire_and_start(&stop).await;
            stop.cancelled().await;
        };
        tokio::join!(watch_expiry, lifecycle);

        if self.instance.state().await != InstanceState::Terminated {
            release_instance(&self.instance, self.market.as_ref()).await;
        }
    }

    async fn hire_and_start(&self, stop: &CancellationToken) {
        let Some(agreement) = self.negotiate_agreement(stop).await else {
            return;
        };
        if stop.is_cancelled() {
            self.policy.release(&agreement.provider_id).await;
            terminate_agreement(self.market.as_ref(), &agreement).await;
            return;
        }
        if let Err(error) = self.instance.begin_deployment(agreement.clone()).await {
            warn!(error = %error, "agreement reached in unexpected state");
            self.policy.release(&agreement.provider_id).await;
            terminate_agreement(self.market.as_ref(), &agreement).await;
            return;
        }

        // The agreement is recorded on the instance, so dropping the deploy call here leaves
        // it for `release_instance`.
        let deployed = tokio::select! {
            () = stop.cancelled() => return,
            deployed = self.market.deploy(&agreement, self.instance.config()) => deployed,
        };
        match deployed {
            Ok(binding) => {
                if let Err(error) = self.instance.start(binding).await {
                    warn!(error = %error, "instance could not enter running");
                }
            }
            Err(error) => {
                if let Err(error) = self.instance.fail(error.to_string()).await {
                    warn!(error = %error, "instance could not enter failed");
                }
                terminate_agreement(self.market.as_ref(), &agreement).await;
            }
        }
    }

    /// Collect offers until one turns into an agreement. Returns `None` once `stop` fires.
    /// The returned agreement's provider is still reserved.
    async fn negotiate_agreement(&self, stop: &CancellationToken) -> Option<Agreement> {
        loop {
            let collected = tokio::select! {
                () = stop.cancelled() => return None,
                collected = self.market.collect_offers() => collected,
            };
            match collected {
                Ok(offers) => {
                    for offer in offers {
                        if stop.is_cancelled() {
                            return None;
                        }
                        if !self.policy.score(&offer).await.is_trusted() {
                            continue;
                        }
                        if !self.policy.reserve(&offer.issuer).await {
                            continue;
                        }
                        let grace = async {
                            stop.cancelled().await;
                            tokio::time::sleep(self.negotiation_grace).await;
                        };
                        let negotiated = tokio::select! {
                            negotiated = self.market.negotiate(&offer) => negotiated,
                            () = grace => {
                                warn!(
                                    instance = self.instance.name(),
                                    issuer = %offer.issuer,
                                    "abandoned negotiation after stop"
                                );
                                self.policy.release(&offer.issuer).await;
                                return None;
                            }
                        };
                        match negotiated {
                            Ok(agreement) => return Some(agreement),
                            Err(error) => {
                                warn!(
                                    instance = self.instance.name(),
                                    issuer = %offer.issuer,
                                    error = %error,
                                    "negotiation failed"
                                );
                                self.policy.release(&offer.issuer).await;
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(instance = self.instance.name(), error = %error, "offer collection failed");
                }
            }
            tokio::select! {
                () = stop.cancelled() => return None,
                () = tokio::time::sleep(self.offer_interval) => {}
            }
        }
    }
}

async fn release_instance(instance: &ServiceInstance, market: &dyn Marketplace) {
    match instance.terminate().await {
        Ok(Some(agreement)) => terminate_agreement(market, &agreement).await,
        Ok(None) => {}
        Err(error) => warn!(error = %error, "instance already finished"),
    }
}

async fn terminate_agreement(market: &dyn Marketplace, agreement: &Agreement) {
    if let Err(error) = market.terminate(agreement).await {
        warn!(
            agreement_id = %agreement.agreement_id,
            error = %error,
            "failed to terminate agreement"
        );
    }
}

fn until(deadline: DateTime<Utc>) -> Duration {
    (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
