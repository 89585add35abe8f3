//! In-memory marketplace for local runs and tests.
//!
//! Providers publish one offer each. Deployment waits `deploy_delay` and then hands out a
//! binding pointing at `tunnel_base_url`, which in local runs is the txt2img mirror server.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constraints::{PROP_DEBIT_NOTE_INTERVAL_SEC, PROP_PAYMENT_TIMEOUT_SEC};
use crate::instance::ServiceConfig;
use crate::market::{MarketError, Marketplace};
use crate::offer::{Agreement, Binding, Offer, PROP_NODE_NAME, PROP_SUBNET};

pub const DEFAULT_SUBNET: &str = "public";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedProvider {
    pub provider_id: String,
    pub node_name: String,
    pub subnet: String,
    pub debit_note_interval_sec: u64,
    pub payment_timeout_sec: u64,
    pub fails_deploy: bool,
}

impl SimulatedProvider {
    pub fn new(provider_id: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            node_name: node_name.into(),
            subnet: DEFAULT_SUBNET.to_string(),
            debit_note_interval_sec: 120,
            payment_timeout_sec: 1_800,
            fails_deploy: false,
        }
    }

    pub fn in_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnet = subnet.into();
        self
    }

    pub fn with_payment_terms(mut self, debit_note_interval_sec: u64, payment_timeout_sec: u64) -> Self {
        self.debit_note_interval_sec = debit_note_interval_sec;
        self.payment_timeout_sec = payment_timeout_sec;
        self
    }

    pub fn failing_deploy(mut self) -> Self {
        self.fails_deploy = true;
        self
    }

    pub fn offer(&self) -> Offer {
        Offer::new(self.provider_id.clone())
            .with_offer_id(format!("offer_{}", self.provider_id))
            .with_property(PROP_NODE_NAME, json!(self.node_name))
            .with_property(PROP_SUBNET, json!(self.subnet))
            .with_property(PROP_DEBIT_NOTE_INTERVAL_SEC, json!(self.debit_note_interval_sec))
            .with_property(PROP_PAYMENT_TIMEOUT_SEC, json!(self.payment_timeout_sec))
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedMarketConfig {
    /// Only offers from this subnet are visible. `None` shows every offer.
    pub subnet_tag: Option<String>,
    pub tunnel_base_url: String,
    pub app_key: String,
    pub deploy_delay: Duration,
    pub providers: Vec<SimulatedProvider>,
}

impl SimulatedMarketConfig {
    pub fn new(tunnel_base_url: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            subnet_tag: None,
            tunnel_base_url: tunnel_base_url.into(),
            app_key: app_key.into(),
            deploy_delay: Duration::from_millis(500),
            providers: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: SimulatedProvider) -> Self {
        self.providers.push(provider);
        self
    }
}

#[derive(Debug)]
pub struct SimulatedMarketplace {
    config: SimulatedMarketConfig,
    agreements: Mutex<HashMap<String, Agreement>>,
}

impl SimulatedMarketplace {
    pub fn new(config: SimulatedMarketConfig) -> Self {
        info!(
            providers = config.providers.len(),
            subnet = config.subnet_tag.as_deref().unwrap_or("<any>"),
            "simulated marketplace ready"
        );
        Self {
            config,
            agreements: Mutex::new(HashMap::new()),
        }
    }

    pub async fn active_agreements(&self) -> usize {
        self.agreements.lock().await.len()
    }

    fn provider(&self, provider_id: &str) -> Option<&SimulatedProvider> {
        self.config
            .providers
            .iter()
            .find(|provider| provider.provider_id == provider_id)
    }
}

#[async_trait]
impl Marketplace for SimulatedMarketplace {
    async fn collect_offers(&self) -> Result<Vec<Offer>, MarketError> {
        let offers: Vec<Offer> = self
            .config
            .providers
            .iter()
            .filter(|provider| {
                self.config
                    .subnet_tag
                    .as_deref()
                    .is_none_or(|subnet| provider.subnet == subnet)
            })
            .map(SimulatedProvider::offer)
            .collect();
        debug!(count = offers.len(), "collected offers");
        Ok(offers)
    }

    async fn negotiate(&self, offer: &Offer) -> Result<Agreement, MarketError> {
        let provider = self
            .provider(&offer.issuer)
            .ok_or_else(|| MarketError::Negotiation {
                provider_id: offer.issuer.clone(),
                message: "offer withdrawn".to_string(),
            })?;
        let agreement = Agreement {
            agreement_id: format!("agr_{}", Uuid::new_v4().simple()),
            provider_id: provider.provider_id.clone(),
            node_name: provider.node_name.clone(),
        };
        self.agreements
            .lock()
            .await
            .insert(agreement.agreement_id.clone(), agreement.clone());
        Ok(agreement)
    }

    async fn deploy(
        &self,
        agreement: &Agreement,
        service: &ServiceConfig,
    ) -> Result<Binding, MarketError> {
        if !self
            .agreements
            .lock()
            .await
            .contains_key(&agreement.agreement_id)
        {
            return Err(MarketError::AgreementNotFound(
                agreement.agreement_id.clone(),
            ));
        }
        debug!(
            agreement_id = %agreement.agreement_id,
            runtime = %service.runtime,
            model_format = %service.model_format,
            "running deploy script"
        );
        tokio::time::sleep(self.config.deploy_delay).await;

        if self
            .provider(&agreement.provider_id)
            .is_none_or(|provider| provider.fails_deploy)
        {
            return Err(MarketError::Deployment {
                agreement_id: agreement.agreement_id.clone(),
                message: format!("runtime {} failed to start", service.runtime),
            });
        }

        Ok(Binding {
            activity_id: Uuid::new_v4().simple().to_string(),
            tunnel_base_url: self.config.tunnel_base_url.clone(),
            token: self.config.app_key.clone(),
        })
    }

    async fn terminate(&self, agreement: &Agreement) -> Result<(), MarketError> {
        self.agreements
            .lock()
            .await
            .remove(&agreement.agreement_id)
            .map(|_| ())
            .ok_or_else(|| MarketError::AgreementNotFound(agreement.agreement_id.clone()))
    }
}
