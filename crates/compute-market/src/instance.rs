use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::admission::AdmissionPolicy;
use crate::offer::{Agreement, Binding};

pub const DEFAULT_RUNTIME: &str = "dummy";
pub const DEFAULT_MODEL_FORMAT: &str = "safetensors";
pub const DEFAULT_MODEL_URL: &str = "hash:sha3:b2da48d618beddab1887739d75b50a3041c810bc73805a416761185998359b24:https://huggingface.co/runwayml/stable-diffusion-v1-5/resolve/main/v1-5-pruned-emaonly.safetensors?download=true";
pub const DEFAULT_EXPIRATION_DAYS: i64 = 10;

/// Lifecycle of one hired service. Transitions only move forward; every state but
/// `Terminated` itself can be terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Initializing,
    Negotiating,
    Deploying,
    Running,
    Terminated,
    Failed,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Initializing => "initializing",
            InstanceState::Negotiating => "negotiating",
            InstanceState::Deploying => "deploying",
            InstanceState::Running => "running",
            InstanceState::Terminated => "terminated",
            InstanceState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Terminated | InstanceState::Failed)
    }

    pub fn can_transition_to(&self, next: InstanceState) -> bool {
        use InstanceState::{Deploying, Failed, Initializing, Negotiating, Running, Terminated};
        match (self, next) {
            (Initializing, Negotiating)
            | (Negotiating, Deploying)
            | (Negotiating | Deploying, Failed)
            | (Deploying, Running) => true,
            (from, Terminated) => *from != Terminated,
            _ => false,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("instance {instance}: invalid transition {from} -> {to}")]
    InvalidTransition {
        instance: String,
        from: InstanceState,
        to: InstanceState,
    },
}

/// Runtime configuration handed to every instance at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub runtime: String,
    pub model_url: String,
    pub model_format: String,
    pub expiration: DateTime<Utc>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            runtime: DEFAULT_RUNTIME.to_string(),
            model_url: DEFAULT_MODEL_URL.to_string(),
            model_format: DEFAULT_MODEL_FORMAT.to_string(),
            expiration: Utc::now() + ChronoDuration::days(DEFAULT_EXPIRATION_DAYS),
        }
    }
}

impl ServiceConfig {
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = expiration;
        self
    }
}

/// Point-in-time view of an instance for polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSnapshot {
    pub name: String,
    pub state: InstanceState,
    pub provider_id: Option<String>,
    pub bound: bool,
}

#[derive(Debug)]
struct InstanceInner {
    state: InstanceState,
    agreement: Option<Agreement>,
    binding: Option<Binding>,
    failure: Option<String>,
}

pub struct ServiceInstance {
    name: String,
    config: ServiceConfig,
    policy: Arc<AdmissionPolicy>,
    inner: RwLock<InstanceInner>,
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("name", &self.name)
            .field("runtime", &self.config.runtime)
            .finish_non_exhaustive()
    }
}

impl ServiceInstance {
    pub fn new(
        name: impl Into<String>,
        config: ServiceConfig,
        policy: Arc<AdmissionPolicy>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            policy,
            inner: RwLock::new(InstanceInner {
                state: InstanceState::Initializing,
                agreement: None,
                binding: None,
                failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn state(&self) -> InstanceState {
        self.inner.read().await.state
    }

    /// Present only while the instance is running.
    pub async fn binding(&self) -> Option<Binding> {
        self.inner.read().await.binding.clone()
    }

    pub async fn agreement(&self) -> Option<Agreement> {
        self.inner.read().await.agreement.clone()
    }

    pub async fn failure(&self) -> Option<String> {
        self.inner.read().await.failure.clone()
    }

    pub async fn snapshot(&self) -> InstanceSnapshot {
        let inner = self.inner.read().await;
        InstanceSnapshot {
            name: self.name.clone(),
            state: inner.state,
            provider_id: inner
                .agreement
                .as_ref()
                .map(|agreement| agreement.provider_id.clone()),
            bound: inner.binding.is_some(),
        }
    }

    pub async fn begin_negotiation(&self) -> Result<(), LifecycleError> {
        let mut inner = self.inner.write().await;
        self.advance(&mut inner, InstanceState::Negotiating)
    }

    /// An agreement exists and the deploy/start script has been dispatched.
    pub async fn begin_deployment(&self, agreement: Agreement) -> Result<(), LifecycleError> {
        let mut inner = self.inner.write().await;
        self.advance(&mut inner, InstanceState::Deploying)?;
        info!(
            instance = %self.name,
            provider_id = %agreement.provider_id,
            agreement_id = %agreement.agreement_id,
            "deploying"
        );
        inner.agreement = Some(agreement);
        Ok(())
    }

    /// The runtime started: attach the activity and mark the provider as engaged.
    pub async fn start(&self, binding: Binding) -> Result<(), LifecycleError> {
        let provider_id = {
            let mut inner = self.inner.write().await;
            self.advance(&mut inner, InstanceState::Running)?;
            inner.binding = Some(binding);
            inner
                .agreement
                .as_ref()
                .map(|agreement| agreement.provider_id.clone())
        };
        match provider_id {
            Some(provider_id) => self.policy.remember(&provider_id).await,
            None => warn!(instance = %self.name, "running without an agreement"),
        }
        info!(instance = %self.name, "running");
        Ok(())
    }

    pub async fn fail(&self, reason: impl Into<String>) -> Result<(), LifecycleError> {
        let reason = reason.into();
        let provider_id = {
            let mut inner = self.inner.write().await;
            self.advance(&mut inner, InstanceState::Failed)?;
            inner.failure = Some(reason.clone());
            inner
                .agreement
                .as_ref()
                .map(|agreement| agreement.provider_id.clone())
        };
        if let Some(provider_id) = provider_id {
            self.policy.release(&provider_id).await;
        }
        warn!(instance = %self.name, reason = %reason, "instance failed");
        Ok(())
    }

    /// Move to `Terminated`. Returns the agreement still to be terminated at the market, if
    /// any. A failed instance has already given its agreement and reservation back.
    pub async fn terminate(&self) -> Result<Option<Agreement>, LifecycleError> {
        let (previous, agreement) = {
            let mut inner = self.inner.write().await;
            let previous = inner.state;
            self.advance(&mut inner, InstanceState::Terminated)?;
            inner.binding = None;
            (previous, inner.agreement.clone())
        };
        info!(instance = %self.name, from = %previous, "terminated");
        match previous {
            InstanceState::Failed => return Ok(None),
            InstanceState::Running => {}
            _ => {
                if let Some(agreement) = agreement.as_ref() {
                    self.policy.release(&agreement.provider_id).await;
                }
            }
        }
        Ok(agreement)
    }

    fn advance(
        &self,
        inner: &mut InstanceInner,
        next: InstanceState,
    ) -> Result<(), LifecycleError> {
        if !inner.state.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                instance: self.name.clone(),
                from: inner.state,
                to: next,
            });
        }
        inner.state = next;
        Ok(())
    }
}
