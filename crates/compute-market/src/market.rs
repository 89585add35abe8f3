use async_trait::async_trait;
use thiserror::Error;

use crate::instance::ServiceConfig;
use crate::offer::{Agreement, Binding, Offer};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("market_unavailable: {0}")]
    Unavailable(String),
    #[error("negotiation_failed: provider {provider_id}: {message}")]
    Negotiation {
        provider_id: String,
        message: String,
    },
    #[error("deployment_failed: agreement {agreement_id}: {message}")]
    Deployment {
        agreement_id: String,
        message: String,
    },
    #[error("agreement_not_found: {0}")]
    AgreementNotFound(String),
}

/// Marketplace collaborator: offer discovery, agreement negotiation, activity deployment and
/// release. Payment settlement stays behind this boundary.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Offers currently visible to this requestor.
    async fn collect_offers(&self) -> Result<Vec<Offer>, MarketError>;

    /// Turn an accepted offer into an agreement.
    async fn negotiate(&self, offer: &Offer) -> Result<Agreement, MarketError>;

    /// Create an activity under `agreement` and run its deploy + start script.
    async fn deploy(
        &self,
        agreement: &Agreement,
        service: &ServiceConfig,
    ) -> Result<Binding, MarketError>;

    /// Terminate the agreement and any activity running under it.
    async fn terminate(&self, agreement: &Agreement) -> Result<(), MarketError>;
}
