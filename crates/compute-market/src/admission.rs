//! Offer scoring that hires each provider at most once per session.
//!
//! Scoring reads history and never writes it. History grows only through [`AdmissionPolicy::remember`],
//! which the instance lifecycle calls once, when the instance's runtime starts. Between an
//! accepted offer and that start the provider holds a pending reservation so two instances
//! negotiating concurrently cannot both hire it; the reservation is released if the instance
//! never starts.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::constraints::ConstraintSet;
use crate::offer::Offer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Trusted,
    Rejected,
}

impl Score {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Score::Trusted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NotAllowListed,
    AlreadyEngaged,
    Reserved,
    Constraint { property: String, proposed: Value },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotAllowListed => f.write_str("issuer is not on the selected node list"),
            RejectReason::AlreadyEngaged => f.write_str("provider was already hired this session"),
            RejectReason::Reserved => f.write_str("provider is reserved by another instance"),
            RejectReason::Constraint { property, proposed } => {
                write!(f, "{property} proposed {proposed} outside acceptable range")
            }
        }
    }
}

#[derive(Debug, Default)]
struct History {
    engaged: HashSet<String>,
    pending: HashSet<String>,
}

#[derive(Debug)]
pub struct AdmissionPolicy {
    allow_list: Option<HashSet<String>>,
    constraints: ConstraintSet,
    history: RwLock<History>,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new(None, ConstraintSet::mid_agreement_payments())
    }
}

impl AdmissionPolicy {
    pub fn new(allow_list: Option<HashSet<String>>, constraints: ConstraintSet) -> Self {
        if let Some(nodes) = allow_list.as_ref() {
            info!(nodes = ?nodes, "accepting offers only from selected nodes");
        }
        Self {
            allow_list,
            constraints,
            history: RwLock::new(History::default()),
        }
    }

    /// Policy restricted to `nodes`. An empty iterator means no allow-list.
    pub fn with_selected_nodes<I, S>(nodes: I, constraints: ConstraintSet) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let nodes: HashSet<String> = nodes.into_iter().map(Into::into).collect();
        Self::new((!nodes.is_empty()).then_some(nodes), constraints)
    }

    pub fn allow_list(&self) -> Option<&HashSet<String>> {
        self.allow_list.as_ref()
    }

    pub async fn score(&self, offer: &Offer) -> Score {
        match self.assess(offer).await {
            Ok(()) => Score::Trusted,
            Err(reason) => {
                info!(
                    issuer = %offer.issuer,
                    node_name = offer.node_name(),
                    reason = %reason,
                    "rejecting offer"
                );
                Score::Rejected
            }
        }
    }

    /// Same decision as [`score`](Self::score) with the rejection reason and no logging.
    pub async fn assess(&self, offer: &Offer) -> Result<(), RejectReason> {
        self.constraints
            .check_offer(offer)
            .map_err(|violation| RejectReason::Constraint {
                property: violation.property,
                proposed: violation.proposed,
            })?;

        if let Some(allowed) = self.allow_list.as_ref() {
            return if allowed.contains(&offer.issuer) {
                Ok(())
            } else {
                Err(RejectReason::NotAllowListed)
            };
        }

        let history = self.history.read().await;
        if history.engaged.contains(&offer.issuer) {
            return Err(RejectReason::AlreadyEngaged);
        }
        if history.pending.contains(&offer.issuer) {
            return Err(RejectReason::Reserved);
        }
        Ok(())
    }

    /// Reserve `provider_id` for an agreement about to be negotiated. Returns `false` when
    /// another instance holds it or it was already hired. Always succeeds under an allow-list.
    pub async fn reserve(&self, provider_id: &str) -> bool {
        if self.allow_list.is_some() {
            return true;
        }
        let mut history = self.history.write().await;
        if history.engaged.contains(provider_id) {
            return false;
        }
        history.pending.insert(provider_id.to_string())
    }

    /// Drop a reservation whose agreement did not reach start.
    pub async fn release(&self, provider_id: &str) {
        let mut history = self.history.write().await;
        if history.pending.remove(provider_id) {
            debug!(provider_id, "released provider reservation");
        }
    }

    /// Record that `provider_id` runs one of our instances. Idempotent; never undone.
    pub async fn remember(&self, provider_id: &str) {
        let mut history = self.history.write().await;
        history.pending.remove(provider_id);
        if history.engaged.insert(provider_id.to_string()) {
            info!(provider_id, "remembered engaged provider");
        }
    }

    pub async fn is_engaged(&self, provider_id: &str) -> bool {
        self.history.read().await.engaged.contains(provider_id)
    }

    pub async fn engaged_count(&self) -> usize {
        self.history.read().await.engaged.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::constraints::{PROP_DEBIT_NOTE_INTERVAL_SEC, PROP_PAYMENT_TIMEOUT_SEC};

    fn offer(issuer: &str) -> Offer {
        Offer::new(issuer)
    }

    #[tokio::test]
    async fn remembered_provider_is_rejected_and_others_stay_trusted() {
        let policy = AdmissionPolicy::default();
        assert_eq!(policy.score(&offer("P1")).await, Score::Trusted);

        policy.remember("P1").await;

        assert_eq!(policy.score(&offer("P1")).await, Score::Rejected);
        assert_eq!(policy.score(&offer("P2")).await, Score::Trusted);
    }

    #[tokio::test]
    async fn scoring_does_not_mutate_history() {
        let policy = AdmissionPolicy::default();
        for _ in 0..3 {
            assert_eq!(policy.score(&offer("P1")).await, Score::Trusted);
        }
        assert_eq!(policy.engaged_count().await, 0);
    }

    #[tokio::test]
    async fn remember_is_idempotent() {
        let policy = AdmissionPolicy::default();
        policy.remember("P1").await;
        policy.remember("P1").await;
        assert_eq!(policy.engaged_count().await, 1);
        assert!(policy.is_engaged("P1").await);
    }

    #[tokio::test]
    async fn allow_list_rejects_everyone_else_regardless_of_history() {
        let policy = AdmissionPolicy::with_selected_nodes(["P1"], ConstraintSet::new());
        assert_eq!(policy.score(&offer("P2")).await, Score::Rejected);
        assert_eq!(
            policy.assess(&offer("P2")).await,
            Err(RejectReason::NotAllowListed)
        );
        assert_eq!(policy.score(&offer("P1")).await, Score::Trusted);

        policy.remember("P2").await;
        assert_eq!(policy.score(&offer("P2")).await, Score::Rejected);
    }

    #[tokio::test]
    async fn empty_selection_means_no_allow_list() {
        let policy =
            AdmissionPolicy::with_selected_nodes(Vec::<String>::new(), ConstraintSet::new());
        assert!(policy.allow_list().is_none());
        assert_eq!(policy.score(&offer("anyone")).await, Score::Trusted);
    }

    #[tokio::test]
    async fn constraint_failure_overrides_identity() {
        let policy = AdmissionPolicy::with_selected_nodes(
            ["P1"],
            ConstraintSet::mid_agreement_payments(),
        );
        let stingy = offer("P1").with_property(PROP_PAYMENT_TIMEOUT_SEC, json!(60));
        assert_eq!(policy.score(&stingy).await, Score::Rejected);
        assert!(matches!(
            policy.assess(&stingy).await,
            Err(RejectReason::Constraint { .. })
        ));

        let fair = offer("P1")
            .with_property(PROP_PAYMENT_TIMEOUT_SEC, json!(180))
            .with_property(PROP_DEBIT_NOTE_INTERVAL_SEC, json!(60));
        assert_eq!(policy.score(&fair).await, Score::Trusted);
    }

    #[tokio::test]
    async fn reservation_blocks_concurrent_hire_until_released() {
        let policy = AdmissionPolicy::default();
        assert!(policy.reserve("P1").await);
        assert!(!policy.reserve("P1").await);
        assert_eq!(
            policy.assess(&offer("P1")).await,
            Err(RejectReason::Reserved)
        );

        policy.release("P1").await;
        assert_eq!(policy.score(&offer("P1")).await, Score::Trusted);
        assert!(!policy.is_engaged("P1").await);
    }

    #[tokio::test]
    async fn remember_converts_reservation_into_engagement() {
        let policy = AdmissionPolicy::default();
        assert!(policy.reserve("P1").await);
        policy.remember("P1").await;
        assert_eq!(
            policy.assess(&offer("P1")).await,
            Err(RejectReason::AlreadyEngaged)
        );
        assert!(!policy.reserve("P1").await);
        policy.release("P1").await;
        assert!(policy.is_engaged("P1").await);
    }
}
