//! Requestor-side compute marketplace model.
//!
//! Offers are scored by an [`AdmissionPolicy`] that hires each provider at most once per
//! session. Every hired [`ServiceInstance`] walks a forward-only lifecycle driven by a
//! [`ClusterView`] task, and a [`BindingWaiter`] bounds how long callers wait for a running
//! instance's proxy binding. The [`Marketplace`] trait is the seam to a real market; the
//! [`SimulatedMarketplace`] serves local runs and tests.

pub mod admission;
pub mod cluster;
pub mod constraints;
pub mod instance;
pub mod market;
pub mod offer;
pub mod simulated;
pub mod waiter;

pub use admission::{AdmissionPolicy, RejectReason, Score};
pub use cluster::{ClusterConfig, ClusterView, DEFAULT_NEGOTIATION_GRACE, DEFAULT_OFFER_INTERVAL};
pub use constraints::{
    ConstraintError, ConstraintRange, ConstraintSet, ConstraintViolation,
    MIN_DEBIT_NOTE_INTERVAL_SEC, MIN_PAYMENT_TIMEOUT_SEC, PROP_DEBIT_NOTE_INTERVAL_SEC,
    PROP_PAYMENT_TIMEOUT_SEC,
};
pub use instance::{
    InstanceSnapshot, InstanceState, LifecycleError, ServiceConfig, ServiceInstance,
};
pub use market::{MarketError, Marketplace};
pub use offer::{Agreement, Binding, Offer};
pub use simulated::{SimulatedMarketConfig, SimulatedMarketplace, SimulatedProvider};
pub use waiter::{
    BindingWaiter, DEFAULT_BINDING_ATTEMPTS, DEFAULT_BINDING_INTERVAL, Sleeper, TokioSleeper,
    WaitError,
};
