use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::offer::Offer;

/// Interval between debit notes during a long-running agreement.
pub const PROP_DEBIT_NOTE_INTERVAL_SEC: &str = "golem.com.scheme.payu.debit-note.interval-sec?";
/// Deadline for paying an accepted debit note.
pub const PROP_PAYMENT_TIMEOUT_SEC: &str = "golem.com.scheme.payu.payment-timeout-sec?";

pub const MIN_DEBIT_NOTE_INTERVAL_SEC: u64 = 60;
pub const MIN_PAYMENT_TIMEOUT_SEC: u64 = 180;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("constraint range for {property} is inverted: min {min} > max {max}")]
    InvertedRange { property: String, min: u64, max: u64 },
}

/// Acceptable range for one negotiable property. `max = None` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintRange {
    property: String,
    min: u64,
    max: Option<u64>,
}

impl ConstraintRange {
    pub fn new(
        property: impl Into<String>,
        min: u64,
        max: Option<u64>,
    ) -> Result<Self, ConstraintError> {
        let property = property.into();
        if let Some(max) = max.filter(|max| min > *max) {
            return Err(ConstraintError::InvertedRange { property, min, max });
        }
        Ok(Self { property, min, max })
    }

    pub fn at_least(property: impl Into<String>, min: u64) -> Self {
        Self {
            property: property.into(),
            min,
            max: None,
        }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn contains(&self, value: u64) -> bool {
        self.min <= value && self.max.is_none_or(|max| value <= max)
    }

    fn contains_fractional(&self, value: f64) -> bool {
        value.is_finite()
            && self.min as f64 <= value
            && self.max.is_none_or(|max| value <= max as f64)
    }
}

/// A property value an offer proposed that falls outside its registered range.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintViolation {
    pub property: String,
    pub proposed: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    ranges: BTreeMap<String, ConstraintRange>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ranges that keep mid-agreement payments affordable for long-running services.
    pub fn mid_agreement_payments() -> Self {
        Self::new()
            .with(ConstraintRange::at_least(
                PROP_DEBIT_NOTE_INTERVAL_SEC,
                MIN_DEBIT_NOTE_INTERVAL_SEC,
            ))
            .with(ConstraintRange::at_least(
                PROP_PAYMENT_TIMEOUT_SEC,
                MIN_PAYMENT_TIMEOUT_SEC,
            ))
    }

    pub fn with(mut self, range: ConstraintRange) -> Self {
        self.insert(range);
        self
    }

    /// Registers `range`, replacing any earlier range for the same property.
    pub fn insert(&mut self, range: ConstraintRange) {
        self.ranges.insert(range.property.clone(), range);
    }

    pub fn check(&self, property: &str, proposed: u64) -> bool {
        self.ranges
            .get(property)
            .is_none_or(|range| range.contains(proposed))
    }

    /// Applies every registered range to the offer. Properties the offer does not propose
    /// pass; proposed values that are not numbers fail.
    pub fn check_offer(&self, offer: &Offer) -> Result<(), ConstraintViolation> {
        for range in self.ranges.values() {
            let Some(proposed) = offer.property(range.property()) else {
                continue;
            };
            if !value_in_range(range, proposed) {
                return Err(ConstraintViolation {
                    property: range.property.clone(),
                    proposed: proposed.clone(),
                });
            }
        }
        Ok(())
    }
}

fn value_in_range(range: &ConstraintRange, proposed: &Value) -> bool {
    if let Some(value) = proposed.as_u64() {
        return range.contains(value);
    }
    if let Some(value) = proposed.as_f64() {
        return range.contains_fractional(value);
    }
    proposed
        .as_str()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .is_some_and(|value| range.contains_fractional(value))
}
