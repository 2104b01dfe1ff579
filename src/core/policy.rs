//! What to do when a response carries a non-success status word.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::core::apdu::StatusWord;
use crate::core::error::CardError;

/// Decides whether a status word ends the read session.
///
/// Only the SELECT response and the fetch half of a read are checked. The
/// probe status is never inspected; whether some readers signal card removal
/// there has not been verified on hardware.
pub trait StatusPolicy: Debug + Send + Sync {
    fn check(&self, step: &str, status: StatusWord) -> Result<(), CardError>;
}

/// Logs anomalies and carries on. Several reader/driver stacks report odd
/// status words while still returning the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientStatusPolicy;

impl StatusPolicy for LenientStatusPolicy {
    fn check(&self, step: &str, status: StatusWord) -> Result<(), CardError> {
        if !status.is_success() {
            log::warn!("{step}: status {status} ({}), continuing", status.describe());
        }
        Ok(())
    }
}

/// Fails on anything other than `90 00` / `61 xx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictStatusPolicy;

impl StatusPolicy for StrictStatusPolicy {
    fn check(&self, step: &str, status: StatusWord) -> Result<(), CardError> {
        if status.is_success() {
            return Ok(());
        }
        log::error!("{step}: status {status} ({})", status.describe());
        Err(CardError::Status {
            step: step.to_string(),
            sw1: status.sw1,
            sw2: status.sw2,
        })
    }
}

/// Policy selection as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPolicyKind {
    #[default]
    Lenient,
    Strict,
}

impl StatusPolicyKind {
    pub fn build(self) -> Box<dyn StatusPolicy> {
        match self {
            StatusPolicyKind::Lenient => Box::new(LenientStatusPolicy),
            StatusPolicyKind::Strict => Box::new(StrictStatusPolicy),
        }
    }
}

impl std::str::FromStr for StatusPolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lenient" => Ok(StatusPolicyKind::Lenient),
            "strict" => Ok(StatusPolicyKind::Strict),
            _ => Err(format!("Invalid status policy: {s}")),
        }
    }
}
