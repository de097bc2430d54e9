//! Revocation policy and the online revocation extension point.
//!
//! Two mechanisms share one [`RevocationPolicy`]:
//!
//! - **CRLs** loaded from disk are enforced by the chain verifier in
//!   [`super::trust_store`]. Under `fail_open` a chain with no covering CRL
//!   is accepted; under `fail_closed` it is not.
//! - An optional [`RevocationChecker`] (OCSP responder, revocation service)
//!   is consulted after the chain verifies. Its call is bounded by the
//!   revocation timeout and is cancelled with the request.
//!
//! A certificate reported as revoked is rejected under either policy.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::chain::CertificateChain;
use super::error::{FailureReason, LookupStage};

/// What to do when revocation status cannot be established.
///
/// No `Default`: enabling revocation checking requires
/// choosing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationPolicy {
    /// Unknown status, checker errors and timeouts reject the client.
    FailClosed,
    /// Unknown status, checker errors and timeouts are logged and ignored.
    FailOpen,
}

/// Answer from a revocation checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Not revoked.
    Good,
    /// Revoked.
    Revoked,
    /// The checker has no authoritative answer.
    Unknown,
}

/// Revocation checker failure.
#[derive(Debug, Error)]
pub enum RevocationError {
    /// Responder unreachable or answered with garbage.
    #[error("revocation responder unavailable: {0}")]
    Unavailable(String),
}

/// Online revocation checking for a verified chain.
#[async_trait::async_trait]
pub trait RevocationChecker: Send + Sync + 'static {
    /// Status of the chain's leaf certificate.
    async fn check(&self, chain: &CertificateChain) -> Result<RevocationStatus, RevocationError>;
}

/// A configured checker together with its policy and time budget.
#[derive(Clone)]
pub struct OnlineRevocation {
    checker: Arc<dyn RevocationChecker>,
    policy: RevocationPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for OnlineRevocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnlineRevocation")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OnlineRevocation {
    /// Wrap a checker with an explicit policy and timeout.
    #[must_use]
    pub fn new(
        checker: Arc<dyn RevocationChecker>,
        policy: RevocationPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            checker,
            policy,
            timeout,
        }
    }

    /// The configured policy.
    #[must_use]
    pub fn policy(&self) -> RevocationPolicy {
        self.policy
    }

    /// Run the checker and apply the policy.
    ///
    /// # Errors
    ///
    /// `Revoked` for a revoked certificate; under `fail_closed`, a
    /// `RevocationUnavailable` or `Timeout` reason when status is unknown.
    pub async fn enforce(&self, chain: &CertificateChain) -> Result<(), FailureReason> {
        let outcome = tokio::time::timeout(self.timeout, self.checker.check(chain)).await;

        let unavailable = match outcome {
            Ok(Ok(RevocationStatus::Good)) => return Ok(()),
            Ok(Ok(RevocationStatus::Revoked)) => return Err(FailureReason::Revoked),
            Ok(Ok(RevocationStatus::Unknown)) => {
                FailureReason::RevocationUnavailable("status unknown".to_string())
            }
            Ok(Err(e)) => FailureReason::RevocationUnavailable(e.to_string()),
            Err(_) => FailureReason::Timeout(LookupStage::Revocation),
        };

        match self.policy {
            RevocationPolicy::FailClosed => Err(unavailable),
            RevocationPolicy::FailOpen => {
                warn!(reason = %unavailable, "Revocation status unavailable, accepting (fail_open)");
                Ok(())
            }
        }
    }
}
