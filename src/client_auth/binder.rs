//! Correlating the presented `client_id` with its registration.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::error::{AuthenticationError, FailureReason, LookupStage};
use super::method::ClientAuthenticationMethod;
use super::registry::{ClientRegistry, RegisteredClient};

/// How the presented identity relates to the registry.
#[derive(Debug, Clone)]
enum Binding {
    Registered(Arc<RegisteredClient>),
    Unknown,
    MethodMismatch(ClientAuthenticationMethod),
}

/// A `client_id` bound to its registration and the method implied by the
/// presented chain.
///
/// Unknown clients and method mismatches still produce a `BoundClient`: the
/// validator runs against decoy material before failing, so the work done
/// does not reveal which case applied.
#[derive(Debug, Clone)]
pub struct BoundClient {
    client_id: String,
    method: ClientAuthenticationMethod,
    binding: Binding,
}

impl BoundClient {
    /// The presented `client_id`.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Method selected from the chain length.
    #[must_use]
    pub fn method(&self) -> ClientAuthenticationMethod {
        self.method
    }

    /// The registration, when it exists and agrees with the method.
    #[must_use]
    pub fn registration(&self) -> Option<&Arc<RegisteredClient>> {
        match self.binding {
            Binding::Registered(ref client) => Some(client),
            Binding::Unknown | Binding::MethodMismatch(_) => None,
        }
    }

    /// Why the binding cannot succeed, if it cannot.
    #[must_use]
    pub fn rejection(&self) -> Option<FailureReason> {
        match self.binding {
            Binding::Registered(_) => None,
            Binding::Unknown => Some(FailureReason::UnknownClient),
            Binding::MethodMismatch(registered) => Some(FailureReason::MethodMismatch {
                registered,
                presented: self.method,
            }),
        }
    }
}

/// Look up `client_id` and bind it to the selected method.
///
/// # Errors
///
/// `InvalidClient(Timeout)` when the lookup exceeds `timeout`;
/// `ServerError` when the registry fails.
pub async fn bind(
    registry: &dyn ClientRegistry,
    client_id: &str,
    method: ClientAuthenticationMethod,
    timeout: Duration,
) -> Result<BoundClient, AuthenticationError> {
    let lookup = tokio::time::timeout(timeout, registry.find_by_client_id(client_id))
        .await
        .map_err(|_| FailureReason::Timeout(LookupStage::Registry))?
        .map_err(|e| AuthenticationError::ServerError(e.to_string()))?;

    let binding = match lookup {
        Some(client) if client.method() == method => Binding::Registered(client),
        Some(client) => {
            debug!(
                client_id,
                registered = %client.method(),
                presented = %method,
                "Method mismatch"
            );
            Binding::MethodMismatch(client.method())
        }
        None => Binding::Unknown,
    };

    Ok(BoundClient {
        client_id: client_id.to_string(),
        method,
        binding,
    })
}
