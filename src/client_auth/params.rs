//! Request parameters handed to the engine by the HTTP layer.
//!
//! OAuth2 parameters are multi-valued on the wire, and several checks depend
//! on the number of occurrences (a repeated `client_id` is malformed), so the
//! values are kept as lists instead of being collapsed.

use std::collections::BTreeMap;

use serde::Serialize;

use super::error::RequestFault;

/// `client_id` parameter name.
pub const CLIENT_ID: &str = "client_id";
/// `grant_type` parameter name.
pub const GRANT_TYPE: &str = "grant_type";
/// `code` parameter name.
pub const CODE: &str = "code";

const AUTHORIZATION_CODE: &str = "authorization_code";

/// Multi-valued request parameters, in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParameters {
    entries: BTreeMap<String, Vec<String>>,
}

impl RequestParameters {
    /// Create an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from name/value pairs, keeping repeated names.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (name, value) in pairs {
            params.append(name, value);
        }
        params
    }

    /// Parse an `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn from_form_urlencoded(body: &[u8]) -> Self {
        Self::from_pairs(url::form_urlencoded::parse(body).into_owned())
    }

    /// Add one value for `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(name.into()).or_default().push(value.into());
    }

    /// First value of `name`, if any.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of `name`, in arrival order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries.get(name).map_or(&[], Vec::as_slice)
    }

    /// Iterate over `(name, values)` in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// The single `client_id` of the request.
    ///
    /// # Errors
    ///
    /// Returns the matching [`RequestFault`] when the parameter is absent,
    /// blank, or sent more than once.
    pub fn client_id(&self) -> Result<&str, RequestFault> {
        match self.get_all(CLIENT_ID) {
            [] => Err(RequestFault::MissingClientId),
            [single] if single.trim().is_empty() => Err(RequestFault::EmptyClientId),
            [single] => Ok(single.as_str()),
            _ => Err(RequestFault::DuplicateClientId),
        }
    }

    /// Whether this is an authorization-code token request carrying a code.
    #[must_use]
    pub fn is_authorization_code_grant(&self) -> bool {
        self.first(GRANT_TYPE) == Some(AUTHORIZATION_CODE) && self.first(CODE).is_some()
    }
}

/// A pass-through parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// The parameter appeared once.
    Single(String),
    /// The parameter appeared several times.
    Multiple(Vec<String>),
}

/// Opaque grant-specific parameters carried through to the provider chain.
pub type AdditionalParameters = BTreeMap<String, ParameterValue>;

/// Collect the parameters of an authorization-code token request.
///
/// Other grants carry nothing through. `exclusions` are dropped (the engine
/// passes `client_id`, which is already part of the result).
#[must_use]
pub fn authorization_code_parameters(
    params: &RequestParameters,
    exclusions: &[&str],
) -> AdditionalParameters {
    if !params.is_authorization_code_grant() {
        return AdditionalParameters::new();
    }

    params
        .iter()
        .filter(|(name, _)| !exclusions.contains(name))
        .map(|(name, values)| {
            let value = match values {
                [single] => ParameterValue::Single(single.clone()),
                many => ParameterValue::Multiple(many.to_vec()),
            };
            (name.to_owned(), value)
        })
        .collect()
}
