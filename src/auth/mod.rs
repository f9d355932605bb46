//! Request authentication.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;

use crate::config::ProviderKind;
use crate::errors::SlideStreamError;

/// Authentication provider trait.
pub trait AuthProvider: Send + Sync {
    /// Apply authentication to request headers.
    fn apply_auth(&self, headers: &mut HashMap<String, String>);

    /// Get the authentication scheme name.
    fn scheme(&self) -> &str;

    /// Validate the credentials.
    fn validate(&self) -> Result<(), SlideStreamError>;
}

/// Where the API key is placed on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPlacement {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// `<name>: <key>`.
    Header(String),
}

/// API key authentication provider.
pub struct ApiKeyAuth {
    api_key: SecretString,
    placement: KeyPlacement,
}

impl ApiKeyAuth {
    /// Creates a provider sending the key as a bearer token.
    pub fn bearer(api_key: SecretString) -> Self {
        Self {
            api_key,
            placement: KeyPlacement::Bearer,
        }
    }

    /// Creates a provider sending the key in a named header.
    pub fn header(name: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            api_key,
            placement: KeyPlacement::Header(name.into()),
        }
    }

    /// Creates the provider a model API expects.
    ///
    /// Anthropic takes the key in `x-api-key`; Bedrock API keys and
    /// OpenAI-compatible servers take a bearer token.
    pub fn for_provider(provider: ProviderKind, api_key: SecretString) -> Self {
        match provider {
            ProviderKind::Anthropic => Self::header("x-api-key", api_key),
            ProviderKind::BedrockConverse | ProviderKind::OpenAiCompatible => Self::bearer(api_key),
        }
    }

    /// Key placement.
    pub fn placement(&self) -> &KeyPlacement {
        &self.placement
    }

    /// Gets a hint of the API key for debugging (last 4 characters).
    pub fn key_hint(&self) -> String {
        let key = self.api_key.expose_secret();
        match key.char_indices().rev().nth(3) {
            Some((idx, _)) if idx > 0 => format!("...{}", &key[idx..]),
            _ => "****".to_string(),
        }
    }
}

impl AuthProvider for ApiKeyAuth {
    fn apply_auth(&self, headers: &mut HashMap<String, String>) {
        let key = self.api_key.expose_secret();
        match &self.placement {
            KeyPlacement::Bearer => {
                headers.insert("Authorization".to_string(), format!("Bearer {}", key));
            }
            KeyPlacement::Header(name) => {
                headers.insert(name.clone(), key.clone());
            }
        }
    }

    fn scheme(&self) -> &str {
        match self.placement {
            KeyPlacement::Bearer => "Bearer",
            KeyPlacement::Header(_) => "ApiKey",
        }
    }

    fn validate(&self) -> Result<(), SlideStreamError> {
        let key = self.api_key.expose_secret();
        if key.trim().is_empty() {
            return Err(SlideStreamError::configuration("API key cannot be empty"));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(SlideStreamError::configuration(
                "API key must not contain whitespace",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth")
            .field("api_key", &"[REDACTED]")
            .field("key_hint", &self.key_hint())
            .field("placement", &self.placement)
            .finish()
    }
}
