use std::fmt;
use std::time::Duration;

use crate::retry::RetryPolicy;

// --- Environment variable names ---

pub const PROVIDER_VAR: &str = "LLM_PROVIDER";

pub const GEMINI_ENDPOINT_VAR: &str = "GEMINI_ENDPOINT";
pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";
pub const GEMINI_MODEL_VAR: &str = "GEMINI_MODEL";

pub const OPENAI_ENDPOINT_VAR: &str = "SELF_HOSTED_OPENAI_ENDPOINT";
pub const OPENAI_API_KEY_VAR: &str = "SELF_HOSTED_OPENAI_API_KEY";
pub const OPENAI_MODEL_VAR: &str = "SELF_HOSTED_OPENAI_MODEL";

pub const AZURE_ENDPOINT_VAR: &str = "AZURE_AI_ENDPOINT";
pub const AZURE_API_KEY_VAR: &str = "AZURE_AI_API_KEY";
pub const AZURE_MODEL_VAR: &str = "AZURE_AI_MODEL";
pub const AZURE_API_VERSION_VAR: &str = "AZURE_AI_API_VERSION";

pub const MAX_RETRIES_VAR: &str = "LLM_MAX_RETRIES";
pub const RETRY_DELAY_VAR: &str = "LLM_RETRY_INITIAL_DELAY_MS";
pub const DATABASE_URL_VAR: &str = "SOAPSCRIBE_DATABASE_URL";

// --- Defaults ---

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_AZURE_MODEL: &str = "gpt-4o";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-05-01-preview";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://soapscribe.sqlite?mode=rwc";

/// Backend that serves the generation flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Hosted service with server-side schema-constrained decoding.
    Managed,
    /// Self-hosted OpenAI-compatible `/chat/completions` endpoint.
    OpenAiCompatible,
    /// Azure AI inference `/chat/completions` endpoint.
    Azure,
}

impl Provider {
    /// Parses a selector tag. Returns `None` for anything unrecognised.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "managed" | "genkit" | "googleai" | "gemini" => Some(Provider::Managed),
            "openai" | "openai_compatible" | "self-hosted-openai" | "self_hosted_openai" => {
                Some(Provider::OpenAiCompatible)
            }
            "azure" | "self-hosted-azure" | "self_hosted_azure" => Some(Provider::Azure),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Managed => write!(f, "managed"),
            Provider::OpenAiCompatible => write!(f, "openai_compatible"),
            Provider::Azure => write!(f, "azure"),
        }
    }
}

/// Secret credential. Never printed by `Debug` or `Display`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "ApiKey(<unset>)")
        } else {
            write!(f, "ApiKey(<redacted>)")
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub endpoint: String,
    pub api_key: ApiKey,
    pub model: String,
}

impl EndpointSettings {
    /// Lists the connection parameters that are still missing.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.endpoint.trim().is_empty() {
            missing.push("endpoint");
        }
        if self.api_key.is_empty() {
            missing.push("api key");
        }
        missing
    }
}

#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub connection: EndpointSettings,
    pub api_version: String,
}

/// Process-wide settings, resolved once at start and passed by reference.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: Provider,
    pub managed: EndpointSettings,
    pub openai: EndpointSettings,
    pub azure: AzureSettings,
    pub retry: RetryPolicy,
    pub database_url: String,
}

impl AppConfig {
    /// Resolves configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration from an arbitrary key lookup. Never fails:
    /// missing connection parameters are reported as warnings and surface
    /// later as call-time configuration errors.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = match get(PROVIDER_VAR) {
            None => Provider::Managed,
            Some(tag) => Provider::from_tag(&tag).unwrap_or_else(|| {
                log::warn!(
                    "Unrecognized {} value '{}', falling back to the managed provider",
                    PROVIDER_VAR,
                    tag
                );
                Provider::Managed
            }),
        };

        let managed = EndpointSettings {
            endpoint: get(GEMINI_ENDPOINT_VAR).unwrap_or_else(|| DEFAULT_GEMINI_ENDPOINT.to_string()),
            api_key: ApiKey::new(
                get(GEMINI_API_KEY_VAR)
                    .or_else(|| get(GOOGLE_API_KEY_VAR))
                    .unwrap_or_default(),
            ),
            model: get(GEMINI_MODEL_VAR).unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        };

        let openai = EndpointSettings {
            endpoint: get(OPENAI_ENDPOINT_VAR).unwrap_or_default(),
            api_key: ApiKey::new(get(OPENAI_API_KEY_VAR).unwrap_or_default()),
            model: get(OPENAI_MODEL_VAR).unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        };

        let azure = AzureSettings {
            connection: EndpointSettings {
                endpoint: get(AZURE_ENDPOINT_VAR).unwrap_or_default(),
                api_key: ApiKey::new(get(AZURE_API_KEY_VAR).unwrap_or_default()),
                model: get(AZURE_MODEL_VAR).unwrap_or_else(|| DEFAULT_AZURE_MODEL.to_string()),
            },
            api_version: get(AZURE_API_VERSION_VAR)
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_or_default(MAX_RETRIES_VAR, get(MAX_RETRIES_VAR), defaults.max_retries),
            initial_delay: Duration::from_millis(parse_or_default(
                RETRY_DELAY_VAR,
                get(RETRY_DELAY_VAR),
                defaults.initial_delay.as_millis() as u64,
            )),
        };

        let config = Self {
            provider,
            managed,
            openai,
            azure,
            retry,
            database_url: get(DATABASE_URL_VAR).unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        };
        config.warn_if_incomplete();
        config
    }

    /// Connection settings of the active provider.
    pub fn active_settings(&self) -> &EndpointSettings {
        match self.provider {
            Provider::Managed => &self.managed,
            Provider::OpenAiCompatible => &self.openai,
            Provider::Azure => &self.azure.connection,
        }
    }

    fn warn_if_incomplete(&self) {
        let missing = self.active_settings().missing();
        if !missing.is_empty() {
            log::warn!(
                "Provider '{}' is selected but missing: {}. Generation calls will fail until this is configured.",
                self.provider,
                missing.join(", ")
            );
        }
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.active_settings();
        writeln!(f, "provider:     {}", self.provider)?;
        writeln!(f, "endpoint:     {}", display_or_unset(&active.endpoint))?;
        writeln!(f, "model:        {}", active.model)?;
        writeln!(
            f,
            "api key:      {}",
            if active.api_key.is_empty() { "<unset>" } else { "<set>" }
        )?;
        if self.provider == Provider::Azure {
            writeln!(f, "api version:  {}", self.azure.api_version)?;
        }
        writeln!(
            f,
            "retries:      {} (initial delay {} ms)",
            self.retry.max_retries,
            self.retry.initial_delay.as_millis()
        )?;
        write!(f, "database:     {}", self.database_url)
    }
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "<unset>"
    } else {
        value
    }
}

fn parse_or_default<T: std::str::FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid value '{}' for {}", raw, key);
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_to_managed_when_selector_unset() {
        let config = config_from(&[]);
        assert_eq!(config.provider, Provider::Managed);
        assert_eq!(config.managed.endpoint, DEFAULT_GEMINI_ENDPOINT);
        assert_eq!(config.managed.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.openai.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(config.azure.connection.model, DEFAULT_AZURE_MODEL);
        assert_eq!(config.azure.api_version, DEFAULT_AZURE_API_VERSION);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
    }

    #[test]
    fn defaults_to_managed_when_selector_unrecognized() {
        let config = config_from(&[(PROVIDER_VAR, "anthropic")]);
        assert_eq!(config.provider, Provider::Managed);

        let config = config_from(&[(PROVIDER_VAR, "   ")]);
        assert_eq!(config.provider, Provider::Managed);
    }

    #[test]
    fn recognizes_self_hosted_tags() {
        let config = config_from(&[(PROVIDER_VAR, "Self-Hosted-OpenAI")]);
        assert_eq!(config.provider, Provider::OpenAiCompatible);

        let config = config_from(&[(PROVIDER_VAR, "azure")]);
        assert_eq!(config.provider, Provider::Azure);
    }

    #[test]
    fn reads_connection_parameters() {
        let config = config_from(&[
            (PROVIDER_VAR, "openai"),
            (OPENAI_ENDPOINT_VAR, "http://localhost:8000/v1"),
            (OPENAI_API_KEY_VAR, "sk-local"),
            (OPENAI_MODEL_VAR, "llama3"),
            (MAX_RETRIES_VAR, "5"),
            (RETRY_DELAY_VAR, "250"),
        ]);
        let active = config.active_settings();
        assert_eq!(active.endpoint, "http://localhost:8000/v1");
        assert_eq!(active.api_key.expose(), "sk-local");
        assert_eq!(active.model, "llama3");
        assert!(active.missing().is_empty());
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn google_api_key_is_a_fallback() {
        let config = config_from(&[(GOOGLE_API_KEY_VAR, "g-key")]);
        assert_eq!(config.managed.api_key.expose(), "g-key");

        let config = config_from(&[(GOOGLE_API_KEY_VAR, "g-key"), (GEMINI_API_KEY_VAR, "gem-key")]);
        assert_eq!(config.managed.api_key.expose(), "gem-key");
    }

    #[test]
    fn missing_parameters_do_not_fail_resolution() {
        let config = config_from(&[(PROVIDER_VAR, "azure")]);
        assert_eq!(config.active_settings().missing(), vec!["endpoint", "api key"]);
    }

    #[test]
    fn invalid_retry_values_fall_back() {
        let config = config_from(&[(MAX_RETRIES_VAR, "many"), (RETRY_DELAY_VAR, "-1")]);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(1000));
    }

    #[test]
    fn api_key_is_redacted() {
        let key = ApiKey::new("super-secret");
        assert!(!format!("{key:?}").contains("super-secret"));
        let config = config_from(&[(GEMINI_API_KEY_VAR, "super-secret")]);
        assert!(!config.to_string().contains("super-secret"));
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
