//! Configuration types.
//!
//! Everything comes from environment variables. `from_env` reads the process
//! environment; `from_lookup` takes any key → value source (used by tests).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::knowledge::SupabaseConfig;
use crate::llm::{DEFAULT_LLM_TIMEOUT, LlmBackend, LlmConfig};
use crate::mail::MailConfig;

/// Hard upper bound on how many emails one listing may return.
pub const READ_LIMIT_CAP: usize = 20;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum snippet score (inclusive) for retrieve_info answers.
    pub relevance_threshold: f32,
    /// Snippets requested per retrieve_info search.
    pub retrieve_limit: usize,
    /// Snippets requested as drafting context.
    pub draft_context_limit: usize,
    /// Minimum score for a drafting-context snippet.
    pub draft_context_min_score: f32,
    /// Emails listed when the user names no count.
    pub read_default_count: usize,
    /// Most emails listed in one response.
    pub read_cap: usize,
    /// Candidates fetched when resolving an inbox target by sender/subject.
    pub inbox_search_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.7,
            retrieve_limit: 5,
            draft_context_limit: 3,
            draft_context_min_score: 0.5,
            read_default_count: 5,
            read_cap: READ_LIMIT_CAP,
            inbox_search_limit: 10,
        }
    }
}

impl PipelineConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let relevance_threshold: f32 = parse_or(
            lookup,
            "MAILDESK_RELEVANCE_THRESHOLD",
            defaults.relevance_threshold,
        )?;
        if !(0.0..=1.0).contains(&relevance_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "MAILDESK_RELEVANCE_THRESHOLD".into(),
                message: format!("{relevance_threshold} is outside [0, 1]"),
            });
        }

        let read_default_count: usize =
            parse_or(lookup, "MAILDESK_READ_LIMIT", defaults.read_default_count)?;
        if read_default_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILDESK_READ_LIMIT".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            relevance_threshold,
            read_default_count: read_default_count.min(READ_LIMIT_CAP),
            ..defaults
        })
    }
}

/// Where knowledge snippets come from.
#[derive(Debug, Clone)]
pub enum KnowledgeSource {
    Supabase(SupabaseConfig),
    /// JSON document file for the in-memory backend.
    File(PathBuf),
    /// No knowledge base: every search comes back empty.
    Empty,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub knowledge: KnowledgeSource,
    /// `None` when no mailbox is configured.
    pub mail: Option<MailConfig>,
    pub pipeline: PipelineConfig,
    pub port: u16,
    pub environment: String,
    /// Directory for daily rolling log files, if file logging is wanted.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(&|key: &str| std::env::var(key).ok())?;
        config.mail = MailConfig::from_env();
        Ok(config)
    }

    /// Build config from a key lookup. Mail settings are left unset.
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend: LlmBackend = lookup("LLM_BACKEND")
            .unwrap_or_else(|| "openai".to_string())
            .parse()?;

        let key_var = match backend {
            LlmBackend::OpenAi => "OPENAI_API_KEY",
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        };
        let api_key = lookup(key_var)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: key_var.to_string(),
                hint: format!("export {key_var}=... (LLM_BACKEND selects the provider)"),
            })?;

        let model = lookup("MAILDESK_MODEL").unwrap_or_else(|| match backend {
            LlmBackend::OpenAi => "gpt-4o-mini".to_string(),
            LlmBackend::Anthropic => "claude-sonnet-4-20250514".to_string(),
        });

        let timeout_secs: u64 = parse_or(
            lookup,
            "MAILDESK_LLM_TIMEOUT_SECS",
            DEFAULT_LLM_TIMEOUT.as_secs(),
        )?;
        let timeout = Duration::from_secs(timeout_secs);

        let knowledge = if let Some(url) = lookup("SUPABASE_URL") {
            let service_key =
                lookup("SUPABASE_SERVICE_KEY").ok_or_else(|| ConfigError::MissingRequired {
                    key: "SUPABASE_SERVICE_KEY".into(),
                    hint: "required when SUPABASE_URL is set".into(),
                })?;
            let openai_api_key =
                lookup("OPENAI_API_KEY").ok_or_else(|| ConfigError::MissingRequired {
                    key: "OPENAI_API_KEY".into(),
                    hint: "query embeddings for Supabase search use the OpenAI API".into(),
                })?;
            KnowledgeSource::Supabase(SupabaseConfig {
                url,
                service_key: SecretString::from(service_key),
                openai_api_key: SecretString::from(openai_api_key),
                openai_base_url: lookup("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com".to_string()),
                timeout,
            })
        } else if let Some(path) = lookup("MAILDESK_KNOWLEDGE_FILE") {
            KnowledgeSource::File(PathBuf::from(path))
        } else {
            KnowledgeSource::Empty
        };

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
                timeout,
            },
            knowledge,
            mail: None,
            pipeline: PipelineConfig::from_lookup(lookup)?,
            port: parse_or(lookup, "MAILDESK_PORT", 8000)?,
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            log_dir: lookup("MAILDESK_LOG_DIR").map(PathBuf::from),
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_with_openai_key() {
        let config = AppConfig::from_lookup(&lookup(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.llm.backend, LlmBackend::OpenAi);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.port, 8000);
        assert_eq!(config.environment, "development");
        assert!(matches!(config.knowledge, KnowledgeSource::Empty));
        assert!(config.mail.is_none());
        assert_eq!(config.pipeline.relevance_threshold, 0.7);
        assert_eq!(config.pipeline.read_cap, READ_LIMIT_CAP);
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = AppConfig::from_lookup(&lookup(&[("LLM_BACKEND", "anthropic")])).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "ANTHROPIC_API_KEY")
        );
    }

    #[test]
    fn unknown_backend_is_invalid() {
        let err = AppConfig::from_lookup(&lookup(&[("LLM_BACKEND", "llama")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn supabase_requires_service_key() {
        let err = AppConfig::from_lookup(&lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("SUPABASE_URL", "https://x.supabase.co"),
        ]))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "SUPABASE_SERVICE_KEY")
        );

        let config = AppConfig::from_lookup(&lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_SERVICE_KEY", "service"),
        ]))
        .unwrap();
        assert!(matches!(config.knowledge, KnowledgeSource::Supabase(_)));
    }

    #[test]
    fn knowledge_file_source() {
        let config = AppConfig::from_lookup(&lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("MAILDESK_KNOWLEDGE_FILE", "data/kb.json"),
        ]))
        .unwrap();
        assert!(
            matches!(config.knowledge, KnowledgeSource::File(ref p) if p == &PathBuf::from("data/kb.json"))
        );
    }

    #[test]
    fn threshold_must_be_a_probability() {
        let err = PipelineConfig::from_lookup(&lookup(&[("MAILDESK_RELEVANCE_THRESHOLD", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = PipelineConfig::from_lookup(&lookup(&[("MAILDESK_RELEVANCE_THRESHOLD", "high")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let config =
            PipelineConfig::from_lookup(&lookup(&[("MAILDESK_RELEVANCE_THRESHOLD", "0.8")]))
                .unwrap();
        assert_eq!(config.relevance_threshold, 0.8);
    }

    #[test]
    fn read_limit_is_capped() {
        let config = PipelineConfig::from_lookup(&lookup(&[("MAILDESK_READ_LIMIT", "50")])).unwrap();
        assert_eq!(config.read_default_count, READ_LIMIT_CAP);
        assert!(PipelineConfig::from_lookup(&lookup(&[("MAILDESK_READ_LIMIT", "0")])).is_err());
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = AppConfig::from_lookup(&lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("MAILDESK_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MAILDESK_PORT"));
    }
}
