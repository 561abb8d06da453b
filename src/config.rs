//! Configuration loaded from environment variables.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default system prompt sent with every generation request.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Keep responses concise for SMS.";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Runtime settings.
///
/// Everything the composition root needs: provider choice, prompt and
/// context tuning, the phone-number allowlist, the shared relay secret,
/// and server/storage knobs.
#[derive(Debug, Clone)]
pub struct Settings {
    /// AI provider identifier (`anthropic` or `openai`).
    pub ai_provider: String,
    /// Model identifier passed to the provider.
    pub ai_model: String,
    /// Provider API key.
    pub api_key: SecretString,
    /// System instructions prepended to every generation request.
    pub system_prompt: String,
    /// Maximum conversation-history messages sent as context.
    pub max_context_messages: usize,
    /// Allowed phone numbers. Empty means open mode (allow all senders).
    pub allowed_numbers: Vec<String>,
    /// Shared-secret API key expected from the relay (optional).
    pub sms_api_key: Option<String>,
    /// SQLite database path.
    pub database_path: String,
    /// HTTP listen port.
    pub port: u16,
    /// Max outbox entries returned per poll.
    pub poll_batch_size: usize,
    /// Days to keep resolved outbox entries before cleanup.
    pub outbox_retention_days: u32,
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// The provider API key is read from `ANTHROPIC_API_KEY` or
    /// `OPENAI_API_KEY` depending on `SMS_ASSIST_PROVIDER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ai_provider = std::env::var("SMS_ASSIST_PROVIDER")
            .unwrap_or_else(|_| "anthropic".to_string())
            .to_lowercase();

        let key_var = match ai_provider.as_str() {
            "anthropic" => "ANTHROPIC_API_KEY",
            "openai" => "OPENAI_API_KEY",
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "SMS_ASSIST_PROVIDER".to_string(),
                    message: format!("unknown provider '{other}' (expected anthropic or openai)"),
                });
            }
        };
        let api_key = std::env::var(key_var)
            .map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let ai_model =
            std::env::var("SMS_ASSIST_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let system_prompt = std::env::var("SMS_ASSIST_SYSTEM_PROMPT")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());

        let allowed_numbers = parse_allowlist(
            &std::env::var("SMS_ASSIST_ALLOWED_NUMBERS").unwrap_or_default(),
        );

        Ok(Self {
            ai_provider,
            ai_model,
            api_key: SecretString::from(api_key),
            system_prompt,
            max_context_messages: env_parse("SMS_ASSIST_MAX_CONTEXT", 20)?,
            allowed_numbers,
            sms_api_key: std::env::var("SMS_ASSIST_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            database_path: std::env::var("SMS_ASSIST_DB_PATH")
                .unwrap_or_else(|_| "./data/sms-assist.db".to_string()),
            port: env_parse("SMS_ASSIST_PORT", 8080)?,
            poll_batch_size: env_parse("SMS_ASSIST_POLL_BATCH", 10)?,
            outbox_retention_days: env_parse("SMS_ASSIST_OUTBOX_RETENTION_DAYS", 7)?,
        })
    }
}

/// Split a comma-separated allowlist, trimming and dropping empty entries.
pub fn parse_allowlist(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read an env var and parse it, falling back to `default` when unset.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse '{raw}'"),
        }),
        Err(_) => Ok(default),
    }
}
