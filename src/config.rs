use std::{env, path::PathBuf};

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub callback_bind_addr: String,
    pub api_prefix: String,
    pub provider_url: String,
    pub access_token_file: Option<PathBuf>,
    pub recurring_enabled: bool,
    pub recurring: RecurringSettings,
    pub max_body_bytes: usize,
    pub callback_max_body_bytes: usize,
    pub operator_token: Option<String>,
    pub shutdown_grace_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RecurringSettings {
    pub max_report_count: u32,
    pub report_period_secs: u64,
    // Must reach this process's callback listener.
    pub notification_endpoint: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:8008");
        let callback_bind_addr = env_or("CALLBACK_BIND_ADDR", "0.0.0.0:8009");
        let api_prefix = env_or("API_PREFIX", "/invoker-app/v1");
        let provider_url =
            env::var("PROVIDER_URL").map_err(|_| anyhow::anyhow!("PROVIDER_URL is required"))?;
        // An empty value sends every provider call unauthenticated.
        let access_token_file = Some(env_or("ACCESS_TOKEN_FILE", "./access_token.txt"))
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let recurring_enabled = env_or_parse("RECURRING_ENABLED", false)?;
        let max_report_count = env_or_parse("MAX_REPORT_COUNT", 5)?;
        let report_period_secs = env_or_parse("REPORT_PERIOD_SECS", 10)?;
        let notification_endpoint = env_or(
            "NOTIFICATION_ENDPOINT",
            "http://localhost:8009/_internal/callback",
        );
        let max_body_bytes = env_or_parse("MAX_BODY_BYTES", 16 * 1024)?;
        let callback_max_body_bytes = env_or_parse("CALLBACK_MAX_BODY_BYTES", 1024 * 1024)?;
        // Unset disables operator cancellation.
        let operator_token = env::var("OPERATOR_TOKEN")
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        let shutdown_grace_secs = env_or_parse("SHUTDOWN_GRACE_SECS", 15)?;

        let cfg = Self {
            bind_addr,
            callback_bind_addr,
            api_prefix: normalize_prefix(&api_prefix),
            provider_url,
            access_token_file,
            recurring_enabled,
            recurring: RecurringSettings {
                max_report_count,
                report_period_secs,
                notification_endpoint,
            },
            max_body_bytes,
            callback_max_body_bytes,
            operator_token,
            shutdown_grace_secs,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.provider_url.trim().is_empty() {
            return Err(anyhow::anyhow!("PROVIDER_URL must not be empty"));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_BODY_BYTES must be > 0"));
        }
        if self.callback_max_body_bytes == 0 {
            return Err(anyhow::anyhow!("CALLBACK_MAX_BODY_BYTES must be > 0"));
        }
        if self.recurring_enabled {
            if self.recurring.max_report_count == 0 {
                return Err(anyhow::anyhow!(
                    "MAX_REPORT_COUNT must be > 0 when RECURRING_ENABLED is set"
                ));
            }
            if self.recurring.report_period_secs == 0 {
                return Err(anyhow::anyhow!(
                    "REPORT_PERIOD_SECS must be > 0 when RECURRING_ENABLED is set"
                ));
            }
            if self.recurring.notification_endpoint.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "NOTIFICATION_ENDPOINT is required when RECURRING_ENABLED is set"
                ));
            }
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => Ok(value.trim().parse()?),
        Err(_) => Ok(default),
    }
}

fn normalize_prefix(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
pub(crate) fn test_config(provider_url: &str) -> Config {
    Config {
        bind_addr: "127.0.0.1:0".to_string(),
        callback_bind_addr: "127.0.0.1:0".to_string(),
        api_prefix: "/invoker-app/v1".to_string(),
        provider_url: provider_url.to_string(),
        access_token_file: None,
        recurring_enabled: false,
        recurring: RecurringSettings {
            max_report_count: 2,
            report_period_secs: 5,
            notification_endpoint: "http://localhost:8009/_internal/callback".to_string(),
        },
        max_body_bytes: 16 * 1024,
        callback_max_body_bytes: 64 * 1024,
        operator_token: Some("operator-secret".to_string()),
        shutdown_grace_secs: 1,
    }
}
