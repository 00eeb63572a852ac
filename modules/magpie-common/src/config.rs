use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres (durable cursor + dedup state)
    pub database_url: String,

    // Bluesky
    pub bluesky_service: String,
    pub bluesky_handle: String,
    pub bluesky_password: String,

    // OpenAI
    pub openai_api_key: String,
    pub openai_model: String,

    // Web server
    pub api_host: String,
    pub api_port: u16,

    // Pipeline tuning
    pub poll_interval_secs: u64,
    pub trend_interval_secs: u64,
    pub notification_page_limit: u32,
    pub processed_ttl_days: u64,
    pub rate_max_requests: usize,
    pub rate_window_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            bluesky_service: env::var("BLUESKY_SERVICE")
                .unwrap_or_else(|_| "https://bsky.social".to_string()),
            bluesky_handle: required_env("BLUESKY_HANDLE"),
            bluesky_password: required_env("BLUESKY_PASSWORD"),
            openai_api_key: required_env("OPENAI_API_KEY"),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parsed_env("API_PORT", 8001),
            poll_interval_secs: parsed_env("POLL_INTERVAL_SECS", 300),
            trend_interval_secs: parsed_env("TREND_INTERVAL_SECS", 3600),
            notification_page_limit: parsed_env("NOTIFICATION_PAGE_LIMIT", 20),
            processed_ttl_days: parsed_env("PROCESSED_TTL_DAYS", 7),
            rate_max_requests: parsed_env("RATE_MAX_REQUESTS", 50),
            rate_window_secs: parsed_env("RATE_WINDOW_SECS", 900),
            retry_max_attempts: parsed_env("RETRY_MAX_ATTEMPTS", 3),
            retry_base_delay_ms: parsed_env("RETRY_BASE_DELAY_MS", 1000),
        }
    }

    /// Log the effective configuration without secrets.
    pub fn log_redacted(&self) {
        info!(
            bluesky_service = self.bluesky_service.as_str(),
            bluesky_handle = self.bluesky_handle.as_str(),
            openai_model = self.openai_model.as_str(),
            api_host = self.api_host.as_str(),
            api_port = self.api_port,
            poll_interval_secs = self.poll_interval_secs,
            trend_interval_secs = self.trend_interval_secs,
            notification_page_limit = self.notification_page_limit,
            processed_ttl_days = self.processed_ttl_days,
            rate_max_requests = self.rate_max_requests,
            rate_window_secs = self.rate_window_secs,
            retry_max_attempts = self.retry_max_attempts,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a number: {e:?}")),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_knobs_parse_unsigned() {
        env::set_var("MAGPIE_TEST_TTL_DAYS", "14");
        assert_eq!(parsed_env::<u64>("MAGPIE_TEST_TTL_DAYS", 7), 14);
        env::remove_var("MAGPIE_TEST_TTL_DAYS");
        assert_eq!(parsed_env::<u64>("MAGPIE_TEST_TTL_DAYS", 7), 7);
    }

    #[test]
    fn negative_ttl_days_is_rejected_at_parse() {
        // A negative day count must fail loudly at startup, not wrap into
        // an enormous TTL.
        env::set_var("MAGPIE_TEST_TTL_NEGATIVE", "-1");
        let parsed =
            std::panic::catch_unwind(|| parsed_env::<u64>("MAGPIE_TEST_TTL_NEGATIVE", 7));
        assert!(parsed.is_err());
    }
}
