//! Runtime configuration read from `LENS_*` environment variables.
//!
//! Every numeric setting is a positive integer. Missing values use the default; unparsable,
//! zero or negative values also fall back to the default (with a warning).
use std::time::Duration;

use lens_model::{ExecutionMode, GenerationParams};
use tracing::warn;

pub const ENV_MAX_CONCURRENT: &str = "LENS_MAX_CONCURRENT";
pub const ENV_MAX_CONCURRENT_BATCH: &str = "LENS_MAX_CONCURRENT_BATCH";
pub const ENV_ADMISSION_WAIT_MS: &str = "LENS_ADMISSION_WAIT_MS";
pub const ENV_BATCH_POLL_INTERVAL_MS: &str = "LENS_BATCH_POLL_INTERVAL_MS";
pub const ENV_BATCH_DEADLINE_MS: &str = "LENS_BATCH_DEADLINE_MS";
pub const ENV_MAX_RETRIES: &str = "LENS_MAX_RETRIES";
pub const ENV_REPAIR_ERROR_MAX_CHARS: &str = "LENS_REPAIR_ERROR_MAX_CHARS";
pub const ENV_MAX_REPAIR_ATTEMPTS: &str = "LENS_MAX_REPAIR_ATTEMPTS";
pub const ENV_TASK_TTL_MS: &str = "LENS_TASK_TTL_MS";
pub const ENV_CONTEXT_TTL_MS: &str = "LENS_CONTEXT_TTL_MS";
pub const ENV_MAX_CONTEXT_BYTES: &str = "LENS_MAX_CONTEXT_BYTES";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "LENS_REQUEST_TIMEOUT_MS";
pub const ENV_MAX_OUTPUT_TOKENS: &str = "LENS_MAX_OUTPUT_TOKENS";
pub const ENV_MODEL: &str = "LENS_MODEL";

#[derive(Debug, Clone, PartialEq)]
pub struct LensConfig {
    /// Concurrent interactive upstream calls.
    pub max_concurrent: u64,
    /// Concurrent batch jobs.
    pub max_concurrent_batch: u64,
    /// How long a request may wait for an admission slot.
    pub admission_wait_ms: u64,
    pub batch_poll_interval_ms: u64,
    /// Batch deadline, measured from job creation.
    pub batch_deadline_ms: u64,
    /// Retries after the first attempt.
    pub max_retries: u64,
    /// Length cap of the validation error echoed back during schema repair.
    pub repair_error_max_chars: u64,
    pub max_repair_attempts: u64,
    /// Retention of terminal task records.
    pub task_ttl_ms: u64,
    /// Expiry of cached diff/file context.
    pub context_ttl_ms: u64,
    pub max_context_bytes: u64,
    pub request_timeout_ms: u64,
    pub max_output_tokens: u64,
    pub model: String,
}

impl Default for LensConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_concurrent_batch: 2,
            admission_wait_ms: 60_000,
            batch_poll_interval_ms: 5_000,
            batch_deadline_ms: 600_000,
            max_retries: 3,
            repair_error_max_chars: 1_000,
            max_repair_attempts: 2,
            task_ttl_ms: 3_600_000,
            context_ttl_ms: 1_800_000,
            max_context_bytes: 500_000,
            request_timeout_ms: 120_000,
            max_output_tokens: 8_192,
            model: "gemini-2.5-flash".to_string(),
        }
    }
}

impl LensConfig {
    /// Reads the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let num = |key: &str, default: u64| positive(key, lookup(key), default);

        Self {
            max_concurrent: num(ENV_MAX_CONCURRENT, d.max_concurrent),
            max_concurrent_batch: num(ENV_MAX_CONCURRENT_BATCH, d.max_concurrent_batch),
            admission_wait_ms: num(ENV_ADMISSION_WAIT_MS, d.admission_wait_ms),
            batch_poll_interval_ms: num(ENV_BATCH_POLL_INTERVAL_MS, d.batch_poll_interval_ms),
            batch_deadline_ms: num(ENV_BATCH_DEADLINE_MS, d.batch_deadline_ms),
            max_retries: num(ENV_MAX_RETRIES, d.max_retries),
            repair_error_max_chars: num(ENV_REPAIR_ERROR_MAX_CHARS, d.repair_error_max_chars),
            max_repair_attempts: num(ENV_MAX_REPAIR_ATTEMPTS, d.max_repair_attempts),
            task_ttl_ms: num(ENV_TASK_TTL_MS, d.task_ttl_ms),
            context_ttl_ms: num(ENV_CONTEXT_TTL_MS, d.context_ttl_ms),
            max_context_bytes: num(ENV_MAX_CONTEXT_BYTES, d.max_context_bytes),
            request_timeout_ms: num(ENV_REQUEST_TIMEOUT_MS, d.request_timeout_ms),
            max_output_tokens: num(ENV_MAX_OUTPUT_TOKENS, d.max_output_tokens),
            model: lookup(ENV_MODEL)
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or(d.model),
        }
    }

    #[inline]
    pub fn admission_wait(&self) -> Duration {
        Duration::from_millis(self.admission_wait_ms)
    }
    #[inline]
    pub fn batch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.batch_poll_interval_ms)
    }
    #[inline]
    pub fn batch_deadline(&self) -> Duration {
        Duration::from_millis(self.batch_deadline_ms)
    }
    #[inline]
    pub fn task_ttl(&self) -> Duration {
        Duration::from_millis(self.task_ttl_ms)
    }
    #[inline]
    pub fn context_ttl(&self) -> Duration {
        Duration::from_millis(self.context_ttl_ms)
    }

    /// Default execution parameters for requests built under this configuration.
    pub fn generation_params(&self, mode: ExecutionMode) -> GenerationParams {
        GenerationParams {
            model: self.model.clone(),
            timeout_ms: self.request_timeout_ms,
            max_output_tokens: u32::try_from(self.max_output_tokens).unwrap_or(u32::MAX),
            max_retries: u32::try_from(self.max_retries).unwrap_or(u32::MAX),
            mode,
            ..GenerationParams::default()
        }
    }
}

fn positive(key: &str, raw: Option<String>, default: u64) -> u64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<i64>() {
        Ok(v) if v > 0 => v as u64,
        _ => {
            warn!(key, value = %raw, default, "invalid setting; using default");
            default
        }
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
    fn empty_environment_yields_defaults() {
        let cfg = LensConfig::from_lookup(|_| None);
        assert_eq!(cfg, LensConfig::default());
    }

    #[test]
    fn valid_values_override_defaults() {
        let cfg = LensConfig::from_lookup(lookup(&[
            (ENV_MAX_CONCURRENT, "8"),
            (ENV_BATCH_POLL_INTERVAL_MS, " 250 "),
            (ENV_MODEL, "gemini-2.5-pro"),
        ]));
        assert_eq!(cfg.max_concurrent, 8);
        assert_eq!(cfg.batch_poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.model, "gemini-2.5-pro");
    }

    #[test]
    fn non_positive_and_garbage_fall_back() {
        let cfg = LensConfig::from_lookup(lookup(&[
            (ENV_MAX_CONCURRENT, "0"),
            (ENV_MAX_RETRIES, "-2"),
            (ENV_TASK_TTL_MS, "soon"),
            (ENV_MODEL, "   "),
        ]));
        let d = LensConfig::default();
        assert_eq!(cfg.max_concurrent, d.max_concurrent);
        assert_eq!(cfg.max_retries, d.max_retries);
        assert_eq!(cfg.task_ttl_ms, d.task_ttl_ms);
        assert_eq!(cfg.model, d.model);
    }

    #[test]
    fn generation_params_follow_config() {
        let cfg = LensConfig {
            max_retries: 5,
            request_timeout_ms: 1_000,
            ..LensConfig::default()
        };
        let params = cfg.generation_params(ExecutionMode::Batch);
        assert_eq!(params.max_retries, 5);
        assert_eq!(params.timeout_ms, 1_000);
        assert_eq!(params.mode, ExecutionMode::Batch);
    }
}
