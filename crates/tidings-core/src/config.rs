use std::time::Duration;

use crate::constants::{
    ARCHIVE_RETRY_ATTEMPTS, ARCHIVE_RETRY_DELAY_MS, DEFAULT_ARCHIVE_URL_TEMPLATE, DEFAULT_LIMIT,
    DEFAULT_WORKSPACE, ENV_ARCHIVE_RETRIES, ENV_ARCHIVE_RETRY_DELAY_MS, ENV_ARCHIVE_URL,
    ENV_WORKSPACE, GROUP_PAGE_SIZE,
};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles after each failed attempt.
    Exponential,
}

/// How archive blob fetches are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Delay to wait after the given (zero-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => self.delay.saturating_mul(1u32 << attempt.min(16)),
        }
    }

    /// No waiting between attempts. Used by tests and the replay tool.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: ARCHIVE_RETRY_ATTEMPTS,
            delay: Duration::from_millis(ARCHIVE_RETRY_DELAY_MS),
            backoff: Backoff::Fixed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub workspace: String,
    pub archive_url_template: String,
    pub archive_retry: RetryPolicy,
    pub group_page_size: usize,
    pub default_limit: usize,
}

impl CoreConfig {
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `TIDINGS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workspace) = lookup(ENV_WORKSPACE) {
            config.workspace = workspace;
        }
        if let Some(template) = lookup(ENV_ARCHIVE_URL) {
            if !template.contains(":blobId") {
                return Err(CoreError::Config(format!(
                    "{} must contain :blobId, got {}",
                    ENV_ARCHIVE_URL, template
                )));
            }
            config.archive_url_template = template;
        }
        if let Some(raw) = lookup(ENV_ARCHIVE_RETRIES) {
            let attempts: u32 = raw.parse().map_err(|_| {
                CoreError::Config(format!("{} is not a number: {}", ENV_ARCHIVE_RETRIES, raw))
            })?;
            if attempts == 0 {
                return Err(CoreError::Config(format!(
                    "{} must be at least 1",
                    ENV_ARCHIVE_RETRIES
                )));
            }
            config.archive_retry.attempts = attempts;
        }
        if let Some(raw) = lookup(ENV_ARCHIVE_RETRY_DELAY_MS) {
            let millis: u64 = raw.parse().map_err(|_| {
                CoreError::Config(format!(
                    "{} is not a number: {}",
                    ENV_ARCHIVE_RETRY_DELAY_MS, raw
                ))
            })?;
            config.archive_retry.delay = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn with_archive_url_template(mut self, template: impl Into<String>) -> Self {
        self.archive_url_template = template.into();
        self
    }

    pub fn with_archive_retry(mut self, retry: RetryPolicy) -> Self {
        self.archive_retry = retry;
        self
    }

    pub fn with_group_page_size(mut self, size: usize) -> Self {
        self.group_page_size = size.max(1);
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            workspace: DEFAULT_WORKSPACE.to_string(),
            archive_url_template: DEFAULT_ARCHIVE_URL_TEMPLATE.to_string(),
            archive_retry: RetryPolicy::default(),
            group_page_size: GROUP_PAGE_SIZE,
            default_limit: DEFAULT_LIMIT,
        }
    }
}
