//! Launch controller: bounded launch retries with exponential backoff, a
//! managed-channel first attempt, and a single recovery escalation.

use std::sync::Arc;
use std::time::Duration;

use autoheal_common::{BrowserHandle, Engine, Error, FailureClassification, Result, RetryPolicy};
use tracing::{info, warn};

use crate::driver::{BrowserDriver, LaunchOptions, LaunchOverrides};
use crate::recovery::{RecoveryContext, RecoveryDispatcher, RecoveryOutcome, RecoveryPayload};
use crate::retry::{retry, Attempt, Attempts, RetryOutcome};

/// Slack on top of the driver-level launch timeout before the call is abandoned
pub const LAUNCH_GRACE: Duration = Duration::from_secs(5);

/// A running browser plus the recovery that produced it, if one was needed
#[derive(Debug, Clone)]
pub struct Launched {
    pub browser: BrowserHandle,
    pub attempts: u32,
    pub recovery: Option<RecoveryOutcome>,
}

/// Launch exhaustion after the escalation recovery also failed
#[derive(Debug)]
pub struct LaunchFailure {
    /// `Error::LaunchFailed` carrying both messages
    pub error: Error,
    /// The dispatched launch-timeout recovery
    pub recovery: RecoveryOutcome,
}

impl From<LaunchFailure> for Error {
    fn from(failure: LaunchFailure) -> Self {
        failure.error
    }
}

#[derive(Clone)]
pub struct LaunchController {
    driver: Arc<dyn BrowserDriver>,
    policy: RetryPolicy,
    defaults: LaunchOptions,
    use_managed_channel: bool,
}

impl LaunchController {
    pub fn new(driver: Arc<dyn BrowserDriver>, policy: RetryPolicy, defaults: LaunchOptions) -> Self {
        Self {
            driver,
            policy,
            defaults,
            use_managed_channel: true,
        }
    }

    pub fn with_managed_channel(mut self, enabled: bool) -> Self {
        self.use_managed_channel = enabled;
        self
    }

    pub fn engine(&self) -> Engine {
        self.defaults.engine
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn default_options(&self) -> LaunchOptions {
        self.defaults.clone()
    }

    /// Fixed defaults merged with caller overrides.
    pub fn options(&self, overrides: &LaunchOverrides) -> LaunchOptions {
        self.defaults.clone().merged(overrides)
    }

    /// One direct launch under a hard deadline.
    pub async fn launch_once(&self, options: &LaunchOptions) -> Result<BrowserHandle> {
        let deadline = options.timeout + LAUNCH_GRACE;
        match tokio::time::timeout(deadline, self.driver.launch(options)).await {
            Ok(result) => result,
            Err(_) => Err(Error::LaunchTimeout {
                timeout_ms: options.timeout.as_millis() as u64,
            }),
        }
    }

    async fn launch_managed(&self, options: &LaunchOptions) -> Result<BrowserHandle> {
        let deadline = options.timeout + LAUNCH_GRACE;
        match tokio::time::timeout(deadline, self.driver.launch_managed(options)).await {
            Ok(result) => result,
            Err(_) => Err(Error::LaunchTimeout {
                timeout_ms: options.timeout.as_millis() as u64,
            }),
        }
    }

    /// The first attempt tries the managed channel when the driver offers one;
    /// any failure there falls through to a direct launch in the same attempt.
    async fn attempt(&self, attempt: Attempt, options: &LaunchOptions) -> Result<BrowserHandle> {
        info!(
            engine = %options.engine,
            attempt = attempt.number,
            max = attempt.max,
            "Launching browser"
        );
        if attempt.is_first() && self.use_managed_channel && self.driver.supports_managed_channel() {
            match self.launch_managed(options).await {
                Ok(browser) => {
                    info!(id = %browser.id, "Browser launched through managed channel");
                    return Ok(browser);
                }
                Err(e) => warn!("Managed channel launch failed, falling back to direct launch: {}", e),
            }
        }
        let result = self.launch_once(options).await;
        if let Err(e) = &result {
            warn!(attempt = attempt.number, "Browser launch failed: {}", e);
        }
        result
    }

    /// Launch with the retry policy alone; no recovery.
    pub async fn launch_with_retries(&self, options: &LaunchOptions) -> RetryOutcome<BrowserHandle, Error> {
        retry(Attempts::from_policy(&self.policy), move |attempt| self.attempt(attempt, options)).await
    }

    /// Launch with retries; on exhaustion escalate to the launch-timeout
    /// recovery exactly once. A failed recovery yields an error carrying both
    /// the original and the recovery error, plus the recovery outcome itself.
    pub async fn launch(
        &self,
        options: &LaunchOptions,
        dispatcher: &RecoveryDispatcher,
    ) -> std::result::Result<Launched, LaunchFailure> {
        let last_error = match self.launch_with_retries(options).await {
            RetryOutcome::Success { value, attempts } => {
                info!(id = %value.id, attempts, "Browser launched");
                return Ok(Launched {
                    browser: value,
                    attempts,
                    recovery: None,
                });
            }
            RetryOutcome::Exhausted { last_error, attempts } => {
                warn!(attempts, "Browser launch attempts exhausted; escalating to recovery");
                last_error
            }
        };

        let ctx = RecoveryContext::from_error(&last_error, options.timeout).with_launch_options(options.clone());
        let outcome = dispatcher
            .recover(FailureClassification::BrowserLaunchTimeout, &ctx)
            .await;

        let browser = match &outcome.payload {
            RecoveryPayload::Browser(browser) if outcome.is_success() => Some(browser.clone()),
            _ => None,
        };
        match browser {
            Some(browser) => Ok(Launched {
                browser,
                attempts: self.policy.max_retries,
                recovery: Some(outcome),
            }),
            None => Err(LaunchFailure {
                error: Error::LaunchFailed {
                    original: last_error.to_string(),
                    recovery: outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("recovery ended with {:?}", outcome.status)),
                },
                recovery: outcome,
            }),
        }
    }
}
