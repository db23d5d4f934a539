//! Backoff and classification properties

use std::time::Duration;

use autoheal_common::{Error, FailureClassification, RetryPolicy};
use autoheal_orchestrator::classify::{classify, classify_message, RULES};
use autoheal_orchestrator::retry::{Attempts, Backoff};
use test_case::test_case;

#[test]
fn test_backoff_matches_closed_form() {
    let policies = [
        RetryPolicy::default(),
        RetryPolicy::new(5, Duration::from_millis(250), Duration::from_secs(60), 1.5).unwrap(),
        RetryPolicy::new(5, Duration::from_millis(10), Duration::from_millis(10), 3.0).unwrap(),
    ];
    for policy in policies {
        let mut previous = Duration::ZERO;
        for n in 1..=64u32 {
            let expected = (policy.base_delay_ms as f64 * policy.backoff_multiplier.powi(n as i32 - 1))
                .min(policy.max_delay_ms as f64) as u64;
            let delay = Backoff::Exponential(policy).delay_after(n);
            assert_eq!(delay, Duration::from_millis(expected), "n = {}", n);
            assert!(delay >= previous);
            previous = delay;
        }
    }
}

#[test]
fn test_policy_schedule_has_max_retries_attempts() {
    let policy = RetryPolicy::default();
    let attempts: Vec<_> = Attempts::from_policy(&policy).collect();
    assert_eq!(attempts.len(), policy.max_retries as usize);
    assert!(attempts.last().unwrap().is_last());
    let delays: Vec<Duration> = attempts.iter().map(|a| a.delay()).collect();
    assert_eq!(
        delays,
        vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
    );
}

#[test_case("Browser launch timeout after 30000 ms", FailureClassification::BrowserLaunchTimeout)]
#[test_case("browser timeout during navigation to /login", FailureClassification::BrowserLaunchTimeout ; "browser timeout wins over navigation")]
#[test_case("Navigation timeout of 30000 ms exceeded", FailureClassification::PageNavigationTimeout)]
#[test_case("Element not found: #email", FailureClassification::ElementNotFound)]
#[test_case("selector #email not found", FailureClassification::Unknown ; "not found alone is not an element failure")]
#[test_case("Screenshot capture failed: too large", FailureClassification::ScreenshotFailure)]
#[test_case("Browser crash: Target closed", FailureClassification::BrowserCrash)]
#[test_case("page crashed while screenshot pending", FailureClassification::ScreenshotFailure ; "screenshot before crash")]
#[test_case("something odd", FailureClassification::Unknown)]
fn test_classification(message: &str, expected: FailureClassification) {
    assert_eq!(classify_message(message), expected);
    // Deterministic and case-insensitive.
    assert_eq!(classify_message(message), classify_message(&message.to_uppercase()));
}

#[test]
fn test_rule_order_is_fixed() {
    let order: Vec<FailureClassification> = RULES.iter().map(|r| r.classification).collect();
    assert_eq!(
        order,
        vec![
            FailureClassification::BrowserLaunchTimeout,
            FailureClassification::PageNavigationTimeout,
            FailureClassification::ElementNotFound,
            FailureClassification::ScreenshotFailure,
            FailureClassification::BrowserCrash,
        ]
    );
}

#[test]
fn test_typed_errors_classify_as_their_kind() {
    assert_eq!(
        classify(&Error::LaunchTimeout { timeout_ms: 1 }),
        FailureClassification::BrowserLaunchTimeout
    );
    assert_eq!(
        classify(&Error::NavigationTimeout {
            url: "http://localhost:5173/browser-settings".into(),
            timeout_ms: 1,
        }),
        FailureClassification::PageNavigationTimeout,
        "the target URL must not steer the classification"
    );
    assert_eq!(
        classify(&Error::BrowserCrashed("Target closed; Timeout 30000ms exceeded".into())),
        FailureClassification::BrowserCrash,
        "raw driver text must not steer the classification"
    );
    assert_eq!(
        classify(&Error::Timeout("scenario login exceeded 120000 ms".into())),
        FailureClassification::Unknown
    );
    assert_eq!(
        classify(&Error::ElementNotFound {
            selector: "#x".into(),
            waited_ms: 1,
        }),
        FailureClassification::ElementNotFound
    );
    assert_eq!(classify(&Error::BrowserCrashed("gone".into())), FailureClassification::BrowserCrash);
    assert_eq!(classify(&Error::Assertion("x".into())), FailureClassification::Unknown);
}
