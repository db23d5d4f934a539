//! Failure classification
//!
//! A pure, order-sensitive match over an error's rendered message. The rule
//! table is evaluated top to bottom and the first matching rule wins, so a
//! message mentioning both a browser timeout and navigation is always a
//! launch timeout.

use autoheal_common::{Error, FailureClassification};

/// One row of the classification table: every keyword must appear in the
/// lowercased message.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub all_of: &'static [&'static str],
    pub classification: FailureClassification,
}

impl Rule {
    pub fn matches(&self, message: &str) -> bool {
        self.all_of.iter().all(|keyword| message.contains(keyword))
    }
}

pub const RULES: &[Rule] = &[
    Rule {
        all_of: &["timeout", "browser"],
        classification: FailureClassification::BrowserLaunchTimeout,
    },
    Rule {
        all_of: &["timeout", "navigation"],
        classification: FailureClassification::PageNavigationTimeout,
    },
    Rule {
        all_of: &["element", "not found"],
        classification: FailureClassification::ElementNotFound,
    },
    Rule {
        all_of: &["screenshot"],
        classification: FailureClassification::ScreenshotFailure,
    },
    Rule {
        all_of: &["crash"],
        classification: FailureClassification::BrowserCrash,
    },
];

/// Classify a raw error message.
pub fn classify_message(message: &str) -> FailureClassification {
    let message = message.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(&message))
        .map(|rule| rule.classification)
        .unwrap_or(FailureClassification::Unknown)
}

/// Classify an error. Typed transient variants map by kind, since their
/// rendered text embeds URLs and raw driver output; every other variant goes
/// through the message table.
pub fn classify(error: &Error) -> FailureClassification {
    match error {
        Error::LaunchTimeout { .. } => FailureClassification::BrowserLaunchTimeout,
        Error::NavigationTimeout { .. } => FailureClassification::PageNavigationTimeout,
        Error::ElementNotFound { .. } => FailureClassification::ElementNotFound,
        Error::Screenshot(_) => FailureClassification::ScreenshotFailure,
        Error::BrowserCrashed(_) => FailureClassification::BrowserCrash,
        other => classify_message(&other.to_string()),
    }
}
