//! autoheal orchestrator
//!
//! Drives a headless-browser engine through end-to-end scenarios while
//! tolerating its instability: slow or hanging installs, launch timeouts,
//! mid-run crashes, flaky selectors and failed screenshots.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      OrchestratorRun                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  EnvironmentValidator ──(unusable)──> SafeInstaller          │
//! │        │                                                     │
//! │  LaunchController (retry + backoff) ──(exhausted)──┐         │
//! │        │                                           v         │
//! │  per-scenario attempt loop ──(failure)──> classify │         │
//! │        │                                     │     │         │
//! │        │                          RecoveryDispatcher         │
//! │        v                                                     │
//! │  ReportBuilder ──> RunReport                                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserDriver (PlaywrightDriver)   HostOps (SystemHost)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod classify;
pub mod config;
pub mod crash;
pub mod driver;
pub mod host;
pub mod installer;
pub mod launcher;
pub mod playwright;
pub mod recovery;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod selector;
pub mod session;
pub mod validator;

pub use classify::{classify, classify_message};
pub use config::{OrchestratorConfig, Timeouts};
pub use driver::{BrowserDriver, LaunchOptions, LaunchOverrides};
pub use host::{HostOps, SystemHost};
pub use installer::SafeInstaller;
pub use launcher::{LaunchController, LaunchFailure, Launched};
pub use playwright::{PlaywrightConfig, PlaywrightDriver};
pub use recovery::{RecoveryDispatcher, RecoveryOutcome, RecoveryPayload, RecoveryStatus};
pub use report::{write_report, ReportBuilder};
pub use runner::OrchestratorRun;
pub use scenario::{Scenario, ScenarioContext, ScenarioOutcome, ScenarioRegistry};
pub use validator::EnvironmentValidator;
