//! Scenario registry and the built-in scenarios
//!
//! Scenarios are looked up by name in a [`ScenarioRegistry`]. The whole
//! requested list is resolved before any browser work, so an unknown name
//! fails the run immediately.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use autoheal_common::{Error, PageHandle, Result};
use tracing::debug;

use crate::config::Timeouts;
use crate::driver::{BrowserDriver, LoadState, ScreenshotOptions};

/// Everything a scenario body may touch
pub struct ScenarioContext<'a> {
    pub driver: &'a dyn BrowserDriver,
    pub page: &'a PageHandle,
    pub target_url: &'a str,
    pub timeouts: &'a Timeouts,
}

impl ScenarioContext<'_> {
    /// `path` joined onto the target URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.target_url.trim_end_matches('/');
        if path.is_empty() || path == "/" {
            return base.to_string();
        }
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    pub async fn goto(&self, path: &str) -> Result<()> {
        let url = self.url(path);
        debug!(url = %url, "Navigating");
        self.driver.navigate(self.page, &url, self.timeouts.navigation()).await
    }

    pub async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.driver
            .fill(self.page, selector, value, self.timeouts.selector())
            .await
    }

    pub async fn click(&self, selector: &str) -> Result<()> {
        self.driver.click(self.page, selector, self.timeouts.selector()).await
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        self.driver
            .screenshot(self.page, &ScreenshotOptions::viewport(self.timeouts.screenshot()))
            .await
    }
}

/// Steps a passing scenario went through
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioOutcome {
    pub steps: Vec<String>,
}

impl ScenarioOutcome {
    pub fn step(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }
}

#[async_trait]
pub trait Scenario: Send + Sync {
    async fn run(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome>;
}

#[derive(Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: HashMap<String, Arc<dyn Scenario>>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `login`, `navigation` and `forms`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("login", Arc::new(LoginScenario::default()));
        registry.register("navigation", Arc::new(NavigationScenario));
        registry.register("forms", Arc::new(FormsScenario));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, scenario: Arc<dyn Scenario>) {
        self.scenarios.insert(name.into(), scenario);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.scenarios.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Scenario>> {
        self.scenarios.get(name).cloned()
    }

    /// Resolve every requested name, failing on the first unknown one.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<(String, Arc<dyn Scenario>)>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .map(|scenario| (name.clone(), scenario))
                    .ok_or_else(|| Error::UnknownScenario(name.clone()))
            })
            .collect()
    }
}

/// Submits the login form with test credentials.
#[derive(Debug, Clone)]
pub struct LoginScenario {
    pub email: String,
    pub password: String,
}

impl Default for LoginScenario {
    fn default() -> Self {
        Self {
            email: "test@example.com".to_string(),
            password: "password123".to_string(),
        }
    }
}

#[async_trait]
impl Scenario for LoginScenario {
    async fn run(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome> {
        let mut outcome = ScenarioOutcome::default();
        ctx.goto("/login").await?;
        outcome.step("navigate:/login");
        ctx.fill("#email", &self.email).await?;
        ctx.fill("#password", &self.password).await?;
        outcome.step("fill:credentials");
        ctx.click("button[type=\"submit\"]").await?;
        outcome.step("click:submit");
        ctx.driver
            .wait_for_load_state(ctx.page, LoadState::NetworkIdle, ctx.timeouts.navigation())
            .await?;
        ctx.screenshot().await?;
        outcome.step("screenshot");
        Ok(outcome)
    }
}

/// Checks the landing page exposes navigation links and follows the first one.
#[derive(Debug, Clone, Copy)]
pub struct NavigationScenario;

#[async_trait]
impl Scenario for NavigationScenario {
    async fn run(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome> {
        let mut outcome = ScenarioOutcome::default();
        ctx.goto("/").await?;
        outcome.step("navigate:/");

        let links = ctx.driver.count(ctx.page, "nav a").await?;
        if links == 0 {
            return Err(Error::Assertion("no navigation links found under <nav>".into()));
        }
        outcome.step(format!("links:{}", links));

        ctx.click("nav a").await?;
        ctx.driver
            .wait_for_load_state(ctx.page, LoadState::DomContentLoaded, ctx.timeouts.navigation())
            .await?;
        let url = ctx.driver.current_url(ctx.page).await?;
        outcome.step(format!("followed:{}", url));
        Ok(outcome)
    }
}

/// Fills every text input of the first form and submits it.
#[derive(Debug, Clone, Copy)]
pub struct FormsScenario;

#[async_trait]
impl Scenario for FormsScenario {
    async fn run(&self, ctx: &ScenarioContext<'_>) -> Result<ScenarioOutcome> {
        let mut outcome = ScenarioOutcome::default();
        ctx.goto("/").await?;
        outcome.step("navigate:/");

        if ctx.driver.count(ctx.page, "form").await? == 0 {
            return Err(Error::Assertion("no <form> element on the page".into()));
        }
        let inputs = ctx.driver.count(ctx.page, "form input[type=\"text\"]").await?;
        for index in 1..=inputs {
            let selector = format!("form input[type=\"text\"] >> nth={}", index - 1);
            ctx.fill(&selector, &format!("autoheal-{}", index)).await?;
        }
        outcome.step(format!("filled:{}", inputs));

        ctx.click("form [type=\"submit\"]").await?;
        outcome.step("click:submit");
        ctx.screenshot().await?;
        outcome.step("screenshot");
        Ok(outcome)
    }
}
