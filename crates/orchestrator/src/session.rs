//! Exclusive ownership of the run's single browser handle

use std::sync::Arc;

use autoheal_common::{BrowserHandle, Error, PageHandle, Result};
use tracing::{debug, info, warn};

use crate::driver::BrowserDriver;

/// Holds at most one live browser. `close` is idempotent and a no-op when
/// nothing was ever attached.
pub struct BrowserSession {
    driver: Arc<dyn BrowserDriver>,
    browser: Option<BrowserHandle>,
}

impl BrowserSession {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self { driver, browser: None }
    }

    pub fn browser(&self) -> Option<&BrowserHandle> {
        self.browser.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.browser.is_some()
    }

    pub fn attach(&mut self, browser: BrowserHandle) {
        debug!(id = %browser.id, "Browser attached to session");
        self.browser = Some(browser);
    }

    /// Swap in a browser produced by recovery. The previous one is closed
    /// best-effort; it is usually already dead.
    pub async fn replace(&mut self, browser: BrowserHandle) {
        if let Some(old) = self.browser.take() {
            if old.id != browser.id {
                if let Err(e) = self.driver.close(&old).await {
                    debug!(id = %old.id, "Closing replaced browser failed: {}", e);
                }
            }
        }
        info!(id = %browser.id, "Browser replaced after recovery");
        self.browser = Some(browser);
    }

    pub async fn new_page(&self) -> Result<PageHandle> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| Error::Internal("no browser attached to session".into()))?;
        self.driver.new_page(browser).await
    }

    /// Release the browser. Returns whether a close call was made.
    pub async fn close(&mut self) -> bool {
        let Some(browser) = self.browser.take() else {
            return false;
        };
        match self.driver.close(&browser).await {
            Ok(()) => info!(id = %browser.id, "Browser closed"),
            Err(e) => warn!(id = %browser.id, "Browser close failed: {}", e),
        }
        true
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(browser) = &self.browser {
            warn!(id = %browser.id, "Browser session dropped without close");
        }
    }
}
