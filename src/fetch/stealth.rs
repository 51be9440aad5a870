use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::config::StealthConfig;
use crate::error::GatewayError;

/// Hooks installed before any page script runs. Hides the automation flags
/// headless Chrome exposes and fakes a populated plugin list.
const EVASION_HOOKS_JS: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', {
    get: () => [
        { name: 'PDF Viewer', filename: 'internal-pdf-viewer' },
        { name: 'Chrome PDF Viewer', filename: 'internal-pdf-viewer' },
        { name: 'Chromium PDF Viewer', filename: 'internal-pdf-viewer' }
    ]
});
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = window.chrome || { runtime: {} };
"#;

/// Fully rendered document captured from the browser.
#[derive(Debug)]
pub struct StealthPage {
    pub html: String,
    pub status: u16,
}

/// Singleton headless-browser fetcher for sites that defeat plain HTTP.
///
/// One browser process serves the whole gateway. Acquisition is a spin-wait:
/// the first caller to flip the launch flag starts the process while everyone
/// else polls until a live handle appears, so at most one launch is ever in
/// flight. Callers never share pages, only the process.
pub struct StealthFetcher {
    browser: Mutex<Option<Browser>>,
    launching: AtomicBool,
    config: StealthConfig,
    user_agent: String,
}

impl StealthFetcher {
    pub fn new(config: &StealthConfig, user_agent: &str) -> Self {
        Self {
            browser: Mutex::new(None),
            launching: AtomicBool::new(false),
            config: config.clone(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Render the target in the shared browser and capture the final DOM.
    ///
    /// Bounded by the stealth timeout; a failure here is non-fatal for the
    /// request since the orchestrator falls back to the direct path.
    pub async fn fetch(self: &Arc<Self>, url: &str) -> crate::error::Result<StealthPage> {
        let this = self.clone();
        let url = url.to_string();
        let task = tokio::task::spawn_blocking(move || this.fetch_blocking(&url));

        match tokio::time::timeout(self.config.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(GatewayError::Stealth(format!(
                "browser task panicked: {join_err}"
            ))),
            Err(_) => Err(GatewayError::Stealth("stealth fetch timed out".into())),
        }
    }

    fn fetch_blocking(&self, url: &str) -> crate::error::Result<StealthPage> {
        let browser = self.acquire()?;
        let tab = browser
            .new_tab()
            .map_err(|e| GatewayError::Stealth(format!("failed to open page: {e}")))?;

        // Capture the result first; the tab is closed no matter what.
        let result = self.drive(&tab, url);
        if let Err(e) = tab.close(true) {
            debug!(error = %e, "failed to close stealth page");
        }
        result
    }

    fn drive(&self, tab: &Arc<Tab>, url: &str) -> crate::error::Result<StealthPage> {
        tab.set_user_agent(&self.user_agent, None, None)
            .map_err(|e| GatewayError::Stealth(format!("set_user_agent: {e}")))?;

        // Must land before the target's own scripts execute.
        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: EVASION_HOOKS_JS.to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })
        .map_err(|e| GatewayError::Stealth(format!("evasion install: {e}")))?;

        tab.navigate_to(url)
            .map_err(|e| GatewayError::Stealth(format!("navigate: {e}")))?;
        tab.wait_until_navigated()
            .map_err(|e| GatewayError::Stealth(format!("navigation wait: {e}")))?;

        // Deferred scripts keep mutating the DOM after network quiescence.
        std::thread::sleep(self.config.settle_delay);

        let html = tab
            .get_content()
            .map_err(|e| GatewayError::Stealth(format!("capture: {e}")))?;

        debug!(url, bytes = html.len(), "stealth capture complete");
        Ok(StealthPage { html, status: 200 })
    }

    /// Get the live browser handle, launching it if needed.
    ///
    /// Poll-and-retry acquisition: adequate for a single-process deployment,
    /// where the invariant is one launch in flight and one process total.
    fn acquire(&self) -> crate::error::Result<Browser> {
        loop {
            {
                let mut slot = self
                    .browser
                    .lock()
                    .map_err(|_| GatewayError::Internal("browser lock poisoned".into()))?;
                if let Some(browser) = slot.as_ref() {
                    if browser.get_version().is_ok() {
                        return Ok(browser.clone());
                    }
                    warn!("stealth browser handle disconnected, relaunching");
                    *slot = None;
                }
            }

            if self
                .launching
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let launched = self.launch();
                self.launching.store(false, Ordering::Release);
                return launched;
            }

            // Another caller is launching; wait for it to finish.
            std::thread::sleep(self.config.launch_poll_interval);
        }
    }

    fn launch(&self) -> crate::error::Result<Browser> {
        info!("launching shared headless browser");
        let browser = Browser::new(LaunchOptions {
            headless: true,
            window_size: Some((self.config.window_width, self.config.window_height)),
            ..Default::default()
        })
        .map_err(|e| GatewayError::Stealth(format!("browser launch: {e}")))?;

        let mut slot = self
            .browser
            .lock()
            .map_err(|_| GatewayError::Internal("browser lock poisoned".into()))?;
        *slot = Some(browser.clone());
        Ok(browser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evasion_hooks_cover_known_automation_probes() {
        assert!(EVASION_HOOKS_JS.contains("webdriver"));
        assert!(EVASION_HOOKS_JS.contains("plugins"));
        assert!(EVASION_HOOKS_JS.contains("languages"));
    }

    #[test]
    fn fetcher_starts_without_browser() {
        let config = StealthConfig {
            timeout: std::time::Duration::from_secs(5),
            settle_delay: std::time::Duration::from_millis(100),
            launch_poll_interval: std::time::Duration::from_millis(50),
            window_width: 1366,
            window_height: 768,
        };
        let fetcher = StealthFetcher::new(&config, "test-ua");
        assert!(fetcher.browser.lock().unwrap().is_none());
        assert!(!fetcher.launching.load(Ordering::Acquire));
    }
}
