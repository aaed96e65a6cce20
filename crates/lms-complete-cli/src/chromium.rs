//! Live course pages through a headless Chromium.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;

use lms_complete::host::script::{ScriptContext, ScriptEngine};
use lms_complete::host::ContextHandle;
use lms_complete::HostError;

use crate::config::find_chromium;

/// A launched browser with one course page open.
pub struct ChromiumSession {
    // Dropping the browser closes the page.
    _browser: Browser,
    page: Page,
}

impl ChromiumSession {
    /// Launch Chromium and navigate to `url`.
    pub async fn launch(url: &str, navigation_timeout: Duration) -> Result<Self> {
        let chrome_path = find_chromium().with_context(|| {
            format!(
                "Chromium not found; set {} or install google-chrome",
                crate::config::CHROMIUM_ENV
            )
        })?;
        tracing::info!(path = %chrome_path.display(), "launching chromium");

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = tokio::time::timeout(navigation_timeout, browser.new_page(url))
            .await
            .with_context(|| format!("navigation to {url} timed out"))?
            .with_context(|| format!("failed to open {url}"))?;
        navigation_settled(url, page.wait_for_navigation().await);

        Ok(Self {
            _browser: browser,
            page,
        })
    }

    /// Attach the library's script host to the page's top window.
    pub async fn context(&self) -> Result<ContextHandle> {
        let engine: Arc<dyn ScriptEngine> = Arc::new(PageEngine {
            page: self.page.clone(),
        });
        Ok(ScriptContext::attach(engine).await?)
    }
}

/// Log a navigation wait that failed; the page may still be usable.
fn navigation_settled<T, E: std::fmt::Display>(url: &str, outcome: Result<T, E>) -> bool {
    match outcome {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!("navigation to {url} did not settle: {e}");
            false
        }
    }
}

struct PageEngine {
    page: Page,
}

#[async_trait]
impl ScriptEngine for PageEngine {
    async fn execute_js(&self, script: &str) -> Result<Value, HostError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(HostError::Unavailable)?;

        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| HostError::Thrown(e.to_string()))?;

        result
            .into_value::<Value>()
            .map_err(|e| HostError::Unavailable(format!("failed to convert JS result: {e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_failure_is_reported() {
        assert!(navigation_settled::<(), &str>("https://lms.example/", Ok(())));
        assert!(!navigation_settled::<(), &str>(
            "https://lms.example/",
            Err("net::ERR_CONNECTION_REFUSED")
        ));
    }
}
