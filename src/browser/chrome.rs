use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::page::{CaptureScreenshotFormat, NavigateParams},
    page::Page,
};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::{task::JoinHandle, time};

use crate::{
    config::{BrowserOptions, Credentials, SiteSelectors, Timings},
    error::PipelineError,
};

use super::{ensure_credentials, poll_until, CaptureSession, ChartPage, SessionManager};

/// Set on the outgoing document before a navigation so readiness polls
/// cannot mistake it for the page being loaded.
const OUTGOING_MARKER: &str = "__chartgrabOutgoing";

/// Opens Chromium sessions logged in to the charting site.
pub struct ChromeSessionManager {
    options: BrowserOptions,
    selectors: SiteSelectors,
    timings: Timings,
}

impl ChromeSessionManager {
    pub fn new(options: BrowserOptions, selectors: SiteSelectors, timings: Timings) -> Self {
        Self {
            options,
            selectors,
            timings,
        }
    }

    async fn login(&self, session: &ChromeSession, credentials: &Credentials) -> Result<(), PipelineError> {
        let auth_err = |err: anyhow::Error| PipelineError::Authentication(format!("{err:#}"));
        let timings = &self.timings;

        info!("Logging in at {}", self.selectors.login_url);
        match time::timeout(timings.login_timeout, session.goto(&self.selectors.login_url)).await {
            Ok(result) => result.map_err(auth_err)?,
            Err(_) => {
                return Err(PipelineError::Authentication(format!(
                    "login page did not respond within {:?}",
                    timings.login_timeout
                )))
            }
        }
        if !poll_until(timings.login_timeout, timings.poll_interval, || session.content_loaded()).await {
            return Err(PipelineError::Authentication(format!(
                "login page did not load within {:?}",
                timings.login_timeout
            )));
        }

        session
            .fill(&self.selectors.username_input, &credentials.username)
            .await
            .map_err(auth_err)?;
        session
            .fill(&self.selectors.password_input, &credentials.password)
            .await
            .map_err(auth_err)?;

        session.mark_outgoing().await.map_err(auth_err)?;
        let submit = session
            .page
            .find_element(self.selectors.login_submit.as_str())
            .await
            .context("login button not found")
            .map_err(auth_err)?;
        submit
            .click()
            .await
            .context("failed to submit login form")
            .map_err(auth_err)?;

        if !poll_until(timings.login_timeout, timings.poll_interval, || session.content_loaded()).await {
            return Err(PipelineError::Authentication(format!(
                "login did not settle within {:?}",
                timings.login_timeout
            )));
        }

        // The session cookie lands asynchronously after the post-login load.
        time::sleep(timings.login_settle).await;
        info!("Login submitted; session ready");
        Ok(())
    }
}

#[async_trait(?Send)]
impl SessionManager for ChromeSessionManager {
    type Session = ChromeSession;

    async fn open(&self, credentials: &Credentials) -> Result<ChromeSession, PipelineError> {
        ensure_credentials(credentials)?;

        let mut session = ChromeSession::launch(&self.options, &self.timings)
            .await
            .map_err(PipelineError::Browser)?;

        if let Err(err) = self.login(&session, credentials).await {
            session.close().await;
            return Err(err);
        }

        Ok(session)
    }
}

/// A running Chromium instance with one tab.
///
/// `close` shuts the browser down and reaps the process, killing it if it
/// does not exit within `close_timeout`. If a session is dropped without
/// being closed, the CDP handler task is aborted and chromiumoxide kills the
/// child process from `Browser`'s own `Drop`.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler: Option<JoinHandle<()>>,
    close_timeout: Duration,
    closed: bool,
}

impl ChromeSession {
    async fn launch(options: &BrowserOptions, timings: &Timings) -> Result<Self> {
        let (width, height) = options.window_size;
        let mut builder = BrowserConfig::builder().window_size(width, height);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &options.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder
            .build()
            .map_err(|err| anyhow!("invalid browser configuration: {err}"))?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!("CDP handler error: {err}");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                shut_down(&mut browser, timings.close_timeout).await;
                handler.abort();
                return Err(anyhow!(err).context("failed to open browser tab"));
            }
        };

        info!("Browser launched");
        Ok(Self {
            browser,
            page,
            handler: Some(handler),
            close_timeout: timings.close_timeout,
            closed: false,
        })
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("field `{selector}` not found"))?;
        element.click().await?;
        element.type_str(value).await?;
        Ok(())
    }

    async fn mark_outgoing(&self) -> Result<()> {
        self.page
            .evaluate(format!("window.{OUTGOING_MARKER} = true"))
            .await
            .context("failed to mark current document")?;
        Ok(())
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T> {
        let result = self.page.evaluate(script).await?;
        Ok(result.into_value::<T>()?)
    }
}

fn js_string(value: &str) -> Result<String> {
    serde_json::to_string(value).context("failed to encode selector")
}

fn content_loaded_script() -> String {
    format!("window.{OUTGOING_MARKER} !== true && document.readyState !== 'loading'")
}

fn element_ready_script(selector: &str) -> Result<String> {
    let sel = js_string(selector)?;
    Ok(format!(
        "(() => {{ \
           const el = document.querySelector({sel}); \
           if (!el) return false; \
           const box = el.getBoundingClientRect(); \
           if (box.width === 0 || box.height === 0) return false; \
           if (el.tagName === 'IMG') return el.complete && el.naturalWidth > 0; \
           return true; \
         }})()"
    ))
}

#[async_trait(?Send)]
impl ChartPage for ChromeSession {
    async fn goto(&self, url: &str) -> Result<()> {
        self.mark_outgoing().await?;
        let response = self
            .page
            .execute(NavigateParams::new(url))
            .await
            .with_context(|| format!("failed to navigate to {url}"))?;
        if let Some(error) = response.result.error_text.as_deref() {
            bail!("navigation to {url} failed: {error}");
        }
        Ok(())
    }

    async fn content_loaded(&self) -> Result<bool> {
        self.evaluate(content_loaded_script()).await
    }

    async fn element_ready(&self, selector: &str) -> Result<bool> {
        self.evaluate(element_ready_script(selector)?).await
    }

    async fn input_value(&self, selector: &str) -> Result<Option<String>> {
        let sel = js_string(selector)?;
        // Primitive return keeps the value out of CDP's remote-object path;
        // an empty string stands in for "missing".
        let value: String = self
            .evaluate(format!(
                "(() => {{ const el = document.querySelector({sel}); \
                 return el && typeof el.value === 'string' ? el.value : ''; }})()"
            ))
            .await?;
        let value = value.trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("element `{selector}` disappeared before capture"))?;
        let png = element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .context("element screenshot failed")?;
        Ok(png)
    }
}

#[async_trait(?Send)]
impl CaptureSession for ChromeSession {
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        match shut_down(&mut self.browser, self.close_timeout).await {
            Shutdown::Graceful => info!("Browser session closed"),
            Shutdown::Killed => warn!("Browser session killed"),
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        if !self.closed {
            warn!("Browser session dropped without close; killing browser");
        }
    }
}

/// Process-level controls `shut_down` needs from a browser.
#[async_trait(?Send)]
trait BrowserProcess {
    async fn request_close(&mut self) -> Result<()>;
    async fn wait_exit(&mut self) -> Result<()>;
    async fn force_kill(&mut self) -> Result<()>;
}

#[async_trait(?Send)]
impl BrowserProcess for Browser {
    async fn request_close(&mut self) -> Result<()> {
        self.close().await?;
        Ok(())
    }

    async fn wait_exit(&mut self) -> Result<()> {
        self.wait().await?;
        Ok(())
    }

    async fn force_kill(&mut self) -> Result<()> {
        match self.kill().await {
            Some(result) => result.context("kill failed"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Shutdown {
    Graceful,
    Killed,
}

/// Asks the browser to close and waits for it to exit, both within `grace`.
/// Falls back to killing the process on any failure or timeout.
async fn shut_down<B: BrowserProcess + ?Sized>(browser: &mut B, grace: Duration) -> Shutdown {
    let close_sent = match time::timeout(grace, browser.request_close()).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!("Browser close command failed: {err:#}");
            false
        }
        Err(_) => {
            warn!("Browser close command timed out after {grace:?}");
            false
        }
    };

    if close_sent {
        match time::timeout(grace, browser.wait_exit()).await {
            Ok(Ok(())) => return Shutdown::Graceful,
            Ok(Err(err)) => warn!("Failed to reap browser process: {err:#}"),
            Err(_) => warn!("Browser still running {grace:?} after close"),
        }
    }

    if let Err(err) = browser.force_kill().await {
        warn!("Failed to kill browser process: {err:#}");
    }
    Shutdown::Killed
}
