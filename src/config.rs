//! Run configuration.
//!
//! Everything the pipeline needs is carried in `CaptureConfig`, built once per
//! run from the environment (optionally seeded from a `.env` file) and CLI
//! flags, then passed down explicitly.

use std::{
    env,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::PipelineError;

pub const USERNAME_VAR: &str = "SC_USERNAME";
pub const PASSWORD_VAR: &str = "SC_PASSWORD";
pub const DATA_DIR_VAR: &str = "CHARTGRAB_DATA_DIR";
pub const HEADLESS_VAR: &str = "CHARTGRAB_HEADLESS";
pub const CHROME_VAR: &str = "CHARTGRAB_CHROME";

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_TARGETS_FILE: &str = "urls.txt";

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Both fields must be present and non-blank.
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, PipelineError> {
        let username = username.filter(|value| !value.trim().is_empty());
        let password = password.filter(|value| !value.is_empty());
        match (username, password) {
            (Some(username), Some(password)) => Ok(Self { username, password }),
            _ => Err(PipelineError::Config(format!(
                "{USERNAME_VAR} and {PASSWORD_VAR} must be set"
            ))),
        }
    }
}

/// Empirical waits against the remote site.
///
/// None of these are event-driven guarantees: they are budgets picked from
/// observation of the live site and are the first thing to tune when captures
/// start timing out. Fakes in tests use `Timings::immediate()`.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Pause after the login form settles, letting the session cookie land
    /// before the first chart request.
    pub login_settle: Duration,
    pub login_timeout: Duration,
    /// Budget for a target page to reach DOMContentLoaded, polled through
    /// `document.readyState`. Subresources and network idle are never awaited;
    /// chart pages keep long-polling connections open.
    pub navigation_timeout: Duration,
    pub element_timeout: Duration,
    /// Budget for each metadata field read.
    pub extraction_timeout: Duration,
    pub screenshot_timeout: Duration,
    pub poll_interval: Duration,
    /// Courtesy pause between targets.
    pub between_targets: Duration,
    /// How long the browser gets to exit after a close request before it is
    /// killed.
    pub close_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            login_settle: Duration::from_secs(2),
            login_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(30),
            element_timeout: Duration::from_secs(10),
            extraction_timeout: Duration::from_secs(5),
            screenshot_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            between_targets: Duration::from_secs(1),
            close_timeout: Duration::from_secs(10),
        }
    }
}

impl Timings {
    pub fn immediate() -> Self {
        Self {
            login_settle: Duration::ZERO,
            login_timeout: Duration::from_millis(200),
            navigation_timeout: Duration::from_millis(200),
            element_timeout: Duration::from_millis(200),
            extraction_timeout: Duration::from_millis(100),
            screenshot_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(5),
            between_targets: Duration::ZERO,
            close_timeout: Duration::from_millis(200),
        }
    }
}

/// CSS selectors for the one supported charting site.
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    pub login_url: String,
    pub username_input: String,
    pub password_input: String,
    pub login_submit: String,
    pub chart_image: String,
    pub symbol_input: String,
    pub period_control: String,
    /// Query parameter carrying the ticker in chart URLs.
    pub symbol_query_param: String,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            login_url: "https://stockcharts.com/login".into(),
            username_input: "input#form_UserID".into(),
            password_input: "input#form_UserPassword".into(),
            login_submit: "button.btn-green".into(),
            chart_image: "div#chart-image-and-inspector-container img".into(),
            symbol_input: "input#symbol".into(),
            period_control: "#period-menu-lower".into(),
            symbol_query_param: "s".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub window_size: (u32, u32),
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            window_size: (1600, 1200),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub targets_file: PathBuf,
    pub force: bool,
    pub data_dir: PathBuf,
    pub timings: Timings,
    pub selectors: SiteSelectors,
    pub browser: BrowserOptions,
}

impl CaptureConfig {
    /// Loads `.env` (if present) and reads the environment. CLI flags are
    /// applied on top by the caller.
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("Loaded environment from {}", path.display()),
            Err(err) if err.not_found() => {}
            Err(err) => log::warn!("Ignoring unreadable .env file: {err}"),
        }

        let headless = env::var(HEADLESS_VAR)
            .map(|value| !(value == "0" || value.eq_ignore_ascii_case("false")))
            .unwrap_or(true);

        Self {
            username: env::var(USERNAME_VAR).ok(),
            password: env::var(PASSWORD_VAR).ok(),
            targets_file: PathBuf::from(DEFAULT_TARGETS_FILE),
            force: false,
            data_dir: env::var(DATA_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            timings: Timings::default(),
            selectors: SiteSelectors::default(),
            browser: BrowserOptions {
                headless,
                executable: env::var(CHROME_VAR).ok().map(PathBuf::from),
                ..BrowserOptions::default()
            },
        }
    }

    pub fn credentials(&self) -> Result<Credentials, PipelineError> {
        Credentials::from_parts(self.username.clone(), self.password.clone())
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("charts.db")
    }
}

/// Reads the newline-delimited target list. Blank lines and `#` comments are
/// skipped. A missing file or a list with no targets is a configuration error.
pub fn load_targets(path: &Path) -> Result<Vec<String>, PipelineError> {
    let contents = fs::read_to_string(path).map_err(|err| {
        PipelineError::Config(format!("target list {} unreadable: {err}", path.display()))
    })?;

    let targets: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    if targets.is_empty() {
        return Err(PipelineError::Config(format!(
            "target list {} contains no URLs",
            path.display()
        )));
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn blank_credentials_are_rejected() {
        assert!(Credentials::from_parts(Some("me".into()), Some("pw".into())).is_ok());
        assert!(matches!(
            Credentials::from_parts(Some("  ".into()), Some("pw".into())),
            Err(PipelineError::Config(_))
        ));
        assert!(Credentials::from_parts(Some("me".into()), None).is_err());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::from_parts(Some("me".into()), Some("hunter2".into())).unwrap();
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn target_list_skips_blanks_and_comments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.txt");
        fs::write(
            &path,
            "https://a.example/?s=AAPL\n\n  # disabled\n  https://a.example/?s=MSFT  \n",
        )
        .unwrap();

        let targets = load_targets(&path).unwrap();
        assert_eq!(
            targets,
            vec![
                "https://a.example/?s=AAPL".to_string(),
                "https://a.example/?s=MSFT".to_string()
            ]
        );
    }

    #[test]
    fn missing_or_empty_target_list_is_config_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_targets(&dir.path().join("nope.txt")),
            Err(PipelineError::Config(_))
        ));

        let empty = dir.path().join("empty.txt");
        fs::write(&empty, "\n# nothing\n").unwrap();
        assert!(matches!(load_targets(&empty), Err(PipelineError::Config(_))));
    }
}
