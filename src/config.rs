use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Rendered DOM from a Browserless `/content` endpoint.
    Browserless,
    /// Plain GET, no script execution.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub base_url: String,
    pub renderer: RendererKind,
    pub browserless_url: String,
    #[serde(default)]
    pub browserless_token: Option<String>,
    pub first_page: u32,
    pub last_page: u32,
    pub ready_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Settings {
    /// Defaults, then `joblist.toml` (optional), then `JOBLIST_*` env vars.
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .set_default("db_path", "data/jobs.sqlite")?
            .set_default("base_url", "https://www.actuarylist.com")?
            .set_default("renderer", "browserless")?
            .set_default("browserless_url", "http://localhost:3000")?
            .set_default("first_page", 1)?
            .set_default("last_page", 5)?
            .set_default("ready_timeout_ms", 10_000)?
            .set_default("poll_interval_ms", 500)?
            .add_source(File::with_name("joblist").required(false))
            .add_source(Environment::with_prefix("JOBLIST"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn page_url(&self, page: u32) -> String {
        format!("{}?page={}", self.base_url.trim_end_matches('/'), page)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
impl Settings {
    /// Settings for tests: no readiness wait, in-memory friendly paths.
    pub fn for_tests() -> Self {
        Settings {
            db_path: PathBuf::from(":memory:"),
            base_url: "https://jobs.test".to_string(),
            renderer: RendererKind::Http,
            browserless_url: "http://localhost:3000".to_string(),
            browserless_token: None,
            first_page: 1,
            last_page: 5,
            ready_timeout_ms: 0,
            poll_interval_ms: 0,
        }
    }
}
