//! # Tank Data Sources
//!
//! The core never talks to the network. It consumes [`TankRecord`]s from a
//! [`TankSource`], which is responsible for authentication and transport and
//! for translating every failure into a [`SensitError`] kind:
//!
//! - **`FileSource`**: a JSON export on disk (development, offline replays)
//! - **`HttpSource`**: a JSON endpoint behind HTTP basic auth, e.g. a bridge in
//!   front of the vendor's cloud service
//!
//! Both return the same JSON shape, an array of records:
//!
//! ```json
//! [{
//!   "level": 1000.0, "serial_number": "20001234", "model": "Acme Tank",
//!   "name": "My Tank", "capacity": 2000.0, "last_read": "2024-03-20T00:30:00",
//!   "history": [{ "reading_date": "2024-03-19T00:30:00", "level_litres": 1100.0 }]
//! }]
//! ```
//!
//! The overall poll timeout is applied by the coordinator around the whole
//! fetch, not here.

use crate::{SensitError, TankRecord};
use reqwest::StatusCode;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

/// Something that can log in and list the account's tanks.
pub trait TankSource {
    /// Human readable account identity, used in log lines
    fn account(&self) -> &str;

    /// Verify credentials without fetching tank data.
    fn login(&self) -> impl Future<Output = Result<(), SensitError>> + Send;

    /// Log in and fetch every tank on the account.
    fn fetch_tanks(&self) -> impl Future<Output = Result<Vec<TankRecord>, SensitError>> + Send;
}

/// Reads tank records from a JSON file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }
}

impl TankSource for FileSource {
    fn account(&self) -> &str {
        self.path.to_str().unwrap_or("<file>")
    }

    async fn login(&self) -> Result<(), SensitError> {
        fs::metadata(&self.path)?;
        Ok(())
    }

    async fn fetch_tanks(&self) -> Result<Vec<TankRecord>, SensitError> {
        let data = fs::read(&self.path)?;
        let records = serde_json::from_slice(&data)?;
        Ok(records)
    }
}

/// Fetches tank records from an HTTP endpoint with basic auth.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SensitError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SensitError::Configuration(format!("HTTP client: {e}")))?;

        Ok(HttpSource {
            client,
            url: url.into(),
            username: username.into(),
            password: password.into(),
            timeout,
        })
    }

    async fn get(&self) -> Result<reqwest::Response, SensitError> {
        tracing::debug!(url = %self.url, username = %self.username, "Fetching tank data");
        let response = self
            .client
            .get(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        match status_error(response.status()) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    fn classify(&self, e: reqwest::Error) -> SensitError {
        if e.is_timeout() {
            SensitError::Timeout(self.timeout)
        } else if e.is_decode() {
            SensitError::Data(e.to_string())
        } else {
            SensitError::Unhandled(e.to_string())
        }
    }
}

impl TankSource for HttpSource {
    fn account(&self) -> &str {
        &self.username
    }

    async fn login(&self) -> Result<(), SensitError> {
        self.get().await.map(|_| ())
    }

    async fn fetch_tanks(&self) -> Result<Vec<TankRecord>, SensitError> {
        let response = self.get().await?;
        response
            .json::<Vec<TankRecord>>()
            .await
            .map_err(|e| self.classify(e))
    }
}

/// Map an HTTP status to an error kind, `None` for success.
fn status_error(status: StatusCode) -> Option<SensitError> {
    if status.is_success() {
        None
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(SensitError::Auth(format!("server answered {status}")))
    } else {
        Some(SensitError::Unhandled(format!("server answered {status}")))
    }
}
