pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Chromium launch flags forwarded with every request.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchOptions {
    pub headless: bool,
    pub args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            args: vec!["--disable-blink-features=AutomationControlled".to_string()],
        }
    }
}

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    launch: LaunchOptions,
}

impl BrowserlessClient {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        launch: LaunchOptions,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrowserlessError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            launch,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn query(&self) -> Result<Vec<(&'static str, String)>> {
        let mut query = Vec::with_capacity(2);
        if let Some(ref token) = self.token {
            query.push(("token", token.clone()));
        }
        let launch = serde_json::to_string(&self.launch)
            .map_err(|e| BrowserlessError::Decode(e.to_string()))?;
        query.push(("launch", launch));
        Ok(query)
    }

    /// Run a puppeteer module through the /function endpoint.
    ///
    /// `code` must `export default async function ({ page, context })` and
    /// return `{ data, type: "application/json" }`; `data` is decoded as `T`.
    pub async fn function<C, T>(&self, code: &str, context: &C) -> Result<T>
    where
        C: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::json!({ "code": code, "context": context });

        tracing::debug!(endpoint = "function", "Running browser function");

        let resp = self
            .client
            .post(self.endpoint("function"))
            .query(&self.query()?)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| BrowserlessError::Decode(e.to_string()))
    }
}
