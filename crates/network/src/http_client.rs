use std::time::Duration;

use reqwest::{Client, Proxy, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{Result, TrowserError};
use crate::port::ProxyEndpoint;
use crate::proxy_settings::ProxySettings;

pub const TOR_CHECK_API: &str = "https://check.torproject.org/api/ip";

/// Response of the Tor Project's exit check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TorCheck {
    #[serde(rename = "IsTor")]
    pub is_tor: bool,
    #[serde(rename = "IP")]
    pub ip: String,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub status: u16,
    pub title: Option<String>,
    pub bytes: usize,
}

/// HTTP client whose every request goes through the local SOCKS endpoint.
pub struct TorHttpClient {
    client: Client,
    endpoint: ProxyEndpoint,
}

impl TorHttpClient {
    pub fn new(endpoint: &ProxyEndpoint, config: &Config) -> Result<Self> {
        let proxy = Proxy::all(endpoint.socks_url())
            .map_err(|e| TrowserError::Config(format!("Invalid proxy URL: {}", e)))?;

        let mut builder = Client::builder()
            .proxy(proxy)
            .timeout(Duration::from_secs(config.timeout_secs));

        if !config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| TrowserError::Config(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.clone(),
        })
    }

    /// Client for whatever proxy the process has been configured with.
    pub fn from_settings(settings: &ProxySettings, config: &Config) -> Result<Self> {
        let endpoint = settings.endpoint().ok_or(TrowserError::ProxyNotConfigured)?;
        Self::new(&endpoint, config)
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| TrowserError::Http(format!("GET request failed: {}", e)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        response
            .json()
            .await
            .map_err(|e| TrowserError::Http(format!("JSON parse failed: {}", e)))
    }

    /// Load a page the way a tab would and summarize it.
    pub async fn fetch_page(&self, url: &str) -> Result<Page> {
        let response = self.get(url).await?;
        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TrowserError::Http(format!("Failed to read body: {}", e)))?;

        Ok(Page {
            url: final_url,
            status,
            title: page_title(&body),
            bytes: body.len(),
        })
    }

    pub async fn check_tor(&self) -> Result<TorCheck> {
        self.get_json(TOR_CHECK_API).await
    }

    /// Fails with [`TrowserError::TorNotAvailable`] when traffic does not exit
    /// through Tor.
    pub async fn verify_tor_connection(&self) -> Result<TorCheck> {
        require_tor(self.check_tor().await?)
    }

    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }
}

fn require_tor(check: TorCheck) -> Result<TorCheck> {
    if check.is_tor {
        Ok(check)
    } else {
        Err(TrowserError::TorNotAvailable)
    }
}

/// Contents of the first `<title>` element, whitespace collapsed.
pub fn page_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;

    let title = html[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}
