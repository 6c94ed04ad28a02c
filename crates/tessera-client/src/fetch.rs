//! Frame bitmap download

use reqwest::StatusCode;
use std::time::Duration;
use tessera_canvas::Bitmap;
use tessera_core::{BitmapFetcher, FetchError};

/// [`BitmapFetcher`] over plain HTTP GET
#[derive(Debug, Clone)]
pub struct HttpBitmapFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpBitmapFetcher {
    /// Create with a shared HTTP client; each download gives up after `timeout`
    #[must_use]
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.http.get(url).timeout(self.timeout)
    }
}

#[async_trait::async_trait]
impl BitmapFetcher for HttpBitmapFetcher {
    async fn fetch(&self, url: &str) -> Result<Bitmap, FetchError> {
        let failed = |reason: String| FetchError::Transport {
            url: url.to_string(),
            reason,
        };

        let response = self
            .request(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(failed(format!("status {}", response.status())));
        }
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

        // PNG decoding of a full canvas is CPU-bound
        let decoded = tokio::task::spawn_blocking(move || Bitmap::decode(&bytes))
            .await
            .map_err(|e| failed(e.to_string()))?;
        decoded.map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }
}
