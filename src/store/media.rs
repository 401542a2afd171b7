use crate::errors::StoreError;
use reqwest::blocking::Client;
use std::time::Duration;

/// Fetches image bytes for upload into the media library.
pub trait MediaDownloader {
    fn download(&self, url: &str) -> Result<Vec<u8>, StoreError>;
}

pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Io(format!("media client setup failed: {e}")))?;
        Ok(Self { client })
    }
}

impl MediaDownloader for HttpDownloader {
    fn download(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let failed = |message: String| StoreError::Download {
            url: url.to_string(),
            message,
        };

        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| failed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {status}")));
        }

        let bytes = resp.bytes().map_err(|e| failed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(failed("empty body".to_string()));
        }
        Ok(bytes.to_vec())
    }
}
