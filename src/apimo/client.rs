// client.rs
use crate::apimo::{ListingPage, TransportError};
use crate::config::{ApiConfig, Credentials};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("listing_sync/", env!("CARGO_PKG_VERSION"));

/// One fetched page plus whether the remote has more after it.
#[derive(Debug, Default)]
pub struct FetchedPage {
    pub page: ListingPage,
    pub has_more: bool,
}

/// Anything the sync driver can page through.
pub trait ListingSource {
    fn fetch_page(&self, offset: usize, limit: usize) -> Result<FetchedPage, TransportError>;
}

pub struct ApimoClient {
    client: Client,
    endpoint: String,
    credentials: Credentials,
}

impl ApimoClient {
    pub fn new(api: &ApiConfig, credentials: Credentials) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if api.accept_invalid_certs {
            warn!("TLS certificate verification is disabled for the listings API");
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(api.request_timeout)
            .danger_accept_invalid_certs(api.accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let endpoint = format!(
            "{}/agencies/{}/properties",
            api.base_url.trim_end_matches('/'),
            credentials.agency
        );

        Ok(Self {
            client,
            endpoint,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ListingSource for ApimoClient {
    fn fetch_page(&self, offset: usize, limit: usize) -> Result<FetchedPage, TransportError> {
        debug!(offset, limit, endpoint = %self.endpoint, "fetching listings page");

        let resp = self
            .client
            .get(&self.endpoint)
            .basic_auth(&self.credentials.provider, Some(&self.credentials.token))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let page: ListingPage =
            serde_json::from_str(&text).map_err(|e| TransportError::JsonParse(e.to_string()))?;
        let has_more = has_more(offset, limit, &page);

        Ok(FetchedPage { page, has_more })
    }
}

/// Prefers the server's `total_items`; falls back to "a full page means more".
pub fn has_more(offset: usize, limit: usize, page: &ListingPage) -> bool {
    let len = page.properties.len();
    if len == 0 {
        return false;
    }
    match page.total_items {
        Some(total) => ((offset + len) as u64) < total,
        None => len >= limit,
    }
}
