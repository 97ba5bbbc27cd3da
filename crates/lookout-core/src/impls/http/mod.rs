//! HTTP adapters for the status-query and cancel endpoints.

mod etl;
mod saas;

pub use self::etl::EtlStatusFetcher;
pub use self::saas::SaasImportStatusFetcher;

use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ApiConfig;
use crate::domain::FetchError;

/// Thin JSON client shared by the family adapters.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::InvalidUrl(config.base_url.clone()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    /// Base URL joined with path segments; each segment is percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub(crate) async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> Result<T, FetchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        let response = self.request(Method::POST, url.clone()).json(body).send().await?;
        decode(url, response).await
    }

    /// GET that maps 404 to `None`.
    pub(crate) async fn get_json_opt<T>(&self, segments: &[&str]) -> Result<Option<T>, FetchError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        let response = self.request(Method::GET, url.clone()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(url, response).await.map(Some)
    }

    pub(crate) async fn post_empty(&self, segments: &[&str]) -> Result<(), FetchError> {
        let url = self.endpoint(segments)?;
        let response = self.request(Method::POST, url.clone()).send().await?;
        ensure_success(&url, &response)
    }
}

fn ensure_success(url: &Url, response: &reqwest::Response) -> Result<(), FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(FetchError::HttpStatus {
            status: status.as_u16(),
            endpoint: url.path().to_string(),
        })
    }
}

async fn decode<T: DeserializeOwned>(url: Url, response: reqwest::Response) -> Result<T, FetchError> {
    ensure_success(&url, &response)?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(format!("{}: {e}", url.path())))
}

/// Server progress may be a float or out of range; clamp into 0..=100.
pub(crate) fn clamp_progress(progress: Option<f64>) -> Option<u8> {
    progress
        .filter(|p| p.is_finite())
        .map(|p| p.clamp(0.0, 100.0).round() as u8)
}
