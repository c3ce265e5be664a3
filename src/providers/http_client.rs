//! Shared HTTP plumbing reused by every hosted adapter: base-URL joining,
//! auth-header injection, and a cancellation-aware request wrapper.

use crate::error::ProviderError;
use reqwest::{header::HeaderMap, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub enum AuthStrategy {
    Bearer { token: String },
    Header { name: String, value: String },
    QueryParam { name: String, value: String },
    None,
}

#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
    query_param: Option<(String, String)>,
}

impl HttpProviderClient {
    pub fn new(
        timeout: Duration,
        base_url: Option<String>,
        default_base: &str,
        headers: &HashMap<String, String>,
        auth: AuthStrategy,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let mut default_headers = HeaderMap::new();
        let mut query_param = None;

        match auth {
            AuthStrategy::Bearer { token } => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    default_headers.insert("Authorization", value);
                }
            }
            AuthStrategy::Header { name, value } => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<reqwest::header::HeaderName>(), value.parse())
                {
                    default_headers.insert(name, value);
                }
            }
            AuthStrategy::QueryParam { name, value } => {
                query_param = Some((name, value));
            }
            AuthStrategy::None => {}
        }

        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (k.parse::<reqwest::header::HeaderName>(), v.parse()) {
                default_headers.insert(name, value);
            }
        }

        let base_url = base_url
            .unwrap_or_else(|| default_base.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            base_url,
            default_headers,
            query_param,
        })
    }

    fn build_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        let mut url = format!("{}/{}", self.base_url, path);
        if let Some((name, value)) = &self.query_param {
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push(sep);
            url.push_str(&format!("{name}={value}"));
        }
        url
    }

    /// Races the given request against `cancel`, surfacing
    /// [`ProviderError::Cancelled`] if the token fires first.
    async fn send_cancellable(
        &self,
        cancel: &CancellationToken,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, ProviderError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = request.send() => Ok(result?),
        }
    }

    pub async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, ProviderError> {
        let url = self.build_url(path);
        let req = self
            .http
            .request(Method::POST, url)
            .headers(self.default_headers.clone())
            .json(body);
        let resp = self.send_cancellable(cancel, req).await?;

        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp.json::<TResp>().await?)
    }

    pub async fn post_json_raw<TReq: Serialize>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        body: &TReq,
    ) -> Result<Response, ProviderError> {
        let url = self.build_url(path);
        let req = self
            .http
            .request(Method::POST, url)
            .headers(self.default_headers.clone())
            .json(body);
        self.send_cancellable(cancel, req).await
    }

    /// Same as [`Self::post_json_raw`], but adds `Accept: text/event-stream`
    /// (§4.2) for the streaming completion request every adapter's
    /// `complete_stream` issues, whether the wire format is SSE or NDJSON.
    pub async fn post_json_raw_streaming<TReq: Serialize>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        body: &TReq,
    ) -> Result<Response, ProviderError> {
        let url = self.build_url(path);
        let req = self
            .http
            .request(Method::POST, url)
            .headers(self.default_headers.clone())
            .header("Accept", "text/event-stream")
            .json(body);
        self.send_cancellable(cancel, req).await
    }

    pub async fn get_json<TResp: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
    ) -> Result<TResp, ProviderError> {
        let url = self.build_url(path);
        let req = self
            .http
            .request(Method::GET, url)
            .headers(self.default_headers.clone());
        let resp = self.send_cancellable(cancel, req).await?;

        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp.json::<TResp>().await?)
    }

    pub async fn get_raw(
        &self,
        cancel: &CancellationToken,
        path: &str,
    ) -> Result<Response, ProviderError> {
        let url = self.build_url(path);
        let req = self
            .http
            .request(Method::GET, url)
            .headers(self.default_headers.clone());
        self.send_cancellable(cancel, req).await
    }
}

/// Translates an HTTP failure response into the closed error taxonomy.
pub async fn map_error_response(resp: Response) -> ProviderError {
    let status = resp.status();
    match resp.text().await {
        Ok(body) => classify_error_body(status.as_u16(), &body),
        Err(_) => ProviderError::from_status(status.as_u16(), "failed to read error response"),
    }
}

/// Pure classification of an error response body, split out of
/// [`map_error_response`] so the code-detection rules can be unit tested
/// without a live `reqwest::Response`.
///
/// Most statuses map through [`ProviderError::from_status`], but a 400 whose
/// body names an OpenAI-style `"context_length_exceeded"` error code (the
/// same shape Azure OpenAI and OpenAI-compatible custom endpoints echo back)
/// is reclassified as [`crate::error::ErrorCode::ContextLengthExceeded`]
/// rather than the generic `InvalidRequest`.
fn classify_error_body(status: u16, body: &str) -> ProviderError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let error_obj = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error_obj
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|m| m.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.to_string());

    let error_code = error_obj.and_then(|e| e.get("code")).and_then(|c| c.as_str());
    if status == 400 && error_code == Some("context_length_exceeded") {
        return ProviderError::Classified {
            code: crate::error::ErrorCode::ContextLengthExceeded,
            message,
            status: Some(400),
        };
    }
    ProviderError::from_status(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn classify_error_body_detects_context_length_exceeded() {
        let body = r#"{"error":{"message":"too many tokens","code":"context_length_exceeded"}}"#;
        let err = classify_error_body(400, body);
        assert_eq!(err.code(), ErrorCode::ContextLengthExceeded);
    }

    #[test]
    fn classify_error_body_falls_back_to_invalid_request() {
        let body = r#"{"error":{"message":"bad field","code":"invalid_value"}}"#;
        let err = classify_error_body(400, body);
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn classify_error_body_handles_non_json_body() {
        let err = classify_error_body(500, "internal server error");
        assert_eq!(err.code(), ErrorCode::ServerError);
    }
}
