//! HTTP relay from the api-service to the data-service.

use marquee_web::forward::{
    DataService, ForwardError, ForwardFuture, ForwardRequest, ForwardedResponse,
    MAX_FORWARDED_BODY,
};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

/// [`DataService`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpDataService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDataService {
    /// Relay to `base_url` (e.g. `http://data-service:8081`), giving up after
    /// `timeout` per request.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl DataService for HttpDataService {
    fn forward(&self, request: ForwardRequest) -> ForwardFuture<'_> {
        Box::pin(async move {
            let url = format!("{}{}", self.base_url, request.path_and_query);
            let response = self
                .client
                .request(request.method, &url)
                .headers(request.headers)
                .body(request.body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_builder() {
                        ForwardError::InvalidRequest(e.to_string())
                    } else {
                        ForwardError::Unreachable(e.to_string())
                    }
                })?;

            let status = response.status();
            let content_type = response.headers().get(CONTENT_TYPE).cloned();
            let body = response
                .bytes()
                .await
                .map_err(|e| ForwardError::InvalidResponse(e.to_string()))?;
            if body.len() > MAX_FORWARDED_BODY {
                return Err(ForwardError::InvalidResponse(format!(
                    "body of {} bytes exceeds limit",
                    body.len()
                )));
            }

            tracing::debug!(%url, status = status.as_u16(), "Relayed to data service");
            Ok(ForwardedResponse {
                status,
                content_type,
                body,
            })
        })
    }
}
