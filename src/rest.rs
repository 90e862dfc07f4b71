//! Rate-limited REST calls.
//!
//! Every call is classified into a bucket, admitted through the
//! [`RateLimiter`], sent by the transport, and its status mapped to a
//! typed outcome: the body on 2xx, an [`Error`] carrying code, status text
//! and body otherwise. Bucket state is only ever touched by the limiter.

use std::sync::Arc;

use reqwest::Method;
use tracing::debug;

use crate::bucket::BucketClassifier;
use crate::config::Config;
use crate::error::{Error, HttpFailure};
use crate::http::{
    Attachment, HttpRequest, HttpResponse, HttpTransport, RequestBody, ReqwestTransport,
    SharedTransport,
};
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct RestClient {
    transport: SharedTransport,
    limiter: RateLimiter,
    classifier: Arc<BucketClassifier>,
}

impl RestClient {
    /// REST client over reqwest for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let transport = Arc::new(ReqwestTransport::new(config)?);
        Ok(Self::with_transport(transport, config.rate_limit_retries()))
    }

    /// REST client over any transport, retrying 429s `rate_limit_retries` times.
    #[must_use]
    pub fn with_transport(transport: SharedTransport, rate_limit_retries: u32) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(rate_limit_retries),
            classifier: Arc::new(BucketClassifier::new()),
        }
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn get(&self, path: &str) -> Result<String, Error> {
        self.request(Method::GET, path, RequestBody::Empty).await
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn post(&self, path: &str, json: &str) -> Result<String, Error> {
        self.request(Method::POST, path, RequestBody::Json(json.to_owned()))
            .await
    }

    /// POST a `payload_json` part plus file attachments.
    ///
    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn post_multipart(
        &self,
        path: &str,
        payload_json: &str,
        attachments: Vec<Attachment>,
    ) -> Result<String, Error> {
        let body = RequestBody::Multipart {
            payload_json: payload_json.to_owned(),
            attachments,
        };
        self.request(Method::POST, path, body).await
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn put(&self, path: &str, json: &str) -> Result<String, Error> {
        self.request(Method::PUT, path, RequestBody::Json(json.to_owned()))
            .await
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn patch(&self, path: &str, json: &str) -> Result<String, Error> {
        self.request(Method::PATCH, path, RequestBody::Json(json.to_owned()))
            .await
    }

    /// # Errors
    ///
    /// See [`RestClient::request`].
    pub async fn delete(&self, path: &str) -> Result<String, Error> {
        self.request(Method::DELETE, path, RequestBody::Empty).await
    }

    /// Perform one governed call and return the response body.
    ///
    /// # Errors
    ///
    /// - Transport errors from the HTTP layer, unchanged.
    /// - [`Error::Redirect`], [`Error::Client`], [`Error::Server`] or
    ///   [`Error::UnexpectedStatus`] for any non-2xx final response,
    ///   including a 429 that survived its retry.
    pub async fn request(&self, method: Method, path: &str, body: RequestBody) -> Result<String, Error> {
        let key = self.classifier.classify(method.as_str(), path);
        let request = HttpRequest::new(method, path, body);
        let request = &request;
        let transport = &*self.transport;

        let response = self
            .limiter
            .execute(&key, move || transport.execute(request))
            .await?;
        debug!(
            method = %request.method,
            path,
            bucket = %key,
            status = response.status.as_u16(),
            "rest: response"
        );
        into_body(response)
    }
}

fn into_body(response: HttpResponse) -> Result<String, Error> {
    if response.status.is_success() {
        return Ok(response.body);
    }
    Err(Error::from_status(HttpFailure {
        code: response.status.as_u16(),
        status: response.status_text().to_owned(),
        body: response.body,
    }))
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
