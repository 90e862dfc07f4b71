//! HTTP transport boundary.
//!
//! The rate limiter and REST executor only see `HttpTransport`: one request
//! in, status + headers + body out. `ReqwestTransport` is the production
//! implementation; tests substitute scripted transports.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};

use crate::config::{self, Config};
use crate::error::{Error, HttpFailure};

const DEFAULT_FILENAME: &str = "file";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A file part of a multipart request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    #[must_use]
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Download `url` into an attachment. The file name is the last path
    /// segment of the final URL, the MIME type comes from `Content-Type`.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the download fails, or the status
    /// class error for a non-2xx response.
    pub async fn from_url(http: &reqwest::Client, url: &str) -> Result<Self, Error> {
        let response = http.get(url).send().await?;
        let status = response.status();
        let filename = response
            .url()
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME)
            .to_owned();
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_owned();

        if !status.is_success() {
            return Err(Error::from_status(HttpFailure {
                code: status.as_u16(),
                status: status.canonical_reason().unwrap_or("").to_owned(),
                body: response.text().await?,
            }));
        }

        let bytes = response.bytes().await?.to_vec();
        Ok(Self {
            filename,
            mime_type,
            bytes,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    /// Raw JSON text, sent as `application/json`.
    Json(String),
    /// `payload_json` part plus one part per attachment.
    Multipart {
        payload_json: String,
        attachments: Vec<Attachment>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path below the configured base URL, e.g. `/channels/1/messages`.
    pub path: String,
    pub body: RequestBody,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    /// Canonical reason phrase for the status, or empty.
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }
}

/// Issues one HTTP request. Never retries.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns a transport error when no response was received.
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, Error>;
}

// =============================================================================
// REQWEST
// =============================================================================

pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
    authorization: HeaderValue,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value or the
    /// underlying client cannot be built.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let mut authorization = HeaderValue::from_str(&format!("Bot {}", config.token()))
            .map_err(|e| Error::ProtocolViolation(format!("token is not a valid header: {e}")))?;
        authorization.set_sensitive(true);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url().to_owned(),
            authorization,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, Error> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .header(AUTHORIZATION, self.authorization.clone())
            .header(USER_AGENT, config::USER_AGENT);

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(json) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(json.clone()),
            RequestBody::Multipart {
                payload_json,
                attachments,
            } => builder.multipart(multipart_form(payload_json, attachments)?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn multipart_form(payload_json: &str, attachments: &[Attachment]) -> Result<Form, Error> {
    let mut form = Form::new().text("payload_json", payload_json.to_owned());
    for (index, attachment) in attachments.iter().enumerate() {
        let name = if index == 0 {
            "file".to_owned()
        } else {
            format!("file{index}")
        };
        let part = Part::bytes(attachment.bytes.clone())
            .file_name(attachment.filename.clone())
            .mime_str(&attachment.mime_type)?;
        form = form.part(name, part);
    }
    Ok(form)
}

/// Shared transport handle.
pub type SharedTransport = Arc<dyn HttpTransport>;

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
