//! Anonymous image hosting for reverse-image-search links.
//!
//! The uploaded copy only exists so third-party visual search engines can
//! reach the user's image by URL. Upload failure is never fatal: the act
//! phase simply omits the reverse-image links.

use std::time::Duration;

const UPLOAD_ENDPOINT: &str = "https://0x0.st";

/// Outbound image hosting seam.
pub trait ImageHost: Send + Sync {
    /// Uploads image bytes and returns the public URL, or `None` on any
    /// failure (network error, non-2xx, timeout). Never errors.
    fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> impl Future<Output = Option<String>> + Send;
}

/// Client for a 0x0.st-style host: multipart POST with a single `file`
/// field, plain-text URL body on success.
pub struct AnonymousImageHost {
    http: reqwest::Client,
    endpoint: String,
}

impl AnonymousImageHost {
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoint(timeout, UPLOAD_ENDPOINT)
    }

    pub fn with_endpoint(timeout: Duration, endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
        }
    }

    async fn try_upload(&self, bytes: Vec<u8>, filename: &str) -> Option<String> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("image/png")
            .ok()?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = match self.http.post(&self.endpoint).multipart(form).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "image upload request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "image host rejected upload");
            return None;
        }

        let body = response.text().await.ok()?;
        let url = body.trim();
        if url.is_empty() || !url.starts_with("http") {
            tracing::warn!("image host returned an unusable body");
            return None;
        }
        Some(url.to_string())
    }
}

impl ImageHost for AnonymousImageHost {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Option<String> {
        self.try_upload(bytes, filename).await
    }
}
