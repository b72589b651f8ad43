use crate::{FileUpload, ProviderError, ResolveError, ScanBackend, ScanVerdict, Submission, UploadError};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    pub base_url: String,
    /// Applied to every request, connect through body read.
    pub timeout: Duration,
}

/// Backend speaking the scan service's REST contract:
/// `POST /scan` (multipart `file`) and `GET /scan/{scan_id}`.
#[derive(Clone)]
pub struct HttpScanBackend {
    client: Client,
    base: Arc<Url>,
}

impl HttpScanBackend {
    pub fn new(cfg: HttpBackendConfig) -> Result<Self, ProviderError> {
        let base = Url::parse(&cfg.base_url)
            .map_err(|e| ProviderError::Setup(format!("invalid base url {}: {e}", cfg.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(ProviderError::Setup(format!(
                "base url {} cannot carry a path",
                cfg.base_url
            )));
        }
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ProviderError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            base: Arc::new(base),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = (*self.base).clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    scan_id: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: Option<String>,
    message: Option<String>,
    results: Option<ResultsPayload>,
}

#[derive(Deserialize)]
struct ResultsPayload {
    is_malicious: Option<bool>,
    #[serde(default)]
    threats_found: Option<Vec<String>>,
}

fn upload_transport(err: reqwest::Error) -> UploadError {
    if err.is_timeout() {
        UploadError::Timeout
    } else {
        UploadError::Transport(err.to_string())
    }
}

fn resolve_transport(err: reqwest::Error) -> ResolveError {
    if err.is_timeout() {
        ResolveError::Timeout
    } else {
        ResolveError::Transport(err.to_string())
    }
}

pub(crate) fn parse_submission(body: &[u8]) -> Result<Submission, UploadError> {
    let parsed: SubmitResponse =
        serde_json::from_slice(body).map_err(|e| UploadError::Malformed(e.to_string()))?;
    match parsed.scan_id {
        Some(id) if !id.trim().is_empty() => Ok(Submission { scan_id: id }),
        Some(_) => Err(UploadError::Malformed("empty scan_id".into())),
        None => Err(UploadError::Malformed("missing scan_id".into())),
    }
}

pub(crate) fn parse_verdict(body: &[u8]) -> Result<ScanVerdict, ResolveError> {
    let parsed: StatusResponse =
        serde_json::from_slice(body).map_err(|e| ResolveError::Malformed(e.to_string()))?;

    if let Some(status) = parsed.status.as_deref() {
        match status.to_ascii_lowercase().as_str() {
            "scanning" | "pending" | "queued" | "running" => {
                return Err(ResolveError::NotReady(status.to_string()))
            }
            "failed" | "error" => {
                return Err(ResolveError::ScanFailed(
                    parsed.message.unwrap_or_else(|| status.to_string()),
                ))
            }
            _ => {}
        }
    }

    let results = parsed
        .results
        .ok_or_else(|| ResolveError::Malformed("missing results".into()))?;
    let is_malicious = results
        .is_malicious
        .ok_or_else(|| ResolveError::Malformed("missing results.is_malicious".into()))?;
    Ok(ScanVerdict {
        is_malicious,
        threats: results.threats_found.unwrap_or_default(),
    })
}

#[async_trait::async_trait]
impl ScanBackend for HttpScanBackend {
    async fn submit(&self, upload: &FileUpload) -> Result<Submission, UploadError> {
        let part = Part::bytes(upload.content.to_vec()).file_name(upload.file_name.clone());
        let form = Form::new().part("file", part);
        let url = self.endpoint(&["scan"]);
        debug!(%url, file = %upload.file_name, size = upload.size_bytes, "uploading file");

        let resp = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(upload_transport)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(upload_transport)?;
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        parse_submission(&body)
    }

    async fn resolve(&self, scan_id: &str) -> Result<ScanVerdict, ResolveError> {
        let url = self.endpoint(&["scan", scan_id]);
        debug!(%url, scan_id, "fetching scan status");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(resolve_transport)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(resolve_transport)?;
        if status == StatusCode::NOT_FOUND {
            return Err(ResolveError::UnknownScan(scan_id.to_string()));
        }
        if !status.is_success() {
            return Err(ResolveError::ScanFailed(format!(
                "status {} body {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        parse_verdict(&body)
    }
}
