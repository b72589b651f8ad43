use crate::config::AppConfig;
use crate::models::{ScanRecord, ScanStatus};
use crate::orchestrator::ScanOrchestrator;
use anyhow::Context;
use providers::http::{HttpBackendConfig, HttpScanBackend};
use providers::mock::MockScanBackend;
use providers::{BackendRegistry, FileUpload, ProviderError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub submitted: usize,
    pub clean: usize,
    pub suspicious: usize,
    pub failed: usize,
    pub pending: usize,
}

impl PipelineSummary {
    pub fn from_records(records: &[ScanRecord]) -> Self {
        let mut summary = PipelineSummary {
            submitted: records.len(),
            ..Self::default()
        };
        for record in records {
            match record.status() {
                ScanStatus::Pending => summary.pending += 1,
                ScanStatus::Clean => summary.clean += 1,
                ScanStatus::Suspicious => summary.suspicious += 1,
                ScanStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }
}

pub fn build_registry(config: &AppConfig) -> Result<BackendRegistry, ProviderError> {
    let backend = &config.backend;
    let mock = MockScanBackend::new()
        .with_latency(Duration::from_millis(backend.mock.latency_ms))
        .with_timeout(backend.timeout())
        .flag_executables(backend.mock.flag_executables);
    let mut reg = BackendRegistry::new().with_backend("mock", Arc::new(mock));

    match HttpScanBackend::new(HttpBackendConfig {
        base_url: backend.base_url.clone(),
        timeout: backend.timeout(),
    }) {
        Ok(http) => reg = reg.with_backend("http", Arc::new(http)),
        Err(err) if backend.provider == "http" => return Err(err),
        Err(err) => warn!(error = %err, "http backend unavailable"),
    }

    Ok(reg.set_preferred(&backend.provider))
}

pub fn build_orchestrator(config: &AppConfig) -> anyhow::Result<ScanOrchestrator> {
    let registry = build_registry(config).context("backend setup")?;
    let backend = registry
        .backend(None)
        .with_context(|| format!("available backends: {}", registry.names().join(", ")))?;
    info!(backend = %config.backend.provider, "scan backend ready");
    Ok(ScanOrchestrator::with_settings(
        backend,
        config.orchestrator_settings(),
    ))
}

/// Submits every upload, waits for all of them to settle and summarizes the
/// resulting registry.
pub async fn run_uploads(
    orchestrator: &ScanOrchestrator,
    uploads: Vec<FileUpload>,
) -> PipelineSummary {
    info!("Submitting {} file(s) for scanning...", uploads.len());
    for upload in uploads {
        orchestrator.submit(upload);
    }
    orchestrator.wait_idle().await;
    let summary = PipelineSummary::from_records(&orchestrator.snapshot());
    info!(
        clean = summary.clean,
        suspicious = summary.suspicious,
        failed = summary.failed,
        "Scanning complete."
    );
    summary
}
