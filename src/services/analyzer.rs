//! Drives the three passes per document and the fold across a batch.
//!
//! Pass failures degrade into defaults here (the passes themselves only
//! report errors). A document only fails outright when no payload could be
//! prepared or the batch was cancelled.

use backoff::{future::retry_notify, ExponentialBackoffBuilder};
use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::AnalysisSettings;
use crate::domain::takeoff::{
    AggregateResult, BatchProgress, Document, GridCountResult, LegendInfo, PerDocumentResult,
    PreparedPayload, ValidationResult,
};
use crate::error::{AnalysisError, GatewayError};
use crate::services::aggregator::AggregateBuilder;
use crate::services::gateway::ModelGateway;
use crate::services::passes::{self, quick::QuickCount};
use crate::services::reconciler::reconcile;

/// A reconciled document plus the soft failures met along the way.
#[derive(Debug, Clone)]
pub struct AnalyzedDocument {
    pub result: PerDocumentResult,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct TakeoffAnalyzer {
    gateway: Arc<dyn ModelGateway>,
    settings: AnalysisSettings,
}

impl TakeoffAnalyzer {
    pub fn new(gateway: Arc<dyn ModelGateway>, settings: AnalysisSettings) -> Self {
        Self { gateway, settings }
    }

    pub fn gateway(&self) -> &Arc<dyn ModelGateway> {
        &self.gateway
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Prepares the payload, retrying transient failures when a retry budget
    /// is configured.
    pub async fn prepare(&self, document: &Document) -> Result<PreparedPayload, GatewayError> {
        if self.settings.prepare_retry_max_elapsed.is_zero() {
            return self.gateway.prepare_payload(document).await;
        }

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(self.settings.prepare_retry_max_elapsed))
            .build();

        retry_notify(
            policy,
            move || async move {
                self.gateway.prepare_payload(document).await.map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            },
            |e: GatewayError, wait: Duration| {
                warn!(
                    document = %document.name,
                    error = %e,
                    retry_in_ms = wait.as_millis() as u64,
                    "Payload preparation failed, retrying"
                );
            },
        )
        .await
    }

    /// Full three-pass analysis of one document.
    ///
    /// A supplied legend replaces the legend pass.
    pub async fn analyze_one(
        &self,
        document: &Document,
        legend_override: Option<LegendInfo>,
    ) -> Result<PerDocumentResult, AnalysisError> {
        let never = CancellationToken::new();
        self.analyze_document(document, legend_override, &never)
            .await
            .map(|analyzed| analyzed.result)
    }

    #[instrument(skip(self, document, legend_override, cancel), fields(document = %document.name))]
    pub async fn analyze_document(
        &self,
        document: &Document,
        legend_override: Option<LegendInfo>,
        cancel: &CancellationToken,
    ) -> Result<AnalyzedDocument, AnalysisError> {
        let started = Instant::now();
        let temperature = self.settings.temperature;
        let gateway = self.gateway.as_ref();
        let mut warnings = Vec::new();

        info!("Starting 3-pass analysis");
        let payload = self.prepare(document).await?;
        ensure_active(cancel)?;

        // Pass 1
        let legend = match legend_override {
            Some(legend) => legend,
            None => match passes::legend::run(gateway, &payload, temperature).await {
                Ok(legend) => legend,
                Err(e) => {
                    warn!(error = %e, "Legend pass failed, counting without a legend");
                    LegendInfo::unavailable("Legend extraction failed")
                }
            },
        };
        ensure_active(cancel)?;

        // Pass 2
        let grid = match passes::grid::run(
            gateway,
            &payload,
            &legend,
            temperature,
            self.settings.prefer_overcount,
        )
        .await
        {
            Ok(grid) => grid,
            Err(e) => {
                warn!(error = %e, "Grid pass failed");
                GridCountResult::failed("Grid counting failed")
            }
        };
        ensure_active(cancel)?;

        // Pass 3
        let validation = if grid.skipped {
            ValidationResult::not_counted(&legend)
        } else {
            match passes::validation::run(gateway, &payload, &grid, &legend, temperature).await {
                Ok(validation) => validation,
                Err(e) => {
                    warn!(error = %e, "Validation pass failed, sheet contributes no counts");
                    warnings.push(format!("Validation failed: {}", e.source));
                    ValidationResult::failed("Validation failed - manual review required")
                }
            }
        };

        let mut result = reconcile(legend, grid, validation, &self.settings.thresholds);
        result.elapsed_seconds = started.elapsed().as_secs_f64();

        info!(
            elapsed_seconds = result.elapsed_seconds,
            total_devices = result.total_devices,
            discrepancies = result.discrepancies.len(),
            "Multi-pass analysis complete"
        );
        Ok(AnalyzedDocument { result, warnings })
    }

    /// Single-pass rough count.
    #[instrument(skip(self, document), fields(document = %document.name))]
    pub async fn analyze_quick(&self, document: &Document) -> Result<QuickCount, AnalysisError> {
        let payload = self.prepare(document).await?;
        let quick =
            passes::quick::run(self.gateway.as_ref(), &payload, self.settings.quick_temperature)
                .await?;
        Ok(quick)
    }

    /// Analyses every document and folds the outcomes, in input order.
    ///
    /// `on_progress` fires once per document, before its analysis starts.
    /// Per-document failures become issues; the batch always completes.
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub async fn analyze_all<F>(
        &self,
        documents: &[Document],
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> AggregateResult
    where
        F: FnMut(BatchProgress) + Send,
    {
        let total = documents.len();
        let started = Instant::now();
        let mut builder = AggregateBuilder::new();

        // Stream over indices: iterator-borrowed items make the future non-`Send`.
        let mut outcomes = stream::iter(0..total)
            .map(move |index| {
                let document = &documents[index];
                on_progress(BatchProgress {
                    current: index + 1,
                    total,
                    file_name: document.name.clone(),
                });
                async move {
                    if cancel.is_cancelled() {
                        (index, Err(AnalysisError::Cancelled))
                    } else {
                        (index, self.analyze_document(document, None, cancel).await)
                    }
                }
            })
            .buffered(self.settings.batch_concurrency.max(1));

        while let Some((index, outcome)) = outcomes.next().await {
            let document = &documents[index];
            match outcome {
                Ok(analyzed) => {
                    builder.record_analyzed(&document.name, analyzed.result, analyzed.warnings)
                }
                Err(AnalysisError::Cancelled) => builder.record_cancelled(&document.name),
                Err(e) => {
                    warn!(document = %document.name, error = %e, "Document analysis failed");
                    builder.record_failure(&document.name, &e.to_string());
                }
            }
        }

        let result = builder.finish();
        info!(
            elapsed_seconds = started.elapsed().as_secs_f64(),
            issues = result.issues.len(),
            cancelled = result.cancelled,
            "Batch analysis complete"
        );
        result
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), AnalysisError> {
    if cancel.is_cancelled() {
        Err(AnalysisError::Cancelled)
    } else {
        Ok(())
    }
}
