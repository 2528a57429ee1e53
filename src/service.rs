//! Scan service: one request in, one well-formed response out
//!
//! validate target → validate flags → build invocation → execute → normalize.
//! Each request runs on its own task so a panic anywhere in the pipeline is
//! still turned into a response naming the target.

use std::{sync::Arc, time::Instant};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::{
    command,
    core::{
        CommandRunner, ExecutionOutcome, ScanRequest, ScanResponse, ServiceIdentity, SessionId,
        TOOL_INFO, TOOL_SCAN,
    },
    engine::EngineSettings,
    error::Result,
    executor::ProcessExecutor,
    logging::{ScanLogger, TimingLogger},
    metrics::ScanMetrics,
    normalize::{failure_text, normalize, Normalized},
    validation::{ensure_valid_flags, ensure_valid_target},
};

type SharedRunner = Arc<dyn CommandRunner + Send + Sync>;

/// Orchestrates scans; cheap to clone, every clone shares the same engine
#[derive(Clone)]
pub struct ScanService {
    engine: Arc<EngineSettings>,
    runner: SharedRunner,
    identity: Arc<ServiceIdentity>,
    metrics: Arc<ScanMetrics>,
}

impl ScanService {
    /// Service that runs the engine as a real bounded child process
    pub fn new(engine: Arc<EngineSettings>) -> Self {
        let runner = Arc::new(ProcessExecutor::from_settings(&engine));
        Self {
            engine,
            runner,
            identity: Arc::new(ServiceIdentity::default()),
            metrics: Arc::new(ScanMetrics::new()),
        }
    }

    pub fn with_runner(mut self, runner: SharedRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_identity(mut self, identity: ServiceIdentity) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    pub fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    /// Handle one scan request; never fails
    pub async fn handle(&self, request: ScanRequest, session: &SessionId) -> ScanResponse {
        let scan_id = Uuid::new_v4();
        let target = request.target.clone();
        let span = tracing::info_span!(
            "nmap_scan",
            session = %session,
            scan_id = %scan_id,
        );

        info!(
            parent: &span,
            "[{}] Received target: {}, flags: {}, outputFormat: {}",
            session,
            request.target,
            request.flags.as_deref().unwrap_or("<default>"),
            request.output_format
        );

        let service = self.clone();
        let logger = ScanLogger::new(session.as_str(), scan_id.to_string(), target.as_str());
        let task = tokio::spawn(async move { service.run(request, logger).await }.instrument(span));

        match task.await {
            Ok(text) => ScanResponse::text(text),
            Err(join_error) => {
                error!("[{}] Nmap scan task for {} aborted: {}", session, target, join_error);
                self.metrics.record_internal_failure();
                ScanResponse::text(failure_text(
                    &target,
                    &format!("Unexpected internal failure: {}", join_error),
                ))
            }
        }
    }

    /// Static service metadata in the response shape
    pub fn info(&self, session: &SessionId) -> ScanResponse {
        ScanResponse::text(format!(
            "Nmap Service Information:\n\
             - Service: Network scanning using Nmap\n\
             - Version: {}\n\
             - Available Tools: {}, {}\n\
             - Session ID: {}",
            self.identity.version, TOOL_SCAN, TOOL_INFO, session
        ))
    }

    async fn run(&self, request: ScanRequest, logger: ScanLogger) -> String {
        let _timing = TimingLogger::start(format!("nmap scan of {}", request.target));
        self.metrics.record_started();

        match self.execute(&request, &logger).await {
            Ok(normalized) => normalized.text,
            Err(error) => {
                let context = format!("nmap scan of {}", request.target);
                crate::log_error_with_context!(error, context.as_str());
                self.metrics.record_rejected(&error);
                failure_text(&request.target, &error.to_string())
            }
        }
    }

    async fn execute(&self, request: &ScanRequest, logger: &ScanLogger) -> Result<Normalized> {
        let flags = request.effective_flags(&self.engine.default_flags);
        crate::log_scan_start!(request.target, flags, request.output_format);

        logger.log_phase_start("validate");
        let target_kind = ensure_valid_target(&request.target)?;
        ensure_valid_flags(flags)?;
        debug!(target_kind = target_kind.as_str(), "Request passed validation");

        let invocation =
            command::build(&self.engine, &request.target, flags, request.output_format);
        info!("Executing command: {}", invocation.command_line());

        logger.log_phase_start("execute");
        let started = Instant::now();
        let outcome = self.runner.execute(&invocation).await;
        logger.log_phase_complete("execute", started.elapsed());

        if let ExecutionOutcome::Success { stderr, .. } = &outcome {
            if !stderr.trim().is_empty() {
                warn!("Nmap stderr: {}", stderr.trim());
            }
        }

        let normalized = normalize(&outcome, &request.target, request.output_format);
        let elapsed = started.elapsed();
        self.metrics.record_completed(normalized.kind, outcome.kind(), elapsed);
        crate::log_scan_complete!(request.target, normalized.kind.as_str(), elapsed);

        Ok(normalized)
    }
}
