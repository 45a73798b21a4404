//! `run` command.
//!
//! Wires the engine to the process: policy from `--config`, events as JSONL
//! on stdin, notifications and outcomes as JSONL on stdout (or
//! `--events-file`), and the reconciliation loop in the background.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::adapter::EventRouter;
use crate::cli::args::RunArgs;
use crate::clock::{Clock, SystemClock};
use crate::engine::CombatEngine;
use crate::entity::{Directory, InMemoryDirectory};
use crate::error::CombatlockError;
use crate::notify::{JsonlSink, Notifier, OutputRecord};
use crate::policy::{FilePolicySource, PolicySource};
use crate::transport::{EventReader, Inbound};

/// Runs the engine until stdin closes or `cancel` fires.
///
/// # Errors
///
/// Returns an error if the policy cannot be loaded, the metrics endpoint
/// or events file cannot be opened, or stdin fails.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), CombatlockError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    tracing::info!(config = %args.config.display(), "loading policy");
    let source: Arc<dyn PolicySource> = Arc::new(FilePolicySource::new(&args.config));

    let sink = Arc::new(if let Some(ref path) = args.events_file {
        JsonlSink::from_file(path)?
    } else {
        JsonlSink::stdout()
    });

    let roster = Arc::new(InMemoryDirectory::new());
    let engine = Arc::new(CombatEngine::new(
        source,
        Arc::clone(&roster) as Arc<dyn Directory>,
        Arc::clone(&sink) as Arc<dyn Notifier>,
        Arc::new(SystemClock) as Arc<dyn Clock>,
    )?);
    let router = EventRouter::new(Arc::clone(&engine), roster);
    let reconcile = engine.start_reconcile_task();

    sink.emit(&OutputRecord::Started {
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    });
    tracing::info!("engine started");

    let mut reader = EventReader::stdin();
    let outcome = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break Ok("signal"),
            next = reader.next() => next,
        };
        match next {
            Ok(None) => break Ok("eof"),
            Ok(Some(Inbound::Event { line, event })) => match router.handle(event) {
                Ok(outcome) => sink.emit(&OutputRecord::Outcome {
                    timestamp: Utc::now(),
                    line,
                    outcome,
                }),
                Err(e) => {
                    tracing::warn!(line, error = %e, "event failed");
                    sink.emit(&OutputRecord::Error {
                        timestamp: Utc::now(),
                        line,
                        message: e.to_string(),
                    });
                }
            },
            Ok(Some(Inbound::Rejected { line, error })) => {
                sink.emit(&OutputRecord::Error {
                    timestamp: Utc::now(),
                    line,
                    message: error.to_string(),
                });
            }
            Err(e) => break Err(e),
        }
    };

    router.shutdown();
    if let Err(e) = reconcile.await {
        tracing::warn!(error = %e, "reconcile task ended abnormally");
    }

    let reason = match &outcome {
        Ok(reason) => (*reason).to_string(),
        Err(e) => format!("input error: {e}"),
    };
    tracing::info!(%reason, lines = reader.lines_read(), "engine stopped");
    sink.emit(&OutputRecord::Stopped {
        timestamp: Utc::now(),
        reason,
    });

    outcome.map(|_| ()).map_err(CombatlockError::from)
}
