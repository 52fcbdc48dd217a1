use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::utils::logging::TIMING_TARGET;

/// Wall-clock record of one pipeline flow, written to the timing log.
#[derive(Debug)]
pub struct FlowTimer {
    flow: &'static str,
    chat_id: i64,
    message_id: i32,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    completed: bool,
}

impl FlowTimer {
    pub fn start(flow: &'static str, chat_id: i64, message_id: i32) -> Self {
        let timer = FlowTimer {
            flow,
            chat_id,
            message_id,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            completed: false,
        };
        info!(
            target: TIMING_TARGET,
            "event=flow_started flow={} chat_id={} message_id={} started_at={}",
            timer.flow,
            timer.chat_id,
            timer.message_id,
            timer.started_at.to_rfc3339()
        );
        timer
    }

    pub fn complete(&mut self, status: &str, detail: Option<&str>) {
        if self.completed {
            return;
        }
        self.completed = true;
        info!(
            target: TIMING_TARGET,
            "event=flow_completed flow={} chat_id={} message_id={} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.flow,
            self.chat_id,
            self.message_id,
            self.started_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
            self.started_perf.elapsed().as_secs_f64(),
            status,
            detail.unwrap_or_default()
        );
    }
}

impl Drop for FlowTimer {
    fn drop(&mut self) {
        self.complete("aborted", None);
    }
}

pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_perf = Instant::now();
    info!(
        target: TIMING_TARGET,
        "event=llm_request provider={} model={} operation={} started_at={}",
        provider,
        model,
        operation,
        Utc::now().to_rfc3339()
    );

    let result = call().await;

    info!(
        target: TIMING_TARGET,
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={}",
        provider,
        model,
        operation,
        Utc::now().to_rfc3339(),
        started_perf.elapsed().as_secs_f64(),
        if result.is_ok() { "success" } else { "error" }
    );

    result
}
