//! Per-call step timing.

use super::metrics::STEP_DURATION;
use crate::error::Result;
use crate::types::StepTiming;
use metrics::histogram;
use std::future::Future;
use std::time::Instant;
use tracing::{info_span, warn, Instrument};

/// Times the steps of one orchestrator call.
///
/// Each step runs inside its own `step` span and its duration is recorded
/// both into the returned timings and the step duration histogram.
#[derive(Debug)]
pub struct StepRecorder {
    operation: &'static str,
    timings: Vec<StepTiming>,
}

impl StepRecorder {
    pub fn new(operation: &'static str) -> Self {
        Self { operation, timings: Vec::new() }
    }

    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Run `fut` as the step named `step`.
    pub async fn step<T, F>(&mut self, step: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let span = info_span!("step", operation = self.operation, step);
        let started = Instant::now();
        let result = fut.instrument(span).await;
        let seconds = started.elapsed().as_secs_f64();

        if let Err(e) = &result {
            warn!(operation = self.operation, step, seconds, error = %e, "Step failed");
        }
        self.record(step, seconds, result.is_ok());
        result
    }

    /// Run an infallible step.
    pub async fn observe<T, F>(&mut self, step: &'static str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let span = info_span!("step", operation = self.operation, step);
        let started = Instant::now();
        let value = fut.instrument(span).await;
        self.record(step, started.elapsed().as_secs_f64(), true);
        value
    }

    fn record(&mut self, step: &'static str, seconds: f64, succeeded: bool) {
        histogram!(STEP_DURATION, "operation" => self.operation, "step" => step).record(seconds);
        self.timings.push(StepTiming { step: step.to_string(), seconds, succeeded });
    }

    #[must_use]
    pub fn timings(&self) -> &[StepTiming] {
        &self.timings
    }

    /// Consume the recorder, returning the timings in execution order.
    #[must_use]
    pub fn finish(self) -> Vec<StepTiming> {
        self.timings
    }
}
