use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::ServiceError;

/// One forward action of a multi-system write, with an optional undo.
#[async_trait]
pub trait SagaStep<C: Send + Sync>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn forward(&self, ctx: &mut C) -> Result<(), ServiceError>;

    /// Whether `compensate` undoes `forward`
    fn compensable(&self) -> bool {
        false
    }

    async fn compensate(&self, _ctx: &C) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Optional steps log their failure and let the saga continue
    fn required(&self) -> bool {
        true
    }
}

/// Outcome of a failed saga. `error` is always the forward failure.
#[derive(Debug)]
pub struct SagaFailure {
    pub step: &'static str,
    pub error: ServiceError,
    pub compensated: Vec<&'static str>,
    pub compensation_failures: Vec<(&'static str, String)>,
}

impl From<SagaFailure> for ServiceError {
    fn from(failure: SagaFailure) -> Self {
        failure.error
    }
}

/// Ordered steps run against a shared context
pub struct Saga<C> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send + Sync> Saga<C> {
    pub fn new(name: &'static str) -> Self {
        Self { name, steps: Vec::new() }
    }

    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run steps in order. On a required step failing, compensate the
    /// completed steps in reverse and return the original error.
    pub async fn run(&self, ctx: &mut C) -> Result<(), SagaFailure> {
        let mut completed: Vec<&dyn SagaStep<C>> = Vec::with_capacity(self.steps.len());
        debug!(saga = self.name, steps = ?self.step_names(), "saga started");

        for step in &self.steps {
            match step.forward(ctx).await {
                Ok(()) => {
                    debug!(saga = self.name, step = step.name(), "saga step completed");
                    completed.push(step.as_ref());
                }
                Err(err) if !step.required() => {
                    warn!(saga = self.name, step = step.name(), error = %err, "optional saga step failed, continuing");
                }
                Err(err) => {
                    warn!(saga = self.name, step = step.name(), error = %err, "saga step failed, compensating");
                    let (compensated, compensation_failures) = self.compensate(&completed, ctx).await;
                    return Err(SagaFailure {
                        step: step.name(),
                        error: err,
                        compensated,
                        compensation_failures,
                    });
                }
            }
        }

        Ok(())
    }

    async fn compensate(
        &self,
        completed: &[&dyn SagaStep<C>],
        ctx: &C,
    ) -> (Vec<&'static str>, Vec<(&'static str, String)>) {
        let mut compensated = Vec::new();
        let mut failures = Vec::new();

        for step in completed.iter().rev().filter(|s| s.compensable()) {
            match step.compensate(ctx).await {
                Ok(()) => compensated.push(step.name()),
                Err(err) => {
                    error!(saga = self.name, step = step.name(), error = %err, "compensation failed");
                    failures.push((step.name(), err.to_string()));
                }
            }
        }

        (compensated, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        entries: Vec<String>,
    }

    struct Record {
        name: &'static str,
        fail: bool,
        compensable: bool,
        required: bool,
    }

    impl Record {
        fn ok(name: &'static str) -> Self {
            Self { name, fail: false, compensable: true, required: true }
        }

        fn failing(name: &'static str) -> Self {
            Self { name, fail: true, compensable: true, required: true }
        }
    }

    #[async_trait]
    impl SagaStep<Log> for Record {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn forward(&self, ctx: &mut Log) -> Result<(), ServiceError> {
            if self.fail {
                return Err(ServiceError::internal(format!("{} broke", self.name)));
            }
            ctx.entries.push(format!("do {}", self.name));
            Ok(())
        }

        fn compensable(&self) -> bool {
            self.compensable
        }

        async fn compensate(&self, _ctx: &Log) -> Result<(), ServiceError> {
            if self.name == "stubborn" {
                return Err(ServiceError::internal("cannot undo"));
            }
            Ok(())
        }

        fn required(&self) -> bool {
            self.required
        }
    }

    #[tokio::test]
    async fn compensates_completed_steps_in_reverse() {
        let saga = Saga::new("test")
            .step(Record::ok("a"))
            .step(Record { compensable: false, ..Record::ok("b") })
            .step(Record::ok("c"))
            .step(Record::failing("d"));

        let mut log = Log::default();
        let failure = saga.run(&mut log).await.unwrap_err();

        assert_eq!(failure.step, "d");
        assert_eq!(failure.compensated, vec!["c", "a"]);
        assert!(failure.compensation_failures.is_empty());
        assert!(failure.error.to_string().contains("d broke"));
    }

    #[tokio::test]
    async fn optional_step_failure_is_skipped() {
        let saga = Saga::new("test")
            .step(Record { required: false, ..Record::failing("jit") })
            .step(Record::ok("persist"));

        let mut log = Log::default();
        saga.run(&mut log).await.unwrap();
        assert_eq!(log.entries, vec!["do persist"]);
    }

    #[tokio::test]
    async fn compensation_failure_keeps_original_error() {
        let saga = Saga::new("test")
            .step(Record::ok("stubborn"))
            .step(Record::failing("persist"));

        let failure = saga.run(&mut Log::default()).await.unwrap_err();
        assert_eq!(failure.compensation_failures.len(), 1);
        let err: ServiceError = failure.into();
        assert!(matches!(err, ServiceError::Internal(msg) if msg.contains("persist broke")));
    }
}
