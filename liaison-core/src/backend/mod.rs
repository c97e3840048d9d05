// MIT License
// Copyright 2023--present liaison developers

//! Model backends: what the dispatcher replays decoded requests against.
//!
//! [`ModelBackend`] has one method per catalogue function. Two adapters
//! implement it:
//!
//! - [`native::NativeModel`] binds an FMI 3.0 shared library at runtime.
//! - [`in_process::InProcessModel`] is a small Rust model for running the
//!   bridge without any native library.

pub mod in_process;
pub mod native;

use std::sync::Arc;

use thiserror::Error;

use crate::status::Status;
use crate::wire::{
    DoStepRequest, DoStepResponse, EnterInitializationModeRequest, InstantiateRequest,
    InstantiationKind, LifecycleOp, LogEvent, RemoteHandle, UpdateDiscreteStatesResponse,
    ValueKind, Values,
};

pub use native::NativeError;

/// Failure to even attempt a model call.
///
/// Anything the model itself reports goes through [`Status`] instead.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Native(#[from] NativeError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{kind} values cannot be used with {function}")]
    UnsupportedKind {
        kind: ValueKind,
        function: &'static str,
    },
    #[error("model failed to release its instance: {0}")]
    Teardown(String),
}

/// Destination of every log message a model emits.
pub type LogSink = Arc<dyn Fn(LogEvent) + Send + Sync>;

/// Log callback handed to one instance, tagged with its remote handle.
#[derive(Clone)]
pub struct InstanceLogger {
    handle: RemoteHandle,
    sink: LogSink,
}

impl InstanceLogger {
    pub fn new(handle: RemoteHandle, sink: LogSink) -> Self {
        Self { handle, sink }
    }

    pub fn handle(&self) -> RemoteHandle {
        self.handle
    }

    /// Mirror the message into `tracing`, then hand it to the sink.
    pub fn log(&self, status: Status, category: &str, message: &str) {
        let handle = self.handle;
        match status {
            Status::Ok => tracing::debug!(%handle, category, "{message}"),
            Status::Warning | Status::Discard => tracing::warn!(%handle, category, "{message}"),
            Status::Error | Status::Fatal => tracing::error!(%handle, category, "{message}"),
        }
        (self.sink)(LogEvent {
            instance: Some(handle),
            status,
            category: category.to_owned(),
            message: message.to_owned(),
        });
    }
}

impl std::fmt::Debug for InstanceLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLogger")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// One method per catalogue function.
///
/// Statuses returned here are the model's own and are relayed verbatim.
/// `Err` means the call could not be made at all.
pub trait ModelBackend: Send + Sync + 'static {
    type Instance: Send + 'static;

    /// Create an instance. `Ok(None)` is the model declining, as a null
    /// `fmi3Instance` would be.
    fn instantiate(
        &self,
        kind: InstantiationKind,
        request: &InstantiateRequest,
        logger: InstanceLogger,
    ) -> Result<Option<Self::Instance>, BackendError>;

    fn free_instance(&self, instance: Self::Instance) -> Result<(), BackendError>;

    fn set_debug_logging(
        &self,
        instance: &mut Self::Instance,
        logging_on: bool,
        categories: &[String],
    ) -> Result<Status, BackendError>;

    fn enter_initialization_mode(
        &self,
        instance: &mut Self::Instance,
        request: &EnterInitializationModeRequest,
    ) -> Result<Status, BackendError>;

    fn lifecycle(&self, instance: &mut Self::Instance, op: LifecycleOp)
        -> Result<Status, BackendError>;

    fn do_step(
        &self,
        instance: &mut Self::Instance,
        request: &DoStepRequest,
    ) -> Result<DoStepResponse, BackendError>;

    fn update_discrete_states(
        &self,
        instance: &mut Self::Instance,
    ) -> Result<UpdateDiscreteStatesResponse, BackendError>;

    /// Read `n_values` values of `kind`. The returned array holds exactly as
    /// many values as the model was given room to write.
    fn get_values(
        &self,
        instance: &mut Self::Instance,
        kind: ValueKind,
        value_references: &[u32],
        n_values: usize,
    ) -> Result<(Status, Values), BackendError>;

    fn set_values(
        &self,
        instance: &mut Self::Instance,
        value_references: &[u32],
        values: &Values,
    ) -> Result<Status, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn logger_tags_events_with_handle() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: LogSink = {
            let seen = Arc::clone(&seen);
            Arc::new(move |event: LogEvent| seen.lock().unwrap().push(event))
        };
        let logger = InstanceLogger::new(RemoteHandle(9), sink);
        logger.log(Status::Warning, "logStatusWarning", "step size reduced");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].instance, Some(RemoteHandle(9)));
        assert_eq!(seen[0].status, Status::Warning);
        assert_eq!(seen[0].category, "logStatusWarning");
        assert_eq!(seen[0].message, "step size reduced");
    }
}
