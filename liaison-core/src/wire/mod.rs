// MIT License
// Copyright 2023--present liaison developers

//! The wire catalogue: which functions cross the boundary, under which keys,
//! and with which payload shapes.
//!
//! Payloads are `postcard`-encoded [`messages`]. The catalogue is the only
//! thing the client stub and the server dispatcher share; both sides must be
//! built from the same revision of it.
//!
//! ## Routing
//!
//! | Key | Kind |
//! |-----|------|
//! | `rpc/<namespace>/<fmi3Function>` | request/reply, one per [`Function`] |
//! | `rpc/<namespace>/logMessage` | publish/subscribe of [`LogEvent`](messages::LogEvent) |

pub mod messages;
pub mod values;

use serde::Serialize;
use thiserror::Error;

pub use messages::*;
pub use values::{Scalar, ValueKind, Values};

/// Errors raised while encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] postcard::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] postcard::Error),
    #[error("count field `{field}` declares {declared} elements but {actual} were sent")]
    CountMismatch {
        field: &'static str,
        declared: u64,
        actual: usize,
    },
    #[error("expected {expected} values, received {found}")]
    KindMismatch { expected: ValueKind, found: ValueKind },
    #[error("room for {n_values} {kind} values does not fit {references} value references")]
    Capacity {
        kind: ValueKind,
        references: usize,
        n_values: u64,
    },
}

/// The three ways an FMI 3.0 model can be instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstantiationKind {
    ModelExchange,
    CoSimulation,
    ScheduledExecution,
}

/// State transitions that take no argument besides the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOp {
    ExitInitializationMode,
    EnterEventMode,
    EnterStepMode,
    EnterConfigurationMode,
    ExitConfigurationMode,
    Terminate,
    Reset,
}

impl LifecycleOp {
    pub const ALL: [LifecycleOp; 7] = [
        LifecycleOp::ExitInitializationMode,
        LifecycleOp::EnterEventMode,
        LifecycleOp::EnterStepMode,
        LifecycleOp::EnterConfigurationMode,
        LifecycleOp::ExitConfigurationMode,
        LifecycleOp::Terminate,
        LifecycleOp::Reset,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LifecycleOp::ExitInitializationMode => "fmi3ExitInitializationMode",
            LifecycleOp::EnterEventMode => "fmi3EnterEventMode",
            LifecycleOp::EnterStepMode => "fmi3EnterStepMode",
            LifecycleOp::EnterConfigurationMode => "fmi3EnterConfigurationMode",
            LifecycleOp::ExitConfigurationMode => "fmi3ExitConfigurationMode",
            LifecycleOp::Terminate => "fmi3Terminate",
            LifecycleOp::Reset => "fmi3Reset",
        }
    }
}

/// One entry of the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Instantiate(InstantiationKind),
    FreeInstance,
    SetDebugLogging,
    EnterInitializationMode,
    Lifecycle(LifecycleOp),
    DoStep,
    UpdateDiscreteStates,
    GetValues(ValueKind),
    SetValues(ValueKind),
}

impl Function {
    /// Every function that crosses the wire, in a stable order.
    pub fn all() -> Vec<Function> {
        let mut all = vec![
            Function::Instantiate(InstantiationKind::ModelExchange),
            Function::Instantiate(InstantiationKind::CoSimulation),
            Function::Instantiate(InstantiationKind::ScheduledExecution),
            Function::FreeInstance,
            Function::SetDebugLogging,
            Function::EnterInitializationMode,
        ];
        all.extend(LifecycleOp::ALL.into_iter().map(Function::Lifecycle));
        all.push(Function::DoStep);
        all.push(Function::UpdateDiscreteStates);
        all.extend(ValueKind::ALL.into_iter().map(Function::GetValues));
        all.extend(ValueKind::ALL.into_iter().map(Function::SetValues));
        all
    }

    /// The FMI 3.0 symbol name, which is also the last routing key segment.
    pub fn name(self) -> &'static str {
        match self {
            Function::Instantiate(InstantiationKind::ModelExchange) => {
                "fmi3InstantiateModelExchange"
            }
            Function::Instantiate(InstantiationKind::CoSimulation) => "fmi3InstantiateCoSimulation",
            Function::Instantiate(InstantiationKind::ScheduledExecution) => {
                "fmi3InstantiateScheduledExecution"
            }
            Function::FreeInstance => "fmi3FreeInstance",
            Function::SetDebugLogging => "fmi3SetDebugLogging",
            Function::EnterInitializationMode => "fmi3EnterInitializationMode",
            Function::Lifecycle(op) => op.name(),
            Function::DoStep => "fmi3DoStep",
            Function::UpdateDiscreteStates => "fmi3UpdateDiscreteStates",
            Function::GetValues(kind) => kind.getter_name(),
            Function::SetValues(kind) => kind.setter_name(),
        }
    }

    /// Routing key of this function under `namespace`.
    pub fn key(self, namespace: &str) -> String {
        format!("rpc/{namespace}/{}", self.name())
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Key of the broadcast log channel under `namespace`.
pub fn log_key(namespace: &str) -> String {
    format!("rpc/{namespace}/logMessage")
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(message).map_err(WireError::Encode)
}

/// Decode and validate a message.
pub fn decode<T: WireMessage>(bytes: &[u8]) -> Result<T, WireError> {
    let message: T = postcard::from_bytes(bytes).map_err(WireError::Decode)?;
    message.validate()?;
    Ok(message)
}
