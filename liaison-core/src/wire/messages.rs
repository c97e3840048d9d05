// MIT License
// Copyright 2023--present liaison developers

//! Request and response shapes, one pair per catalogue function.
//!
//! Every array travels with an explicit count field. Constructors derive the
//! count from the array itself; [`WireMessage::validate`] rejects decoded
//! messages whose declared count disagrees with the array it accompanies.

use serde::{Deserialize, Serialize};

use crate::status::Status;
use crate::wire::values::{ValueKind, Values};
use crate::wire::WireError;

/// Most values a single read may ask room for.
pub const MAX_VALUES: u64 = 1 << 24;

/// Server-assigned token standing in for a native instance pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteHandle(pub u64);

impl std::fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shape-level checks run after every decode.
pub trait WireMessage: Serialize + for<'de> Deserialize<'de> {
    fn validate(&self) -> Result<(), WireError> {
        Ok(())
    }
}

fn check_count(field: &'static str, declared: u64, actual: usize) -> Result<(), WireError> {
    if declared != actual as u64 {
        return Err(WireError::CountMismatch {
            field,
            declared,
            actual,
        });
    }
    Ok(())
}

/// Request for calls that take nothing but the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub instance: RemoteHandle,
}

/// Response for calls that return nothing but a status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
}

/// Response for calls that return nothing at all (`fmi3FreeInstance`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoidResponse;

/// Arguments common to all three instantiation kinds.
///
/// Fields a kind does not use keep their defaults. Callbacks and the caller's
/// resource path stay on the client side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstantiateRequest {
    pub instance_name: String,
    pub instantiation_token: String,
    pub visible: bool,
    pub logging_on: bool,
    pub event_mode_used: bool,
    pub early_return_allowed: bool,
    pub required_intermediate_variables: Vec<u32>,
    pub n_required_intermediate_variables: u64,
}

impl InstantiateRequest {
    pub fn new(instance_name: impl Into<String>, instantiation_token: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            instantiation_token: instantiation_token.into(),
            ..Self::default()
        }
    }

    pub fn with_required_intermediate_variables(mut self, value_references: Vec<u32>) -> Self {
        self.n_required_intermediate_variables = value_references.len() as u64;
        self.required_intermediate_variables = value_references;
        self
    }
}

/// `None` when the native model refused to instantiate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantiateResponse {
    pub instance: Option<RemoteHandle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetDebugLoggingRequest {
    pub instance: RemoteHandle,
    pub logging_on: bool,
    pub categories: Vec<String>,
    pub n_categories: u64,
}

impl SetDebugLoggingRequest {
    pub fn new(instance: RemoteHandle, logging_on: bool, categories: Vec<String>) -> Self {
        Self {
            instance,
            logging_on,
            n_categories: categories.len() as u64,
            categories,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnterInitializationModeRequest {
    pub instance: RemoteHandle,
    pub tolerance_defined: bool,
    pub tolerance: f64,
    pub start_time: f64,
    pub stop_time_defined: bool,
    pub stop_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoStepRequest {
    pub instance: RemoteHandle,
    pub current_communication_point: f64,
    pub communication_step_size: f64,
    pub no_set_fmu_state_prior_to_current_point: bool,
}

/// Status plus the four output arguments of `fmi3DoStep`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoStepResponse {
    pub status: Status,
    pub event_handling_needed: bool,
    pub terminate_simulation: bool,
    pub early_return: bool,
    pub last_successful_time: f64,
}

impl DoStepResponse {
    pub fn failure(status: Status) -> Self {
        Self {
            status,
            event_handling_needed: false,
            terminate_simulation: false,
            early_return: false,
            last_successful_time: 0.0,
        }
    }
}

/// Status plus the six output arguments of `fmi3UpdateDiscreteStates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDiscreteStatesResponse {
    pub status: Status,
    pub discrete_states_need_update: bool,
    pub terminate_simulation: bool,
    pub nominals_of_continuous_states_changed: bool,
    pub values_of_continuous_states_changed: bool,
    pub next_event_time_defined: bool,
    pub next_event_time: f64,
}

impl UpdateDiscreteStatesResponse {
    pub fn failure(status: Status) -> Self {
        Self {
            status,
            discrete_states_need_update: false,
            terminate_simulation: false,
            nominals_of_continuous_states_changed: false,
            values_of_continuous_states_changed: false,
            next_event_time_defined: false,
            next_event_time: 0.0,
        }
    }
}

/// Read `n_values` values addressed by `value_references`.
///
/// The value kind is implied by the routing key. `n_values` is the caller's
/// output capacity and equals the reference count for scalar variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetValuesRequest {
    pub instance: RemoteHandle,
    pub value_references: Vec<u32>,
    pub n_value_references: u64,
    pub n_values: u64,
}

impl GetValuesRequest {
    pub fn new(instance: RemoteHandle, value_references: Vec<u32>, n_values: usize) -> Self {
        Self {
            instance,
            n_value_references: value_references.len() as u64,
            value_references,
            n_values: n_values as u64,
        }
    }

    /// `n_values` as a buffer length, once it is known to suit `kind`.
    pub fn capacity(&self, kind: ValueKind) -> Result<usize, WireError> {
        check_capacity(kind, self.value_references.len(), self.n_values)
    }
}

/// Check the room a caller offers for a read of `references` variables.
///
/// Strings, binaries and clocks are read one per reference. Other kinds may
/// address array variables, so they need at least one slot per reference.
/// Nothing may ask for more than [`MAX_VALUES`].
pub fn check_capacity(
    kind: ValueKind,
    references: usize,
    n_values: u64,
) -> Result<usize, WireError> {
    let one_per_reference = matches!(kind, ValueKind::String | ValueKind::Binary | ValueKind::Clock);
    let fits = if one_per_reference {
        n_values == references as u64
    } else {
        n_values >= references as u64
    };
    match usize::try_from(n_values) {
        Ok(capacity) if fits && n_values <= MAX_VALUES => Ok(capacity),
        _ => Err(WireError::Capacity {
            kind,
            references,
            n_values,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetValuesResponse {
    pub status: Status,
    pub values: Values,
    pub n_values: u64,
}

impl GetValuesResponse {
    pub fn new(status: Status, values: Values) -> Self {
        Self {
            status,
            n_values: values.len() as u64,
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetValuesRequest {
    pub instance: RemoteHandle,
    pub value_references: Vec<u32>,
    pub n_value_references: u64,
    pub values: Values,
    pub n_values: u64,
}

impl SetValuesRequest {
    pub fn new(instance: RemoteHandle, value_references: Vec<u32>, values: Values) -> Self {
        Self {
            instance,
            n_value_references: value_references.len() as u64,
            value_references,
            n_values: values.len() as u64,
            values,
        }
    }
}

/// One invocation of a native model's log callback.
///
/// `instance` names the remote instance the message came from, or `None` when
/// the model logged before a handle was assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub instance: Option<RemoteHandle>,
    pub status: Status,
    pub category: String,
    pub message: String,
}

impl WireMessage for InstanceRequest {}
impl WireMessage for StatusResponse {}
impl WireMessage for VoidResponse {}
impl WireMessage for InstantiateResponse {}
impl WireMessage for EnterInitializationModeRequest {}
impl WireMessage for DoStepRequest {}
impl WireMessage for DoStepResponse {}
impl WireMessage for UpdateDiscreteStatesResponse {}
impl WireMessage for LogEvent {}

impl WireMessage for InstantiateRequest {
    fn validate(&self) -> Result<(), WireError> {
        check_count(
            "required_intermediate_variables",
            self.n_required_intermediate_variables,
            self.required_intermediate_variables.len(),
        )
    }
}

impl WireMessage for SetDebugLoggingRequest {
    fn validate(&self) -> Result<(), WireError> {
        check_count("categories", self.n_categories, self.categories.len())
    }
}

impl WireMessage for GetValuesRequest {
    fn validate(&self) -> Result<(), WireError> {
        check_count(
            "value_references",
            self.n_value_references,
            self.value_references.len(),
        )
    }
}

impl WireMessage for GetValuesResponse {
    fn validate(&self) -> Result<(), WireError> {
        check_count("values", self.n_values, self.values.len())
    }
}

impl WireMessage for SetValuesRequest {
    fn validate(&self) -> Result<(), WireError> {
        check_count(
            "value_references",
            self.n_value_references,
            self.value_references.len(),
        )?;
        check_count("values", self.n_values, self.values.len())
    }
}
