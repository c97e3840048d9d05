// MIT License
// Copyright 2023--present liaison developers

//! The `fmi3*` entry points of the client stub.
//!
//! Every function here is answered by a query to the server that hosts the
//! real model. The host cannot tell: arguments are copied out of its arrays
//! before the call, results are copied back into its arrays after it, and log
//! messages the model emitted during the call reach the host's callback
//! before the function returns.
//!
//! A NULL instance is answered with `fmi3Fatal` without any round trip.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;
use std::ptr;

use super::instance::{report, HostLogger, RemoteInstance};
use crate::status::{catch_unwind, catch_unwind_or, fmi3Status, set_last_error, Status};
use crate::types::*;
use crate::wire::{InstantiateRequest, InstantiationKind, LifecycleOp, Scalar, ValueKind, Values};

/// Borrow a caller array. An empty array may be NULL.
///
/// # Safety
/// A non-null `ptr` must point to `len` readable elements.
pub(crate) unsafe fn input<'a, T>(ptr: *const T, len: usize) -> Option<&'a [T]> {
    if len == 0 {
        Some(&[])
    } else if ptr.is_null() {
        None
    } else {
        Some(unsafe { std::slice::from_raw_parts(ptr, len) })
    }
}

/// Borrow a caller output array. An empty array may be NULL.
///
/// # Safety
/// A non-null `ptr` must point to `len` writable elements.
pub(crate) unsafe fn output<'a, T>(ptr: *mut T, len: usize) -> Option<&'a mut [T]> {
    if len == 0 {
        Some(&mut [])
    } else if ptr.is_null() {
        None
    } else {
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }
}

/// Copy a possibly-null C string.
///
/// # Safety
/// A non-null `ptr` must point to a NUL-terminated string.
pub(crate) unsafe fn text(ptr: fmi3String) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

fn null_argument(remote: &RemoteInstance, function: &str) -> Status {
    report(
        remote.logger(),
        Status::Error,
        &format!("{function}: array argument is NULL"),
    );
    Status::Error
}

/// Run `f` against the instance behind `instance`, then relay its logs.
///
/// # Safety
/// `instance` must be NULL or a live pointer returned by an instantiate call.
unsafe fn with_instance<F>(instance: fmi3Instance, function: &str, f: F) -> fmi3Status
where
    F: FnOnce(&mut RemoteInstance) -> Status,
{
    catch_unwind(AssertUnwindSafe(|| {
        if instance.is_null() {
            set_last_error(&format!("{function}: instance is NULL"));
            return fmi3Status::fmi3Fatal;
        }
        let remote = unsafe { &mut *instance.cast::<RemoteInstance>() };
        remote.begin_call();
        let status = f(remote);
        remote.relay_logs();
        status.into()
    }))
}

struct Instantiation {
    kind: InstantiationKind,
    function: &'static str,
    request: InstantiateRequest,
    resource_path: Option<String>,
    logger: HostLogger,
}

fn instantiate(instantiation: Instantiation) -> fmi3Instance {
    let Instantiation {
        kind,
        function,
        request,
        resource_path,
        logger,
    } = instantiation;
    catch_unwind_or(
        ptr::null_mut(),
        AssertUnwindSafe(|| {
            match RemoteInstance::open(kind, &request, resource_path.as_deref(), logger) {
                Ok(Some(remote)) => Box::into_raw(Box::new(remote)).cast(),
                Ok(None) => ptr::null_mut(),
                Err(e) => {
                    report(&logger, e.status(), &format!("{function}: {e}"));
                    ptr::null_mut()
                }
            }
        }),
    )
}

unsafe fn base_request(
    instance_name: fmi3String,
    instantiation_token: fmi3String,
    visible: fmi3Boolean,
    logging_on: fmi3Boolean,
) -> InstantiateRequest {
    let mut request = InstantiateRequest::new(
        unsafe { text(instance_name) }.unwrap_or_default(),
        unsafe { text(instantiation_token) }.unwrap_or_default(),
    );
    request.visible = visible;
    request.logging_on = logging_on;
    request
}

#[no_mangle]
pub unsafe extern "C" fn fmi3GetVersion() -> *const c_char {
    FMI3_VERSION.as_ptr().cast()
}

#[no_mangle]
pub unsafe extern "C" fn fmi3InstantiateModelExchange(
    instance_name: fmi3String,
    instantiation_token: fmi3String,
    resource_path: fmi3String,
    visible: fmi3Boolean,
    logging_on: fmi3Boolean,
    instance_environment: fmi3InstanceEnvironment,
    log_message: fmi3LogMessageCallback,
) -> fmi3Instance {
    instantiate(Instantiation {
        kind: InstantiationKind::ModelExchange,
        function: "fmi3InstantiateModelExchange",
        request: unsafe { base_request(instance_name, instantiation_token, visible, logging_on) },
        resource_path: unsafe { text(resource_path) },
        logger: HostLogger::new(instance_environment, log_message),
    })
}

/// Instantiate for co-simulation.
///
/// Intermediate updates are not relayed; `intermediateUpdate` is never
/// called.
#[no_mangle]
pub unsafe extern "C" fn fmi3InstantiateCoSimulation(
    instance_name: fmi3String,
    instantiation_token: fmi3String,
    resource_path: fmi3String,
    visible: fmi3Boolean,
    logging_on: fmi3Boolean,
    event_mode_used: fmi3Boolean,
    early_return_allowed: fmi3Boolean,
    required_intermediate_variables: *const fmi3ValueReference,
    n_required_intermediate_variables: usize,
    instance_environment: fmi3InstanceEnvironment,
    log_message: fmi3LogMessageCallback,
    _intermediate_update: fmi3IntermediateUpdateCallback,
) -> fmi3Instance {
    let mut request = unsafe { base_request(instance_name, instantiation_token, visible, logging_on) };
    request.event_mode_used = event_mode_used;
    request.early_return_allowed = early_return_allowed;
    let required = unsafe {
        input(required_intermediate_variables, n_required_intermediate_variables)
    }
    .unwrap_or_default();
    instantiate(Instantiation {
        kind: InstantiationKind::CoSimulation,
        function: "fmi3InstantiateCoSimulation",
        request: request.with_required_intermediate_variables(required.to_vec()),
        resource_path: unsafe { text(resource_path) },
        logger: HostLogger::new(instance_environment, log_message),
    })
}

/// Instantiate for scheduled execution. Clock and preemption callbacks stay
/// on the server side.
#[no_mangle]
pub unsafe extern "C" fn fmi3InstantiateScheduledExecution(
    instance_name: fmi3String,
    instantiation_token: fmi3String,
    resource_path: fmi3String,
    visible: fmi3Boolean,
    logging_on: fmi3Boolean,
    instance_environment: fmi3InstanceEnvironment,
    log_message: fmi3LogMessageCallback,
    _clock_update: fmi3ClockUpdateCallback,
    _lock_preemption: fmi3LockPreemptionCallback,
    _unlock_preemption: fmi3UnlockPreemptionCallback,
) -> fmi3Instance {
    instantiate(Instantiation {
        kind: InstantiationKind::ScheduledExecution,
        function: "fmi3InstantiateScheduledExecution",
        request: unsafe { base_request(instance_name, instantiation_token, visible, logging_on) },
        resource_path: unsafe { text(resource_path) },
        logger: HostLogger::new(instance_environment, log_message),
    })
}

/// Free the instance. The stub's side is released even if the server
/// cannot be reached.
#[no_mangle]
pub unsafe extern "C" fn fmi3FreeInstance(instance: fmi3Instance) {
    catch_unwind_or(
        (),
        AssertUnwindSafe(|| {
            if instance.is_null() {
                return;
            }
            let remote = unsafe { Box::from_raw(instance.cast::<RemoteInstance>()) };
            remote.free();
        }),
    )
}

#[no_mangle]
pub unsafe extern "C" fn fmi3SetDebugLogging(
    instance: fmi3Instance,
    logging_on: fmi3Boolean,
    n_categories: usize,
    categories: *const fmi3String,
) -> fmi3Status {
    with_instance(instance, "fmi3SetDebugLogging", |remote| {
        let Some(categories) = (unsafe { input(categories, n_categories) }) else {
            return null_argument(remote, "fmi3SetDebugLogging");
        };
        let categories = categories
            .iter()
            .map(|c| unsafe { text(*c) }.unwrap_or_default())
            .collect();
        remote.set_debug_logging(logging_on, categories)
    })
}

#[no_mangle]
pub unsafe extern "C" fn fmi3EnterInitializationMode(
    instance: fmi3Instance,
    tolerance_defined: fmi3Boolean,
    tolerance: fmi3Float64,
    start_time: fmi3Float64,
    stop_time_defined: fmi3Boolean,
    stop_time: fmi3Float64,
) -> fmi3Status {
    with_instance(instance, "fmi3EnterInitializationMode", |remote| {
        remote.enter_initialization_mode(
            tolerance_defined.then_some(tolerance),
            start_time,
            stop_time_defined.then_some(stop_time),
        )
    })
}

macro_rules! lifecycle_functions {
    ($($name:ident => $op:ident,)*) => {$(
        #[no_mangle]
        pub unsafe extern "C" fn $name(instance: fmi3Instance) -> fmi3Status {
            with_instance(instance, stringify!($name), |remote| {
                remote.lifecycle(LifecycleOp::$op)
            })
        }
    )*};
}

lifecycle_functions! {
    fmi3ExitInitializationMode => ExitInitializationMode,
    fmi3EnterEventMode => EnterEventMode,
    fmi3EnterStepMode => EnterStepMode,
    fmi3EnterConfigurationMode => EnterConfigurationMode,
    fmi3ExitConfigurationMode => ExitConfigurationMode,
    fmi3Terminate => Terminate,
    fmi3Reset => Reset,
}

/// Write `value` through `out` unless the caller passed NULL.
unsafe fn store<T>(out: *mut T, value: T) {
    if !out.is_null() {
        unsafe { *out = value };
    }
}

#[no_mangle]
pub unsafe extern "C" fn fmi3DoStep(
    instance: fmi3Instance,
    current_communication_point: fmi3Float64,
    communication_step_size: fmi3Float64,
    no_set_fmu_state_prior_to_current_point: fmi3Boolean,
    event_handling_needed: *mut fmi3Boolean,
    terminate_simulation: *mut fmi3Boolean,
    early_return: *mut fmi3Boolean,
    last_successful_time: *mut fmi3Float64,
) -> fmi3Status {
    with_instance(instance, "fmi3DoStep", |remote| {
        let response = remote.do_step(
            current_communication_point,
            communication_step_size,
            no_set_fmu_state_prior_to_current_point,
        );
        unsafe {
            store(event_handling_needed, response.event_handling_needed);
            store(terminate_simulation, response.terminate_simulation);
            store(early_return, response.early_return);
            store(last_successful_time, response.last_successful_time);
        }
        response.status
    })
}

#[no_mangle]
pub unsafe extern "C" fn fmi3UpdateDiscreteStates(
    instance: fmi3Instance,
    discrete_states_need_update: *mut fmi3Boolean,
    terminate_simulation: *mut fmi3Boolean,
    nominals_of_continuous_states_changed: *mut fmi3Boolean,
    values_of_continuous_states_changed: *mut fmi3Boolean,
    next_event_time_defined: *mut fmi3Boolean,
    next_event_time: *mut fmi3Float64,
) -> fmi3Status {
    with_instance(instance, "fmi3UpdateDiscreteStates", |remote| {
        let response = remote.update_discrete_states();
        unsafe {
            store(discrete_states_need_update, response.discrete_states_need_update);
            store(terminate_simulation, response.terminate_simulation);
            store(
                nominals_of_continuous_states_changed,
                response.nominals_of_continuous_states_changed,
            );
            store(
                values_of_continuous_states_changed,
                response.values_of_continuous_states_changed,
            );
            store(next_event_time_defined, response.next_event_time_defined);
            store(next_event_time, response.next_event_time);
        }
        response.status
    })
}

fn get_scalars<T: Scalar>(
    remote: &mut RemoteInstance,
    kind: ValueKind,
    value_references: &[u32],
    out: &mut [T],
) -> Status {
    let (status, values) = remote.get_values(kind, value_references, out.len());
    if let Some(received) = values.as_scalars::<T>() {
        let n = received.len().min(out.len());
        out[..n].copy_from_slice(&received[..n]);
    }
    status
}

fn set_scalars<T: Scalar>(
    remote: &mut RemoteInstance,
    kind: ValueKind,
    value_references: &[u32],
    values: &[T],
) -> Status {
    match Values::from_scalars(kind, values.to_vec()) {
        Some(values) => remote.set_values(value_references, values),
        None => Status::Error,
    }
}

macro_rules! scalar_accessors {
    ($($kind:ident: $ty:ty => $get:ident, $set:ident;)*) => {$(
        #[no_mangle]
        pub unsafe extern "C" fn $get(
            instance: fmi3Instance,
            value_references: *const fmi3ValueReference,
            n_value_references: usize,
            values: *mut $ty,
            n_values: usize,
        ) -> fmi3Status {
            with_instance(instance, stringify!($get), |remote| {
                let vrs = unsafe { input(value_references, n_value_references) };
                let out = unsafe { output(values, n_values) };
                let (Some(vrs), Some(out)) = (vrs, out) else {
                    return null_argument(remote, stringify!($get));
                };
                get_scalars(remote, ValueKind::$kind, vrs, out)
            })
        }

        #[no_mangle]
        pub unsafe extern "C" fn $set(
            instance: fmi3Instance,
            value_references: *const fmi3ValueReference,
            n_value_references: usize,
            values: *const $ty,
            n_values: usize,
        ) -> fmi3Status {
            with_instance(instance, stringify!($set), |remote| {
                let vrs = unsafe { input(value_references, n_value_references) };
                let values = unsafe { input(values, n_values) };
                let (Some(vrs), Some(values)) = (vrs, values) else {
                    return null_argument(remote, stringify!($set));
                };
                set_scalars(remote, ValueKind::$kind, vrs, values)
            })
        }
    )*};
}

scalar_accessors! {
    Float32: fmi3Float32 => fmi3GetFloat32, fmi3SetFloat32;
    Float64: fmi3Float64 => fmi3GetFloat64, fmi3SetFloat64;
    Int8: fmi3Int8 => fmi3GetInt8, fmi3SetInt8;
    UInt8: fmi3UInt8 => fmi3GetUInt8, fmi3SetUInt8;
    Int16: fmi3Int16 => fmi3GetInt16, fmi3SetInt16;
    UInt16: fmi3UInt16 => fmi3GetUInt16, fmi3SetUInt16;
    Int32: fmi3Int32 => fmi3GetInt32, fmi3SetInt32;
    UInt32: fmi3UInt32 => fmi3GetUInt32, fmi3SetUInt32;
    Int64: fmi3Int64 => fmi3GetInt64, fmi3SetInt64;
    UInt64: fmi3UInt64 => fmi3GetUInt64, fmi3SetUInt64;
    Boolean: fmi3Boolean => fmi3GetBoolean, fmi3SetBoolean;
}

/// The returned strings stay valid until the next call on `instance`.
#[no_mangle]
pub unsafe extern "C" fn fmi3GetString(
    instance: fmi3Instance,
    value_references: *const fmi3ValueReference,
    n_value_references: usize,
    values: *mut fmi3String,
    n_values: usize,
) -> fmi3Status {
    with_instance(instance, "fmi3GetString", |remote| {
        let vrs = unsafe { input(value_references, n_value_references) };
        let out = unsafe { output(values, n_values) };
        let (Some(vrs), Some(out)) = (vrs, out) else {
            return null_argument(remote, "fmi3GetString");
        };
        let (status, received) = remote.get_values(ValueKind::String, vrs, out.len());
        if let Values::String(strings) = received {
            for (slot, pointer) in out.iter_mut().zip(remote.retain_strings(strings)) {
                *slot = pointer;
            }
        }
        status
    })
}

#[no_mangle]
pub unsafe extern "C" fn fmi3SetString(
    instance: fmi3Instance,
    value_references: *const fmi3ValueReference,
    n_value_references: usize,
    values: *const fmi3String,
    n_values: usize,
) -> fmi3Status {
    with_instance(instance, "fmi3SetString", |remote| {
        let vrs = unsafe { input(value_references, n_value_references) };
        let values = unsafe { input(values, n_values) };
        let (Some(vrs), Some(values)) = (vrs, values) else {
            return null_argument(remote, "fmi3SetString");
        };
        let strings = values
            .iter()
            .map(|s| unsafe { text(*s) }.unwrap_or_default())
            .collect();
        remote.set_values(vrs, Values::String(strings))
    })
}

/// The returned buffers stay valid until the next call on `instance`.
#[no_mangle]
pub unsafe extern "C" fn fmi3GetBinary(
    instance: fmi3Instance,
    value_references: *const fmi3ValueReference,
    n_value_references: usize,
    value_sizes: *mut usize,
    values: *mut fmi3Binary,
    n_values: usize,
) -> fmi3Status {
    with_instance(instance, "fmi3GetBinary", |remote| {
        let vrs = unsafe { input(value_references, n_value_references) };
        let sizes = unsafe { output(value_sizes, n_values) };
        let out = unsafe { output(values, n_values) };
        let (Some(vrs), Some(sizes), Some(out)) = (vrs, sizes, out) else {
            return null_argument(remote, "fmi3GetBinary");
        };
        let (status, received) = remote.get_values(ValueKind::Binary, vrs, out.len());
        if let Values::Binary(binaries) = received {
            let retained = remote.retain_binaries(binaries);
            for ((size, slot), (len, pointer)) in sizes.iter_mut().zip(out.iter_mut()).zip(retained) {
                *size = len;
                *slot = pointer;
            }
        }
        status
    })
}

#[no_mangle]
pub unsafe extern "C" fn fmi3SetBinary(
    instance: fmi3Instance,
    value_references: *const fmi3ValueReference,
    n_value_references: usize,
    value_sizes: *const usize,
    values: *const fmi3Binary,
    n_values: usize,
) -> fmi3Status {
    with_instance(instance, "fmi3SetBinary", |remote| {
        let vrs = unsafe { input(value_references, n_value_references) };
        let sizes = unsafe { input(value_sizes, n_values) };
        let values = unsafe { input(values, n_values) };
        let (Some(vrs), Some(sizes), Some(values)) = (vrs, sizes, values) else {
            return null_argument(remote, "fmi3SetBinary");
        };
        let mut binaries = Vec::with_capacity(values.len());
        for (&pointer, &size) in values.iter().zip(sizes) {
            let Some(bytes) = (unsafe { input(pointer, size) }) else {
                return null_argument(remote, "fmi3SetBinary");
            };
            binaries.push(bytes.to_vec());
        }
        remote.set_values(vrs, Values::Binary(binaries))
    })
}

/// Clocks have one value per reference and no separate `nValues`.
#[no_mangle]
pub unsafe extern "C" fn fmi3GetClock(
    instance: fmi3Instance,
    value_references: *const fmi3ValueReference,
    n_value_references: usize,
    values: *mut fmi3Clock,
) -> fmi3Status {
    with_instance(instance, "fmi3GetClock", |remote| {
        let vrs = unsafe { input(value_references, n_value_references) };
        let out = unsafe { output(values, n_value_references) };
        let (Some(vrs), Some(out)) = (vrs, out) else {
            return null_argument(remote, "fmi3GetClock");
        };
        get_scalars(remote, ValueKind::Clock, vrs, out)
    })
}

#[no_mangle]
pub unsafe extern "C" fn fmi3SetClock(
    instance: fmi3Instance,
    value_references: *const fmi3ValueReference,
    n_value_references: usize,
    values: *const fmi3Clock,
) -> fmi3Status {
    with_instance(instance, "fmi3SetClock", |remote| {
        let vrs = unsafe { input(value_references, n_value_references) };
        let values = unsafe { input(values, n_value_references) };
        let (Some(vrs), Some(values)) = (vrs, values) else {
            return null_argument(remote, "fmi3SetClock");
        };
        set_scalars(remote, ValueKind::Clock, vrs, values)
    })
}
