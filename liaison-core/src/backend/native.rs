// MIT License
// Copyright 2023--present liaison developers

//! Dynamic-loading adapter: binds an FMI 3.0 model library at runtime.
//!
//! Every catalogue function is resolved by its exact symbol name when the
//! library is loaded. A single missing symbol fails [`NativeModel::load`], so
//! an incomplete library is reported at startup instead of on first use.
//!
//! ## Memory Model
//!
//! - Input arrays are copied out of the decoded request into buffers owned by
//!   this module for the duration of the native call.
//! - Output buffers are sized to the caller's declared capacity before the
//!   call. Strings and binaries written by the model are copied out before
//!   the next call can invalidate them.
//! - Each instance owns a boxed [`InstanceLogger`] whose address is the
//!   `fmi3InstanceEnvironment` handed to the model. The box outlives the
//!   native instance.
//! - Statuses are read back as plain `c_int` so an out-of-range value from a
//!   misbehaving model is reported as `Error` rather than producing an
//!   invalid enum.

use std::ffi::{CStr, CString};
use std::os::raw::{c_int, c_void};
use std::path::{Path, PathBuf};
use std::ptr;

use libloading::Library;
use thiserror::Error;

use crate::backend::{BackendError, InstanceLogger, ModelBackend};
use crate::status::{fmi3Status, Status};
use crate::types::{
    fmi3Binary, fmi3Boolean, fmi3Float64, fmi3Instance, fmi3InstanceEnvironment,
    fmi3IntermediateUpdateCallback, fmi3String, fmi3ValueReference,
};
use crate::wire::{
    check_capacity, DoStepRequest, DoStepResponse, EnterInitializationModeRequest, Function,
    InstantiateRequest, InstantiationKind, LifecycleOp, Scalar, UpdateDiscreteStatesResponse,
    ValueKind, Values,
};

#[derive(Debug, Error)]
pub enum NativeError {
    #[error("failed to load model library {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("model library does not export `{symbol}`: {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
    #[error("resource path {} cannot be passed to C", path.display())]
    ResourcePath { path: PathBuf },
}

type NativeStatus = c_int;

type LogCallback = Option<
    unsafe extern "C" fn(fmi3InstanceEnvironment, NativeStatus, fmi3String, fmi3String),
>;

type InstantiateModelExchangeFn = unsafe extern "C" fn(
    fmi3String,
    fmi3String,
    fmi3String,
    fmi3Boolean,
    fmi3Boolean,
    fmi3InstanceEnvironment,
    LogCallback,
) -> fmi3Instance;

type InstantiateCoSimulationFn = unsafe extern "C" fn(
    fmi3String,
    fmi3String,
    fmi3String,
    fmi3Boolean,
    fmi3Boolean,
    fmi3Boolean,
    fmi3Boolean,
    *const fmi3ValueReference,
    usize,
    fmi3InstanceEnvironment,
    LogCallback,
    fmi3IntermediateUpdateCallback,
) -> fmi3Instance;

type InstantiateScheduledExecutionFn = unsafe extern "C" fn(
    fmi3String,
    fmi3String,
    fmi3String,
    fmi3Boolean,
    fmi3Boolean,
    fmi3InstanceEnvironment,
    LogCallback,
    Option<unsafe extern "C" fn(fmi3InstanceEnvironment)>,
    Option<unsafe extern "C" fn()>,
    Option<unsafe extern "C" fn()>,
) -> fmi3Instance;

type FreeInstanceFn = unsafe extern "C" fn(fmi3Instance);

type SetDebugLoggingFn =
    unsafe extern "C" fn(fmi3Instance, fmi3Boolean, usize, *const fmi3String) -> NativeStatus;

type EnterInitializationModeFn = unsafe extern "C" fn(
    fmi3Instance,
    fmi3Boolean,
    fmi3Float64,
    fmi3Float64,
    fmi3Boolean,
    fmi3Float64,
) -> NativeStatus;

type InstanceFn = unsafe extern "C" fn(fmi3Instance) -> NativeStatus;

type DoStepFn = unsafe extern "C" fn(
    fmi3Instance,
    fmi3Float64,
    fmi3Float64,
    fmi3Boolean,
    *mut fmi3Boolean,
    *mut fmi3Boolean,
    *mut fmi3Boolean,
    *mut fmi3Float64,
) -> NativeStatus;

type UpdateDiscreteStatesFn = unsafe extern "C" fn(
    fmi3Instance,
    *mut fmi3Boolean,
    *mut fmi3Boolean,
    *mut fmi3Boolean,
    *mut fmi3Boolean,
    *mut fmi3Boolean,
    *mut fmi3Float64,
) -> NativeStatus;

type GetFn<T> =
    unsafe extern "C" fn(fmi3Instance, *const fmi3ValueReference, usize, *mut T, usize) -> NativeStatus;
type SetFn<T> = unsafe extern "C" fn(
    fmi3Instance,
    *const fmi3ValueReference,
    usize,
    *const T,
    usize,
) -> NativeStatus;

type GetBinaryFn = unsafe extern "C" fn(
    fmi3Instance,
    *const fmi3ValueReference,
    usize,
    *mut usize,
    *mut fmi3Binary,
    usize,
) -> NativeStatus;
type SetBinaryFn = unsafe extern "C" fn(
    fmi3Instance,
    *const fmi3ValueReference,
    usize,
    *const usize,
    *const fmi3Binary,
    usize,
) -> NativeStatus;

type GetClockFn =
    unsafe extern "C" fn(fmi3Instance, *const fmi3ValueReference, usize, *mut bool) -> NativeStatus;
type SetClockFn =
    unsafe extern "C" fn(fmi3Instance, *const fmi3ValueReference, usize, *const bool) -> NativeStatus;

/// Resolve one catalogue function by its symbol name.
///
/// # Safety
/// `T` must be the function pointer type matching the symbol's C signature.
unsafe fn bind<T: Copy>(library: &Library, function: Function) -> Result<T, NativeError> {
    let symbol = function.name();
    let resolved = unsafe { library.get::<T>(symbol.as_bytes()) }
        .map_err(|source| NativeError::MissingSymbol { symbol, source })?;
    Ok(*resolved)
}

/// Every function pointer the dispatcher can reach.
#[derive(Clone, Copy)]
struct Api {
    instantiate_model_exchange: InstantiateModelExchangeFn,
    instantiate_co_simulation: InstantiateCoSimulationFn,
    instantiate_scheduled_execution: InstantiateScheduledExecutionFn,
    free_instance: FreeInstanceFn,
    set_debug_logging: SetDebugLoggingFn,
    enter_initialization_mode: EnterInitializationModeFn,
    exit_initialization_mode: InstanceFn,
    enter_event_mode: InstanceFn,
    enter_step_mode: InstanceFn,
    enter_configuration_mode: InstanceFn,
    exit_configuration_mode: InstanceFn,
    terminate: InstanceFn,
    reset: InstanceFn,
    do_step: DoStepFn,
    update_discrete_states: UpdateDiscreteStatesFn,
    get_float32: GetFn<f32>,
    get_float64: GetFn<f64>,
    get_int8: GetFn<i8>,
    get_uint8: GetFn<u8>,
    get_int16: GetFn<i16>,
    get_uint16: GetFn<u16>,
    get_int32: GetFn<i32>,
    get_uint32: GetFn<u32>,
    get_int64: GetFn<i64>,
    get_uint64: GetFn<u64>,
    get_boolean: GetFn<bool>,
    get_string: GetFn<fmi3String>,
    get_binary: GetBinaryFn,
    get_clock: GetClockFn,
    set_float32: SetFn<f32>,
    set_float64: SetFn<f64>,
    set_int8: SetFn<i8>,
    set_uint8: SetFn<u8>,
    set_int16: SetFn<i16>,
    set_uint16: SetFn<u16>,
    set_int32: SetFn<i32>,
    set_uint32: SetFn<u32>,
    set_int64: SetFn<i64>,
    set_uint64: SetFn<u64>,
    set_boolean: SetFn<bool>,
    set_string: SetFn<fmi3String>,
    set_binary: SetBinaryFn,
    set_clock: SetClockFn,
}

impl Api {
    /// # Safety
    /// `library` must be an FMI 3.0 model library.
    unsafe fn bind_all(library: &Library) -> Result<Self, NativeError> {
        use Function::{GetValues as Get, Lifecycle, SetValues as Set};
        use ValueKind as K;

        unsafe {
            Ok(Self {
                instantiate_model_exchange: bind(
                    library,
                    Function::Instantiate(InstantiationKind::ModelExchange),
                )?,
                instantiate_co_simulation: bind(
                    library,
                    Function::Instantiate(InstantiationKind::CoSimulation),
                )?,
                instantiate_scheduled_execution: bind(
                    library,
                    Function::Instantiate(InstantiationKind::ScheduledExecution),
                )?,
                free_instance: bind(library, Function::FreeInstance)?,
                set_debug_logging: bind(library, Function::SetDebugLogging)?,
                enter_initialization_mode: bind(library, Function::EnterInitializationMode)?,
                exit_initialization_mode: bind(
                    library,
                    Lifecycle(LifecycleOp::ExitInitializationMode),
                )?,
                enter_event_mode: bind(library, Lifecycle(LifecycleOp::EnterEventMode))?,
                enter_step_mode: bind(library, Lifecycle(LifecycleOp::EnterStepMode))?,
                enter_configuration_mode: bind(
                    library,
                    Lifecycle(LifecycleOp::EnterConfigurationMode),
                )?,
                exit_configuration_mode: bind(
                    library,
                    Lifecycle(LifecycleOp::ExitConfigurationMode),
                )?,
                terminate: bind(library, Lifecycle(LifecycleOp::Terminate))?,
                reset: bind(library, Lifecycle(LifecycleOp::Reset))?,
                do_step: bind(library, Function::DoStep)?,
                update_discrete_states: bind(library, Function::UpdateDiscreteStates)?,
                get_float32: bind(library, Get(K::Float32))?,
                get_float64: bind(library, Get(K::Float64))?,
                get_int8: bind(library, Get(K::Int8))?,
                get_uint8: bind(library, Get(K::UInt8))?,
                get_int16: bind(library, Get(K::Int16))?,
                get_uint16: bind(library, Get(K::UInt16))?,
                get_int32: bind(library, Get(K::Int32))?,
                get_uint32: bind(library, Get(K::UInt32))?,
                get_int64: bind(library, Get(K::Int64))?,
                get_uint64: bind(library, Get(K::UInt64))?,
                get_boolean: bind(library, Get(K::Boolean))?,
                get_string: bind(library, Get(K::String))?,
                get_binary: bind(library, Get(K::Binary))?,
                get_clock: bind(library, Get(K::Clock))?,
                set_float32: bind(library, Set(K::Float32))?,
                set_float64: bind(library, Set(K::Float64))?,
                set_int8: bind(library, Set(K::Int8))?,
                set_uint8: bind(library, Set(K::UInt8))?,
                set_int16: bind(library, Set(K::Int16))?,
                set_uint16: bind(library, Set(K::UInt16))?,
                set_int32: bind(library, Set(K::Int32))?,
                set_uint32: bind(library, Set(K::UInt32))?,
                set_int64: bind(library, Set(K::Int64))?,
                set_uint64: bind(library, Set(K::UInt64))?,
                set_boolean: bind(library, Set(K::Boolean))?,
                set_string: bind(library, Set(K::String))?,
                set_binary: bind(library, Set(K::Binary))?,
                set_clock: bind(library, Set(K::Clock))?,
            })
        }
    }

    fn lifecycle(&self, op: LifecycleOp) -> InstanceFn {
        match op {
            LifecycleOp::ExitInitializationMode => self.exit_initialization_mode,
            LifecycleOp::EnterEventMode => self.enter_event_mode,
            LifecycleOp::EnterStepMode => self.enter_step_mode,
            LifecycleOp::EnterConfigurationMode => self.enter_configuration_mode,
            LifecycleOp::ExitConfigurationMode => self.exit_configuration_mode,
            LifecycleOp::Terminate => self.terminate,
            LifecycleOp::Reset => self.reset,
        }
    }
}

/// A loaded model library with all catalogue functions bound.
///
/// Dropping it unloads the library; free every instance first.
pub struct NativeModel {
    api: Api,
    resource_path: Option<CString>,
    _library: Library,
}

/// One live native instance.
pub struct NativeInstance {
    raw: fmi3Instance,
    _logger: Box<InstanceLogger>,
}

// The raw instance pointer is only used by the thread holding the
// dispatcher's per-instance lock.
unsafe impl Send for NativeInstance {}

impl NativeModel {
    /// Load `library_path` and bind every catalogue function.
    ///
    /// `resource_dir` is passed to instantiate as the unit's `resources/`
    /// location.
    pub fn load(library_path: &Path, resource_dir: Option<&Path>) -> Result<Self, NativeError> {
        let resource_path = resource_dir
            .map(|dir| {
                let mut text = dir.display().to_string();
                if !text.ends_with(std::path::MAIN_SEPARATOR) {
                    text.push(std::path::MAIN_SEPARATOR);
                }
                CString::new(text).map_err(|_| NativeError::ResourcePath {
                    path: dir.to_path_buf(),
                })
            })
            .transpose()?;

        let library = unsafe { Library::new(library_path) }.map_err(|source| NativeError::Load {
            path: library_path.to_path_buf(),
            source,
        })?;
        let api = unsafe { Api::bind_all(&library)? };

        tracing::info!(library = %library_path.display(), "bound model library");
        Ok(Self {
            api,
            resource_path,
            _library: library,
        })
    }
}

fn c_string(field: &str, text: &str) -> Result<CString, BackendError> {
    CString::new(text)
        .map_err(|_| BackendError::InvalidArgument(format!("{field} contains an interior NUL byte")))
}

/// Copy a possibly-null C string.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn lossy(ptr: fmi3String) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

/// Pointer to the first element, or null for an empty slice.
fn array_ptr<T>(slice: &[T]) -> *const T {
    if slice.is_empty() {
        ptr::null()
    } else {
        slice.as_ptr()
    }
}

unsafe extern "C" fn log_trampoline(
    environment: fmi3InstanceEnvironment,
    status: NativeStatus,
    category: fmi3String,
    message: fmi3String,
) {
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        if environment.is_null() {
            return;
        }
        let logger = unsafe { &*(environment as *const InstanceLogger) };
        let category = unsafe { lossy(category) };
        let message = unsafe { lossy(message) };
        logger.log(Status::from_raw(status), &category, &message);
    }));
}

unsafe extern "C" fn clock_update(_environment: fmi3InstanceEnvironment) {
    tracing::debug!("model reported a clock update");
}

unsafe extern "C" fn preemption_noop() {}

unsafe fn get_scalars<T: Scalar>(
    raw: fmi3Instance,
    get: GetFn<T>,
    kind: ValueKind,
    value_references: &[u32],
    n_values: usize,
) -> Result<(Status, Values), BackendError> {
    let mut out = vec![T::default(); n_values];
    let status = unsafe {
        get(
            raw,
            array_ptr(value_references),
            value_references.len(),
            out.as_mut_ptr(),
            out.len(),
        )
    };
    let values = Values::from_scalars(kind, out).ok_or(BackendError::UnsupportedKind {
        kind,
        function: "get",
    })?;
    Ok((Status::from_raw(status), values))
}

unsafe fn set_scalars<T: Scalar>(
    raw: fmi3Instance,
    set: SetFn<T>,
    value_references: &[u32],
    values: &Values,
) -> Result<Status, BackendError> {
    let slice = values
        .as_scalars::<T>()
        .ok_or(BackendError::UnsupportedKind {
            kind: values.kind(),
            function: "set",
        })?;
    let status = unsafe {
        set(
            raw,
            array_ptr(value_references),
            value_references.len(),
            array_ptr(slice),
            slice.len(),
        )
    };
    Ok(Status::from_raw(status))
}

impl ModelBackend for NativeModel {
    type Instance = NativeInstance;

    fn instantiate(
        &self,
        kind: InstantiationKind,
        request: &InstantiateRequest,
        logger: InstanceLogger,
    ) -> Result<Option<NativeInstance>, BackendError> {
        let name = c_string("instance name", &request.instance_name)?;
        let token = c_string("instantiation token", &request.instantiation_token)?;
        let resource = self
            .resource_path
            .as_ref()
            .map_or(ptr::null(), |path| path.as_ptr());

        let logger = Box::new(logger);
        let environment = &*logger as *const InstanceLogger as *mut c_void;
        let log: LogCallback = Some(log_trampoline);

        let raw = unsafe {
            match kind {
                InstantiationKind::ModelExchange => (self.api.instantiate_model_exchange)(
                    name.as_ptr(),
                    token.as_ptr(),
                    resource,
                    request.visible,
                    request.logging_on,
                    environment,
                    log,
                ),
                InstantiationKind::CoSimulation => (self.api.instantiate_co_simulation)(
                    name.as_ptr(),
                    token.as_ptr(),
                    resource,
                    request.visible,
                    request.logging_on,
                    request.event_mode_used,
                    request.early_return_allowed,
                    array_ptr(&request.required_intermediate_variables),
                    request.required_intermediate_variables.len(),
                    environment,
                    log,
                    None,
                ),
                InstantiationKind::ScheduledExecution => {
                    (self.api.instantiate_scheduled_execution)(
                        name.as_ptr(),
                        token.as_ptr(),
                        resource,
                        request.visible,
                        request.logging_on,
                        environment,
                        log,
                        Some(clock_update),
                        Some(preemption_noop),
                        Some(preemption_noop),
                    )
                }
            }
        };

        if raw.is_null() {
            return Ok(None);
        }
        Ok(Some(NativeInstance {
            raw,
            _logger: logger,
        }))
    }

    fn free_instance(&self, instance: NativeInstance) -> Result<(), BackendError> {
        unsafe { (self.api.free_instance)(instance.raw) };
        drop(instance);
        Ok(())
    }

    fn set_debug_logging(
        &self,
        instance: &mut NativeInstance,
        logging_on: bool,
        categories: &[String],
    ) -> Result<Status, BackendError> {
        let owned = categories
            .iter()
            .map(|c| c_string("log category", c))
            .collect::<Result<Vec<_>, _>>()?;
        let pointers: Vec<fmi3String> = owned.iter().map(|c| c.as_ptr()).collect();
        let status = unsafe {
            (self.api.set_debug_logging)(
                instance.raw,
                logging_on,
                pointers.len(),
                array_ptr(&pointers),
            )
        };
        Ok(Status::from_raw(status))
    }

    fn enter_initialization_mode(
        &self,
        instance: &mut NativeInstance,
        request: &EnterInitializationModeRequest,
    ) -> Result<Status, BackendError> {
        let status = unsafe {
            (self.api.enter_initialization_mode)(
                instance.raw,
                request.tolerance_defined,
                request.tolerance,
                request.start_time,
                request.stop_time_defined,
                request.stop_time,
            )
        };
        Ok(Status::from_raw(status))
    }

    fn lifecycle(&self, instance: &mut NativeInstance, op: LifecycleOp) -> Result<Status, BackendError> {
        let status = unsafe { (self.api.lifecycle(op))(instance.raw) };
        Ok(Status::from_raw(status))
    }

    fn do_step(
        &self,
        instance: &mut NativeInstance,
        request: &DoStepRequest,
    ) -> Result<DoStepResponse, BackendError> {
        let mut event_handling_needed = false;
        let mut terminate_simulation = false;
        let mut early_return = false;
        let mut last_successful_time = request.current_communication_point;
        let status = unsafe {
            (self.api.do_step)(
                instance.raw,
                request.current_communication_point,
                request.communication_step_size,
                request.no_set_fmu_state_prior_to_current_point,
                &mut event_handling_needed,
                &mut terminate_simulation,
                &mut early_return,
                &mut last_successful_time,
            )
        };
        Ok(DoStepResponse {
            status: Status::from_raw(status),
            event_handling_needed,
            terminate_simulation,
            early_return,
            last_successful_time,
        })
    }

    fn update_discrete_states(
        &self,
        instance: &mut NativeInstance,
    ) -> Result<UpdateDiscreteStatesResponse, BackendError> {
        let mut response = UpdateDiscreteStatesResponse::failure(Status::Ok);
        let status = unsafe {
            (self.api.update_discrete_states)(
                instance.raw,
                &mut response.discrete_states_need_update,
                &mut response.terminate_simulation,
                &mut response.nominals_of_continuous_states_changed,
                &mut response.values_of_continuous_states_changed,
                &mut response.next_event_time_defined,
                &mut response.next_event_time,
            )
        };
        response.status = Status::from_raw(status);
        Ok(response)
    }

    fn get_values(
        &self,
        instance: &mut NativeInstance,
        kind: ValueKind,
        value_references: &[u32],
        n_values: usize,
    ) -> Result<(Status, Values), BackendError> {
        // Buffers below are sized by n_values.
        check_capacity(kind, value_references.len(), n_values as u64)
            .map_err(|e| BackendError::InvalidArgument(e.to_string()))?;
        let raw = instance.raw;
        let api = &self.api;
        let vrs = value_references;
        unsafe {
            match kind {
                ValueKind::Float32 => get_scalars(raw, api.get_float32, kind, vrs, n_values),
                ValueKind::Float64 => get_scalars(raw, api.get_float64, kind, vrs, n_values),
                ValueKind::Int8 => get_scalars(raw, api.get_int8, kind, vrs, n_values),
                ValueKind::UInt8 => get_scalars(raw, api.get_uint8, kind, vrs, n_values),
                ValueKind::Int16 => get_scalars(raw, api.get_int16, kind, vrs, n_values),
                ValueKind::UInt16 => get_scalars(raw, api.get_uint16, kind, vrs, n_values),
                ValueKind::Int32 => get_scalars(raw, api.get_int32, kind, vrs, n_values),
                ValueKind::UInt32 => get_scalars(raw, api.get_uint32, kind, vrs, n_values),
                ValueKind::Int64 => get_scalars(raw, api.get_int64, kind, vrs, n_values),
                ValueKind::UInt64 => get_scalars(raw, api.get_uint64, kind, vrs, n_values),
                ValueKind::Boolean => get_scalars(raw, api.get_boolean, kind, vrs, n_values),
                ValueKind::String => {
                    let mut out: Vec<fmi3String> = vec![ptr::null(); n_values];
                    let status =
                        (api.get_string)(raw, array_ptr(vrs), vrs.len(), out.as_mut_ptr(), n_values);
                    let strings = out.into_iter().map(|p| lossy(p)).collect();
                    Ok((Status::from_raw(status), Values::String(strings)))
                }
                ValueKind::Binary => {
                    let mut sizes = vec![0usize; n_values];
                    let mut out: Vec<fmi3Binary> = vec![ptr::null(); n_values];
                    let status = (api.get_binary)(
                        raw,
                        array_ptr(vrs),
                        vrs.len(),
                        sizes.as_mut_ptr(),
                        out.as_mut_ptr(),
                        n_values,
                    );
                    let blobs = out
                        .into_iter()
                        .zip(sizes)
                        .map(|(p, size)| {
                            if p.is_null() || size == 0 {
                                Vec::new()
                            } else {
                                std::slice::from_raw_parts(p, size).to_vec()
                            }
                        })
                        .collect();
                    Ok((Status::from_raw(status), Values::Binary(blobs)))
                }
                ValueKind::Clock => {
                    // fmi3GetClock has no capacity argument and writes one
                    // value per reference.
                    let mut out = vec![false; vrs.len()];
                    let status = (api.get_clock)(raw, array_ptr(vrs), vrs.len(), out.as_mut_ptr());
                    Ok((Status::from_raw(status), Values::Clock(out)))
                }
            }
        }
    }

    fn set_values(
        &self,
        instance: &mut NativeInstance,
        value_references: &[u32],
        values: &Values,
    ) -> Result<Status, BackendError> {
        let raw = instance.raw;
        let api = &self.api;
        let vrs = value_references;
        unsafe {
            match values {
                Values::Float32(_) => set_scalars(raw, api.set_float32, vrs, values),
                Values::Float64(_) => set_scalars(raw, api.set_float64, vrs, values),
                Values::Int8(_) => set_scalars(raw, api.set_int8, vrs, values),
                Values::UInt8(_) => set_scalars(raw, api.set_uint8, vrs, values),
                Values::Int16(_) => set_scalars(raw, api.set_int16, vrs, values),
                Values::UInt16(_) => set_scalars(raw, api.set_uint16, vrs, values),
                Values::Int32(_) => set_scalars(raw, api.set_int32, vrs, values),
                Values::UInt32(_) => set_scalars(raw, api.set_uint32, vrs, values),
                Values::Int64(_) => set_scalars(raw, api.set_int64, vrs, values),
                Values::UInt64(_) => set_scalars(raw, api.set_uint64, vrs, values),
                Values::Boolean(_) => set_scalars(raw, api.set_boolean, vrs, values),
                Values::String(strings) => {
                    let owned = strings
                        .iter()
                        .map(|s| c_string("string value", s))
                        .collect::<Result<Vec<_>, _>>()?;
                    let pointers: Vec<fmi3String> = owned.iter().map(|c| c.as_ptr()).collect();
                    let status = (api.set_string)(
                        raw,
                        array_ptr(vrs),
                        vrs.len(),
                        array_ptr(&pointers),
                        pointers.len(),
                    );
                    Ok(Status::from_raw(status))
                }
                Values::Binary(blobs) => {
                    let buffer: Vec<u8> = blobs.concat();
                    let sizes: Vec<usize> = blobs.iter().map(Vec::len).collect();
                    let mut offset = 0;
                    let pointers: Vec<fmi3Binary> = sizes
                        .iter()
                        .map(|size| {
                            let p = buffer.as_ptr().wrapping_add(offset);
                            offset += size;
                            p
                        })
                        .collect();
                    let status = (api.set_binary)(
                        raw,
                        array_ptr(vrs),
                        vrs.len(),
                        array_ptr(&sizes),
                        array_ptr(&pointers),
                        pointers.len(),
                    );
                    Ok(Status::from_raw(status))
                }
                Values::Clock(clocks) => {
                    let status = (api.set_clock)(raw, array_ptr(vrs), vrs.len(), array_ptr(clocks));
                    Ok(Status::from_raw(status))
                }
            }
        }
    }
}

// The trampoline's status parameter is read as a plain integer.
const _: () = assert!(std::mem::size_of::<fmi3Status>() == std::mem::size_of::<NativeStatus>());
