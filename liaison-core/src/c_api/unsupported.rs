// MIT License
// Copyright 2023--present liaison developers

//! FMI 3.0 entry points the bridge does not carry.
//!
//! They are exported so the stub links as a complete FMI 3.0 library. Each
//! one answers `fmi3Error` locally and tells the host why through its log
//! callback; nothing is sent to the server.

use std::panic::AssertUnwindSafe;

use super::instance::{report, RemoteInstance};
use crate::status::{catch_unwind, fmi3Status, set_last_error, Status};
use crate::types::*;

/// # Safety
/// `instance` must be NULL or a live pointer returned by an instantiate call.
unsafe fn refuse(instance: fmi3Instance, function: &str) -> fmi3Status {
    if instance.is_null() {
        set_last_error(&format!("{function}: instance is NULL"));
        return fmi3Status::fmi3Fatal;
    }
    let remote = unsafe { &*instance.cast::<RemoteInstance>() };
    report(
        remote.logger(),
        Status::Error,
        &format!("{function} is not supported over the remote bridge"),
    );
    fmi3Status::fmi3Error
}

macro_rules! unsupported {
    ($(fn $name:ident($($arg:ident: $ty:ty),* $(,)?);)*) => {$(
        #[no_mangle]
        pub unsafe extern "C" fn $name(instance: fmi3Instance, $($arg: $ty),*) -> fmi3Status {
            $(let _ = $arg;)*
            catch_unwind(AssertUnwindSafe(|| unsafe { refuse(instance, stringify!($name)) }))
        }
    )*};
}

unsupported! {
    fn fmi3GetFMUState(fmu_state: *mut fmi3FMUState);
    fn fmi3SetFMUState(fmu_state: fmi3FMUState);
    fn fmi3FreeFMUState(fmu_state: *mut fmi3FMUState);
    fn fmi3SerializedFMUStateSize(fmu_state: fmi3FMUState, size: *mut usize);
    fn fmi3SerializeFMUState(
        fmu_state: fmi3FMUState,
        serialized_state: *mut fmi3Byte,
        size: usize,
    );
    fn fmi3DeserializeFMUState(
        serialized_state: *const fmi3Byte,
        size: usize,
        fmu_state: *mut fmi3FMUState,
    );

    fn fmi3GetDirectionalDerivative(
        unknowns: *const fmi3ValueReference,
        n_unknowns: usize,
        knowns: *const fmi3ValueReference,
        n_knowns: usize,
        seed: *const fmi3Float64,
        n_seed: usize,
        sensitivity: *mut fmi3Float64,
        n_sensitivity: usize,
    );
    fn fmi3GetAdjointDerivative(
        unknowns: *const fmi3ValueReference,
        n_unknowns: usize,
        knowns: *const fmi3ValueReference,
        n_knowns: usize,
        seed: *const fmi3Float64,
        n_seed: usize,
        sensitivity: *mut fmi3Float64,
        n_sensitivity: usize,
    );
    fn fmi3GetNumberOfVariableDependencies(
        value_reference: fmi3ValueReference,
        n_dependencies: *mut usize,
    );
    fn fmi3GetVariableDependencies(
        dependent: fmi3ValueReference,
        element_indices_of_dependent: *mut usize,
        independents: *mut fmi3ValueReference,
        element_indices_of_independents: *mut usize,
        dependency_kinds: *mut fmi3DependencyKind,
        n_dependencies: usize,
    );
    fn fmi3GetOutputDerivatives(
        value_references: *const fmi3ValueReference,
        n_value_references: usize,
        orders: *const fmi3Int32,
        values: *mut fmi3Float64,
        n_values: usize,
    );

    fn fmi3GetIntervalDecimal(
        value_references: *const fmi3ValueReference,
        n_value_references: usize,
        intervals: *mut fmi3Float64,
        qualifiers: *mut fmi3IntervalQualifier,
    );
    fn fmi3GetIntervalFraction(
        value_references: *const fmi3ValueReference,
        n_value_references: usize,
        counters: *mut fmi3UInt64,
        resolutions: *mut fmi3UInt64,
        qualifiers: *mut fmi3IntervalQualifier,
    );
    fn fmi3GetShiftDecimal(
        value_references: *const fmi3ValueReference,
        n_value_references: usize,
        shifts: *mut fmi3Float64,
    );
    fn fmi3GetShiftFraction(
        value_references: *const fmi3ValueReference,
        n_value_references: usize,
        counters: *mut fmi3UInt64,
        resolutions: *mut fmi3UInt64,
    );
    fn fmi3SetIntervalDecimal(
        value_references: *const fmi3ValueReference,
        n_value_references: usize,
        intervals: *const fmi3Float64,
    );
    fn fmi3SetIntervalFraction(
        value_references: *const fmi3ValueReference,
        n_value_references: usize,
        counters: *const fmi3UInt64,
        resolutions: *const fmi3UInt64,
    );
    fn fmi3SetShiftDecimal(
        value_references: *const fmi3ValueReference,
        n_value_references: usize,
        shifts: *const fmi3Float64,
    );
    fn fmi3SetShiftFraction(
        value_references: *const fmi3ValueReference,
        n_value_references: usize,
        counters: *const fmi3UInt64,
        resolutions: *const fmi3UInt64,
    );
    fn fmi3ActivateModelPartition(
        clock_reference: fmi3ValueReference,
        activation_time: fmi3Float64,
    );

    fn fmi3EvaluateDiscreteStates();
    fn fmi3EnterContinuousTimeMode();
    fn fmi3CompletedIntegratorStep(
        no_set_fmu_state_prior_to_current_point: fmi3Boolean,
        enter_event_mode: *mut fmi3Boolean,
        terminate_simulation: *mut fmi3Boolean,
    );
    fn fmi3SetTime(time: fmi3Float64);
    fn fmi3SetContinuousStates(continuous_states: *const fmi3Float64, n_continuous_states: usize);
    fn fmi3GetContinuousStateDerivatives(derivatives: *mut fmi3Float64, n_continuous_states: usize);
    fn fmi3GetEventIndicators(event_indicators: *mut fmi3Float64, n_event_indicators: usize);
    fn fmi3GetContinuousStates(continuous_states: *mut fmi3Float64, n_continuous_states: usize);
    fn fmi3GetNominalsOfContinuousStates(nominals: *mut fmi3Float64, n_continuous_states: usize);
    fn fmi3GetNumberOfEventIndicators(n_event_indicators: *mut usize);
    fn fmi3GetNumberOfContinuousStates(n_continuous_states: *mut usize);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::c_api::instance::HostLogger;
    use crate::backend::in_process::InProcessModel;
    use crate::client::RemoteModel;
    use crate::server::Dispatcher;
    use crate::transport::{memory::MemoryBus, Session};
    use crate::wire::{InstantiateRequest, InstantiationKind};
    use std::sync::Arc;

    #[test]
    fn null_instance_is_fatal() {
        let status = unsafe { fmi3SetTime(std::ptr::null_mut(), 1.0) };
        assert_eq!(status, fmi3Status::fmi3Fatal);
    }

    #[test]
    fn live_instance_gets_an_error_without_a_round_trip() {
        let bus = MemoryBus::new();
        let dispatcher = Arc::new(
            Dispatcher::new(InProcessModel::new(), Session::in_memory(&bus), "ball").unwrap(),
        );
        dispatcher.serve().unwrap();
        let model = RemoteModel::new(Session::in_memory(&bus), "ball");
        let remote = RemoteInstance::open_on(
            model,
            InstantiationKind::ModelExchange,
            &InstantiateRequest::new("a", ""),
            HostLogger::new(std::ptr::null_mut(), None),
        )
        .unwrap()
        .unwrap();
        let instance: fmi3Instance = Box::into_raw(Box::new(remote)).cast();

        let mut n = 7usize;
        assert_eq!(
            unsafe { fmi3GetNumberOfContinuousStates(instance, &mut n) },
            fmi3Status::fmi3Error
        );
        assert_eq!(n, 7);
        assert_eq!(
            unsafe { fmi3EnterContinuousTimeMode(instance) },
            fmi3Status::fmi3Error
        );
        let message = unsafe { std::ffi::CStr::from_ptr(crate::status::liaison_last_error()) };
        assert!(message.to_str().unwrap().contains("fmi3EnterContinuousTimeMode"));

        let remote = unsafe { Box::from_raw(instance.cast::<RemoteInstance>()) };
        remote.free();
        assert_eq!(dispatcher.live_instances(), 0);
    }
}
