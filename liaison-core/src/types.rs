// MIT License
// Copyright 2023--present liaison developers

//! C-compatible FMI 3.0 scalar and callback types.
//!
//! These aliases mirror `fmi3PlatformTypes.h` and `fmi3FunctionTypes.h` and are
//! shared by both sides of the bridge: the exported stub (`c_api::fmi3`) is
//! *called* with them, and the native binding (`backend::native`) *calls* a
//! model library with them.
//!
//! ## Memory Model
//!
//! - Array arguments (`*const fmi3ValueReference`, `*mut fmi3Float64`, ...) are
//!   *borrowed* for the duration of one call.
//! - `fmi3String` and `fmi3Binary` values returned by a getter are owned by the
//!   instance that produced them and stay valid until the next call on it.
//! - `fmi3Instance` and `fmi3InstanceEnvironment` are opaque.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_void};

use crate::status::fmi3Status;

pub type fmi3Instance = *mut c_void;
pub type fmi3InstanceEnvironment = *mut c_void;
pub type fmi3FMUState = *mut c_void;
pub type fmi3ValueReference = u32;

pub type fmi3Float32 = f32;
pub type fmi3Float64 = f64;
pub type fmi3Int8 = i8;
pub type fmi3UInt8 = u8;
pub type fmi3Int16 = i16;
pub type fmi3UInt16 = u16;
pub type fmi3Int32 = i32;
pub type fmi3UInt32 = u32;
pub type fmi3Int64 = i64;
pub type fmi3UInt64 = u64;
pub type fmi3Boolean = bool;
pub type fmi3Char = c_char;
pub type fmi3String = *const fmi3Char;
pub type fmi3Byte = u8;
pub type fmi3Binary = *const fmi3Byte;
pub type fmi3Clock = bool;

/// `fmi3IntervalQualifier`, passed through as a plain integer.
pub type fmi3IntervalQualifier = i32;
/// `fmi3DependencyKind`, passed through as a plain integer.
pub type fmi3DependencyKind = i32;

/// Callback through which a model reports log messages to its host.
pub type fmi3LogMessageCallback = Option<
    unsafe extern "C" fn(
        instance_environment: fmi3InstanceEnvironment,
        status: fmi3Status,
        category: fmi3String,
        message: fmi3String,
    ),
>;

/// Callback a Co-Simulation model uses to signal an intermediate update.
pub type fmi3IntermediateUpdateCallback = Option<
    unsafe extern "C" fn(
        instance_environment: fmi3InstanceEnvironment,
        intermediate_update_time: fmi3Float64,
        intermediate_variable_set_requested: fmi3Boolean,
        intermediate_variable_get_allowed: fmi3Boolean,
        intermediate_step_finished: fmi3Boolean,
        can_return_early: fmi3Boolean,
        early_return_requested: *mut fmi3Boolean,
        early_return_time: *mut fmi3Float64,
    ),
>;

/// Callback a Scheduled Execution model uses to guard its critical sections.
pub type fmi3LockPreemptionCallback = Option<unsafe extern "C" fn()>;
pub type fmi3UnlockPreemptionCallback = Option<unsafe extern "C" fn()>;

/// Callback a Scheduled Execution model uses to report clock activity.
pub type fmi3ClockUpdateCallback =
    Option<unsafe extern "C" fn(instance_environment: fmi3InstanceEnvironment)>;

/// FMI version string reported by `fmi3GetVersion`.
pub const FMI3_VERSION: &[u8] = b"3.0\0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nul_terminated() {
        let version = std::ffi::CStr::from_bytes_with_nul(FMI3_VERSION).unwrap();
        assert_eq!(version.to_str().unwrap(), "3.0");
    }

    #[test]
    fn scalar_widths_match_fmi() {
        assert_eq!(std::mem::size_of::<fmi3ValueReference>(), 4);
        assert_eq!(std::mem::size_of::<fmi3Boolean>(), 1);
        assert_eq!(std::mem::size_of::<fmi3Clock>(), 1);
        assert_eq!(std::mem::size_of::<fmi3Status>(), std::mem::size_of::<i32>());
    }
}
