// MIT License
// Copyright 2023--present liaison developers

//! Status codes shared by the wire format and the FMI 3.0 C interface.
//!
//! This module provides the pieces that let every layer agree on a single
//! outcome vocabulary:
//!
//! 1. **[`Status`]**: the closed five-valued enumeration carried in-band in
//!    every response message. It is what the server reads back from the
//!    native model and what the client hands to its caller.
//!
//! 2. **[`fmi3Status`]**: the `#[repr(C)]` twin of [`Status`] returned from
//!    every exported `fmi3*` function. The two convert into each other
//!    losslessly.
//!
//! 3. **Thread-local error message**: on failure, a human-readable description
//!    is stored in a thread-local `CString`. A C caller retrieves it with
//!    [`liaison_last_error()`]. The pointer is valid until the next
//!    `fmi3*`/`liaison_*` call on the same thread.
//!
//! 4. **[`catch_unwind`]**: a wrapper used inside every `extern "C"`
//!    function to catch Rust panics before they unwind across the FFI
//!    boundary (which is undefined behaviour). Caught panics become
//!    `fmi3Fatal` with the panic message stored for retrieval.
//!
//! Failures the FMI interface has no vocabulary for (transport outage,
//! unknown remote handle) are coerced into the existing statuses rather than
//! given a channel of their own.

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::{c_char, c_int};

use serde::{Deserialize, Serialize};

/// Outcome of one model call, in increasing order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Warning,
    Discard,
    Error,
    Fatal,
}

impl Status {
    /// Convert a raw status integer returned by a native model.
    ///
    /// Values outside the FMI range are a contract violation by the model and
    /// are reported as [`Status::Error`].
    pub fn from_raw(raw: c_int) -> Self {
        match raw {
            0 => Status::Ok,
            1 => Status::Warning,
            2 => Status::Discard,
            3 => Status::Error,
            4 => Status::Fatal,
            other => {
                tracing::warn!(raw = other, "native model returned an unknown status");
                Status::Error
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Warning => "Warning",
            Status::Discard => "Discard",
            Status::Error => "Error",
            Status::Fatal => "Fatal",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status codes returned by the exported FMI 3.0 functions.
#[repr(C)]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum fmi3Status {
    fmi3OK = 0,
    fmi3Warning = 1,
    fmi3Discard = 2,
    fmi3Error = 3,
    fmi3Fatal = 4,
}

impl From<Status> for fmi3Status {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => fmi3Status::fmi3OK,
            Status::Warning => fmi3Status::fmi3Warning,
            Status::Discard => fmi3Status::fmi3Discard,
            Status::Error => fmi3Status::fmi3Error,
            Status::Fatal => fmi3Status::fmi3Fatal,
        }
    }
}

impl From<fmi3Status> for Status {
    fn from(status: fmi3Status) -> Self {
        match status {
            fmi3Status::fmi3OK => Status::Ok,
            fmi3Status::fmi3Warning => Status::Warning,
            fmi3Status::fmi3Discard => Status::Discard,
            fmi3Status::fmi3Error => Status::Error,
            fmi3Status::fmi3Fatal => Status::Fatal,
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

/// Store an error message in the thread-local slot.
pub(crate) fn set_last_error(msg: &str) {
    LAST_ERROR.with(|cell| {
        let c = CString::new(msg).unwrap_or_else(|_| {
            CString::new("(error message contained interior NUL)").unwrap_or_default()
        });
        *cell.borrow_mut() = c;
    });
}

/// Retrieve a pointer to the last error message for the current thread.
///
/// The pointer is valid until the next call to any exported function
/// on the same thread.
///
/// # Safety
/// This is intended to be called from C. The returned pointer must not
/// be freed by the caller.
#[no_mangle]
pub unsafe extern "C" fn liaison_last_error() -> *const c_char {
    LAST_ERROR.with(|cell| cell.borrow().as_ptr())
}

fn panic_message(e: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = e.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Execute a closure, catching any panics and converting them to `fmi3Fatal`.
///
/// On panic, stores the panic message in the thread-local error slot.
pub(crate) fn catch_unwind<F>(f: F) -> fmi3Status
where
    F: FnOnce() -> fmi3Status + std::panic::UnwindSafe,
{
    catch_unwind_or(fmi3Status::fmi3Fatal, f)
}

/// Like [`catch_unwind`], for entry points that return something other than
/// a status (instances, void). `fallback` is returned when `f` panics.
pub(crate) fn catch_unwind_or<T, F>(fallback: T, f: F) -> T
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(f) {
        Ok(value) => value,
        Err(e) => {
            set_last_error(&panic_message(e.as_ref()));
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_last_error() {
        set_last_error("test error");
        let ptr = unsafe { liaison_last_error() };
        let msg = unsafe { std::ffi::CStr::from_ptr(ptr) };
        assert_eq!(msg.to_str().unwrap(), "test error");
    }

    #[test]
    fn interior_nul_is_replaced() {
        set_last_error("bad\0message");
        let ptr = unsafe { liaison_last_error() };
        let msg = unsafe { std::ffi::CStr::from_ptr(ptr) };
        assert_eq!(msg.to_str().unwrap(), "(error message contained interior NUL)");
    }

    #[test]
    fn test_catch_unwind_success() {
        let status = catch_unwind(|| fmi3Status::fmi3OK);
        assert_eq!(status, fmi3Status::fmi3OK);
    }

    #[test]
    fn test_catch_unwind_panic() {
        let status = catch_unwind(|| panic!("boom"));
        assert_eq!(status, fmi3Status::fmi3Fatal);
        let ptr = unsafe { liaison_last_error() };
        let msg = unsafe { std::ffi::CStr::from_ptr(ptr) };
        assert_eq!(msg.to_str().unwrap(), "boom");
    }

    #[test]
    fn catch_unwind_or_returns_fallback() {
        let ptr: *mut u8 = catch_unwind_or(std::ptr::null_mut(), || panic!("no instance"));
        assert!(ptr.is_null());
    }

    #[test]
    fn status_conversions_are_lossless() {
        for status in [
            Status::Ok,
            Status::Warning,
            Status::Discard,
            Status::Error,
            Status::Fatal,
        ] {
            let c: fmi3Status = status.into();
            assert_eq!(c as c_int, status as c_int);
            assert_eq!(Status::from(c), status);
            assert_eq!(Status::from_raw(c as c_int), status);
        }
    }

    #[test]
    fn unknown_raw_status_is_error() {
        assert_eq!(Status::from_raw(17), Status::Error);
        assert_eq!(Status::from_raw(-1), Status::Error);
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Status::Ok < Status::Warning);
        assert!(Status::Error < Status::Fatal);
    }
}
