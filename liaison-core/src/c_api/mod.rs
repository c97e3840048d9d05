// MIT License
// Copyright 2023--present liaison developers

//! Public C API entry points of the client stub.
//!
//! Each submodule exposes `extern "C"` functions that cbindgen collects into
//! `liaison-core/include/liaison.h`. All functions in this module follow three
//! invariants:
//!
//! 1. **Return [`fmi3Status`](crate::status::fmi3Status)** (or a pointer /
//!    void for instantiation and `fmi3FreeInstance`).
//! 2. **Wrap the body in [`catch_unwind`](crate::status::catch_unwind)** to
//!    prevent panics from crossing the FFI boundary.
//! 3. **Validate pointer arguments** and call
//!    [`set_last_error`](crate::status::set_last_error) before returning a
//!    non-success status. A NULL instance is `fmi3Fatal`.
//!
//! ## Submodules
//!
//! - `instance`: the object behind each `fmi3Instance`, owning the session,
//!   the log subscription and the buffers handed back to the host.
//! - [`fmi3`]: the forwarded FMI 3.0 functions (feature-gated on
//!   `fmi-stub`).
//! - [`unsupported`]: the remaining FMI 3.0 functions, answered locally with
//!   `fmi3Error`.

#[cfg(feature = "fmi-stub")]
mod instance;

#[cfg(feature = "fmi-stub")]
pub mod fmi3;
#[cfg(feature = "fmi-stub")]
pub mod unsupported;
