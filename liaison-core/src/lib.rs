// MIT License
// Copyright 2023--present liaison developers

//! # liaison-core
//!
//! Serve an FMI 3.0 model unit from one process and drive it from another.
//!
//! The crate has two halves that meet on a keyed request/reply transport:
//!
//! - **Client stub.** Built as a `cdylib` with the `fmi-stub` feature, the
//!   crate exports the `fmi3*` C interface. A simulation host loads it in
//!   place of the model binary; every call becomes a query to the server and
//!   log messages come back over a publish channel.
//! - **Server.** [`server::Dispatcher`] answers those queries by replaying
//!   them against a [`backend::ModelBackend`], normally a native model library
//!   bound at runtime by [`backend::native::NativeModel`].
//!
//! [`package`] rewrites a model unit so that its binaries are the client stub
//! and its resources carry the [`config::UnitConfig`] the stub needs to find
//! the server.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`status`] | Status codes, thread-local error, panic guard |
//! | [`types`] | FMI 3.0 C scalar and callback types |
//! | [`wire`] | Function catalogue, routing keys, message payloads |
//! | [`registry`] | Remote handle to live instance table |
//! | [`backend`] | Model backends: native library and in-process |
//! | [`transport`] | Request/reply and publish/subscribe sessions |
//! | [`server`] | Dispatcher answering catalogue queries |
//! | [`client`] | Typed client used by the stub |
//! | [`config`] | Transport and unit configuration |
//! | [`unit`] | Model unit archives on disk |
//! | [`package`] | Build a networked model unit |
//! | [`c_api`] | Exported `fmi3*` functions |

pub mod backend;
pub mod c_api;
pub mod client;
pub mod config;
pub mod package;
pub mod registry;
pub mod server;
pub mod status;
pub mod transport;
pub mod types;
pub mod unit;
pub mod wire;
