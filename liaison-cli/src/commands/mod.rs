// MIT License
// Copyright 2023--present liaison developers

pub mod package;
pub mod serve;

use std::path::Path;

use anyhow::Context;
use liaison_core::config::TransportConfig;

/// The transport config at `path`, or the defaults.
fn load_transport(path: Option<&Path>) -> anyhow::Result<TransportConfig> {
    match path {
        Some(path) => TransportConfig::load(path)
            .with_context(|| format!("loading transport config {}", path.display())),
        None => Ok(TransportConfig::default()),
    }
}
