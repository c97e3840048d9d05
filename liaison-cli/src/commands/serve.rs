// MIT License
// Copyright 2023--present liaison developers

//! Serve command

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use liaison_core::backend::native::NativeModel;
use liaison_core::server::Dispatcher;
use liaison_core::transport::Session;
use liaison_core::unit::ModelUnit;
use tracing::info;

pub fn run(fmu: &Path, namespace: &str, transport_config: Option<&Path>) -> anyhow::Result<()> {
    let transport = super::load_transport(transport_config)?;

    let unit = ModelUnit::extract(fmu).with_context(|| format!("opening {}", fmu.display()))?;
    let library = unit.native_library()?;
    let resources = unit.resources_dir();
    let model = NativeModel::load(&library, resources.as_deref())
        .with_context(|| format!("loading {}", library.display()))?;

    let session = Session::listen(&transport).context("starting transport")?;
    let endpoints = session.local_endpoints();
    let dispatcher = Arc::new(Dispatcher::new(model, session, namespace)?);
    dispatcher.serve()?;

    info!(
        model_identifier = unit.model_identifier(),
        namespace,
        endpoints = ?endpoints,
        "serving; press Ctrl+C to stop"
    );

    let interrupted = wait_for_interrupt();

    info!("shutting down");
    dispatcher.shutdown();
    // Instances are gone; now the library and the extracted files can go.
    drop(dispatcher);
    drop(unit);
    interrupted
}

fn wait_for_interrupt() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting signal handler")?
        .block_on(tokio::signal::ctrl_c())
        .context("waiting for Ctrl+C")
}
