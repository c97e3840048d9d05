// MIT License
// Copyright 2023--present liaison developers

//! The messaging layer: keyed request/reply plus publish/subscribe.
//!
//! A [`Transport`] routes opaque payloads by string key. [`Session`] is the
//! handle the rest of the crate holds: the client stub opens one per model
//! instance, the server opens one per process and shares it across every
//! responder.
//!
//! Two transports are provided:
//!
//! - [`memory::MemoryBus`], an in-process router;
//! - [`tcp::TcpTransport`], length-delimited `postcard` frames over TCP,
//!   optionally wrapped in TLS when the config carries a `tls` section.

pub mod memory;
pub mod tcp;
pub(crate) mod tls;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{ConfigError, TransportConfig};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no responder for `{0}`")]
    NoResponder(String),
    #[error("query on `{key}` got no reply within {timeout:?}")]
    Timeout { key: String, timeout: Duration },
    #[error("a responder for `{0}` is already declared")]
    DuplicateResponder(String),
    #[error("connection lost while waiting for `{0}`")]
    Disconnected(String),
    #[error("session is closed")]
    Closed,
    #[error("TLS: {0}")]
    Tls(String),
    #[error("failed to start transport runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("{endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed frame: {0}")]
    Frame(#[source] postcard::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Handler bound to one key: request payload in, reply payload out.
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Stream of payloads published on one key.
pub struct Subscription {
    key: String,
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    pub(crate) fn new(key: String, receiver: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { key, receiver }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next payload already delivered, without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.try_recv().ok()
    }

    /// Every payload delivered so far.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Routing of opaque payloads by key.
pub trait Transport: Send + Sync {
    /// Answer queries on `key`. Queries on one key are answered one at a time.
    fn declare_responder(&self, key: &str, responder: Responder) -> Result<(), TransportError>;

    /// Send `payload` to the responder for `key` and wait for its reply.
    ///
    /// Exactly one attempt is made. Extra replies are ignored.
    fn query(&self, key: &str, payload: Vec<u8>, timeout: Duration)
        -> Result<Vec<u8>, TransportError>;

    /// Deliver `payload` to every subscriber of `key`, without waiting.
    fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    fn subscribe(&self, key: &str) -> Result<Subscription, TransportError>;

    /// Withdraw every responder and subscription. Later calls fail with
    /// [`TransportError::Closed`].
    fn close(&self);

    /// Endpoints this transport actually listens on.
    fn local_endpoints(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A transport handle plus the query timeout to use with it.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    query_timeout: Duration,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, query_timeout: Duration) -> Self {
        Self {
            transport,
            query_timeout,
        }
    }

    /// Attach to an in-process bus.
    pub fn in_memory(bus: &memory::MemoryBus) -> Self {
        Self::new(
            Arc::new(bus.attach()),
            TransportConfig::default().query_timeout(),
        )
    }

    /// Open a serving session on the configured listen endpoints.
    pub fn listen(config: &TransportConfig) -> Result<Self, TransportError> {
        let transport = tcp::TcpTransport::listen(config)?;
        Ok(Self::new(Arc::new(transport), config.query_timeout()))
    }

    /// Open a client session to the configured connect endpoints.
    pub fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let transport = tcp::TcpTransport::connect(config)?;
        Ok(Self::new(Arc::new(transport), config.query_timeout()))
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub fn declare_responder(&self, key: &str, responder: Responder) -> Result<(), TransportError> {
        self.transport.declare_responder(key, responder)
    }

    pub fn query(&self, key: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.transport.query(key, payload, self.query_timeout)
    }

    pub fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.transport.publish(key, payload)
    }

    pub fn subscribe(&self, key: &str) -> Result<Subscription, TransportError> {
        self.transport.subscribe(key)
    }

    pub fn close(&self) {
        self.transport.close()
    }

    pub fn local_endpoints(&self) -> Vec<String> {
        self.transport.local_endpoints()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("query_timeout", &self.query_timeout)
            .field("endpoints", &self.local_endpoints())
            .finish()
    }
}
