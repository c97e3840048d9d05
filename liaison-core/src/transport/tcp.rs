// MIT License
// Copyright 2023--present liaison developers

//! TCP transport.
//!
//! The transport owns a small tokio runtime so that the synchronous C API can
//! use it from whatever thread the host calls in on. Each connection carries
//! length-delimited `postcard` [`Frame`]s in both directions, inside a TLS
//! session when the config carries a `tls` section.
//!
//! **Ordering**
//!
//! Every connection has exactly one outbound queue, drained by one writer
//! task. Publications and replies go through the same queue, so a log event
//! published while a query is being answered reaches the querying peer before
//! that query's reply.
//!
//! **Queries**
//!
//! A query is sent to every connected peer. The first reply wins and later
//! ones are dropped. A peer without a responder for the key answers
//! [`Frame::Unanswered`]; once every peer has done so (or disconnected) the
//! query fails without waiting for its timeout.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::{tls, Responder, Subscription, Transport, TransportError};
use crate::config::{Endpoint, TransportConfig};

const MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    Query {
        id: u64,
        key: String,
        payload: Vec<u8>,
    },
    Reply {
        id: u64,
        payload: Vec<u8>,
    },
    Unanswered {
        id: u64,
    },
    Publish {
        key: String,
        payload: Vec<u8>,
    },
}

struct Route {
    responder: Responder,
    serial: Arc<Mutex<()>>,
}

struct Pending {
    key: String,
    reply: std_mpsc::SyncSender<Result<Vec<u8>, TransportError>>,
    waiting: HashSet<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct Shared {
    closed: AtomicBool,
    next_query: AtomicU64,
    next_peer: AtomicU64,
    routes: Mutex<HashMap<String, Route>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
    peers: Mutex<HashMap<u64, mpsc::UnboundedSender<Frame>>>,
    pending: Mutex<HashMap<u64, Pending>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn route(&self, key: &str) -> Option<(Responder, Arc<Mutex<()>>)> {
        lock(&self.routes)
            .get(key)
            .map(|route| (Arc::clone(&route.responder), Arc::clone(&route.serial)))
    }

    fn deliver(&self, key: &str, payload: &[u8]) {
        if let Some(list) = lock(&self.subscribers).get_mut(key) {
            list.retain(|sender| sender.send(payload.to_vec()).is_ok());
        }
    }

    fn complete(&self, id: u64, payload: Vec<u8>) {
        if let Some(entry) = lock(&self.pending).remove(&id) {
            let _ = entry.reply.try_send(Ok(payload));
        }
    }

    /// `peer` will not answer query `id`; fail the query once nobody will.
    fn give_up(&self, id: u64, peer: u64, error: fn(String) -> TransportError) {
        let mut pending = lock(&self.pending);
        let exhausted = match pending.get_mut(&id) {
            Some(entry) => {
                entry.waiting.remove(&peer);
                entry.waiting.is_empty()
            }
            None => false,
        };
        if exhausted {
            if let Some(entry) = pending.remove(&id) {
                let _ = entry.reply.try_send(Err(error(entry.key)));
            }
        }
    }

    fn disconnect(&self, peer: u64) {
        lock(&self.peers).remove(&peer);
        let ids: Vec<u64> = lock(&self.pending).keys().copied().collect();
        for id in ids {
            self.give_up(id, peer, TransportError::Disconnected);
        }
        tracing::debug!(peer, "peer disconnected");
    }

    fn handle_frame(&self, peer: u64, frame: Frame, outbound: &mpsc::UnboundedSender<Frame>) {
        match frame {
            Frame::Query { id, key, payload } => match self.route(&key) {
                Some((responder, serial)) => {
                    tracing::debug!(peer, %key, "query");
                    let outbound = outbound.clone();
                    tokio::task::spawn_blocking(move || {
                        let _serial = lock(&serial);
                        let payload = responder(&payload);
                        let _ = outbound.send(Frame::Reply { id, payload });
                    });
                }
                None => {
                    tracing::debug!(peer, %key, "no responder for query");
                    let _ = outbound.send(Frame::Unanswered { id });
                }
            },
            Frame::Reply { id, payload } => self.complete(id, payload),
            Frame::Unanswered { id } => self.give_up(id, peer, TransportError::NoResponder),
            Frame::Publish { key, payload } => self.deliver(&key, &payload),
        }
    }
}

/// Register a connection and start its reader and writer tasks.
fn attach<S>(shared: &Arc<Shared>, handle: &Handle, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let peer = shared.next_peer.fetch_add(1, Ordering::Relaxed);
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    let (mut sink, mut frames) = Framed::new(stream, codec).split();
    let (outbound, mut queue) = mpsc::unbounded_channel::<Frame>();
    lock(&shared.peers).insert(peer, outbound.clone());

    let writer = handle.spawn(async move {
        while let Some(frame) = queue.recv().await {
            let bytes = match postcard::to_allocvec(&frame) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(peer, error = %e, "failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = sink.send(Bytes::from(bytes)).await {
                tracing::debug!(peer, error = %e, "write failed");
                break;
            }
        }
    });

    let reader_shared = Arc::clone(shared);
    let reader = handle.spawn(async move {
        while let Some(item) = frames.next().await {
            let frame = match item {
                Ok(buffer) => postcard::from_bytes::<Frame>(&buffer),
                Err(e) => {
                    tracing::debug!(peer, error = %e, "read failed");
                    break;
                }
            };
            match frame {
                Ok(frame) => reader_shared.handle_frame(peer, frame, &outbound),
                Err(e) => {
                    tracing::warn!(peer, error = %e, "dropping connection after malformed frame");
                    break;
                }
            }
        }
        reader_shared.disconnect(peer);
    });

    lock(&shared.tasks).extend([writer, reader]);
}

/// Finish an accepted connection, handshaking first when TLS is on.
fn accepted(
    shared: &Arc<Shared>,
    handle: &Handle,
    acceptor: Option<&TlsAcceptor>,
    stream: TcpStream,
) {
    let _ = stream.set_nodelay(true);
    let Some(acceptor) = acceptor.cloned() else {
        attach(shared, handle, stream);
        return;
    };
    let shared = Arc::clone(shared);
    let attach_handle = handle.clone();
    handle.spawn(async move {
        match tokio::time::timeout(CONNECT_TIMEOUT, acceptor.accept(stream)).await {
            Ok(Ok(stream)) => attach(&shared, &attach_handle, stream),
            Ok(Err(e)) => tracing::warn!(error = %e, "TLS handshake failed"),
            Err(_) => tracing::warn!("TLS handshake timed out"),
        }
    });
}

/// Open one outgoing connection and attach it.
async fn dial(
    shared: &Arc<Shared>,
    handle: &Handle,
    connector: Option<&TlsConnector>,
    endpoint: &Endpoint,
) -> Result<(), TransportError> {
    let Endpoint::Tcp(address) = endpoint;
    let io_error = |source| TransportError::Io {
        endpoint: endpoint.to_string(),
        source,
    };
    let stream = TcpStream::connect(address.as_str()).await.map_err(io_error)?;
    let _ = stream.set_nodelay(true);
    match connector {
        None => attach(shared, handle, stream),
        Some(connector) => {
            let name = tls::server_name(address)?;
            let stream = connector.connect(name, stream).await.map_err(io_error)?;
            attach(shared, handle, stream);
        }
    }
    Ok(())
}

fn runtime() -> Result<Runtime, TransportError> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("liaison-tcp")
        .enable_all()
        .build()
        .map_err(TransportError::Runtime)
}

/// Sessions over TCP, optionally TLS-wrapped.
pub struct TcpTransport {
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
    endpoints: Vec<String>,
}

impl TcpTransport {
    /// Bind every listen endpoint of `config` and start accepting peers.
    pub fn listen(config: &TransportConfig) -> Result<Self, TransportError> {
        let endpoints = config.listen_endpoints()?;
        let acceptor = config.tls.as_ref().map(tls::acceptor).transpose()?;
        let runtime = runtime()?;
        let handle = runtime.handle().clone();
        let shared = Arc::new(Shared::default());
        let mut bound = Vec::with_capacity(endpoints.len());

        for endpoint in &endpoints {
            let Endpoint::Tcp(address) = endpoint;
            let io_error = |source| TransportError::Io {
                endpoint: endpoint.to_string(),
                source,
            };
            let listener = runtime
                .block_on(TcpListener::bind(address.as_str()))
                .map_err(io_error)?;
            let local = listener.local_addr().map_err(io_error)?;
            tracing::info!(endpoint = %local, tls = acceptor.is_some(), "listening");
            bound.push(format!("tcp/{local}"));

            let accept_shared = Arc::clone(&shared);
            let accept_handle = handle.clone();
            let acceptor = acceptor.clone();
            let task = handle.spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, remote)) => {
                            tracing::debug!(%remote, "accepted connection");
                            accepted(&accept_shared, &accept_handle, acceptor.as_ref(), stream);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            });
            lock(&shared.tasks).push(task);
        }

        Ok(Self {
            shared,
            runtime: Mutex::new(Some(runtime)),
            endpoints: bound,
        })
    }

    /// Connect to every reachable connect endpoint of `config`.
    ///
    /// Fails only when none of them could be reached.
    pub fn connect(config: &TransportConfig) -> Result<Self, TransportError> {
        let endpoints = config.connect_endpoints()?;
        let connector = config.tls.as_ref().map(tls::connector).transpose()?;
        let runtime = runtime()?;
        let handle = runtime.handle().clone();
        let shared = Arc::new(Shared::default());
        let mut last_error = None;
        let mut connected = 0;

        for endpoint in &endpoints {
            let attempt = runtime.block_on(tokio::time::timeout(
                CONNECT_TIMEOUT,
                dial(&shared, &handle, connector.as_ref(), endpoint),
            ));
            match attempt {
                Ok(Ok(())) => {
                    tracing::debug!(%endpoint, tls = connector.is_some(), "connected");
                    connected += 1;
                }
                Ok(Err(e)) => {
                    tracing::debug!(%endpoint, error = %e, "connection failed");
                    last_error = Some(e)
                }
                Err(_) => {
                    last_error = Some(TransportError::Io {
                        endpoint: endpoint.to_string(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "connection attempt timed out",
                        ),
                    })
                }
            }
        }

        if connected == 0 {
            runtime.shutdown_background();
            return Err(last_error.unwrap_or(TransportError::Closed));
        }
        Ok(Self {
            shared,
            runtime: Mutex::new(Some(runtime)),
            endpoints: Vec::new(),
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn declare_responder(&self, key: &str, responder: Responder) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut routes = lock(&self.shared.routes);
        if routes.contains_key(key) {
            return Err(TransportError::DuplicateResponder(key.to_owned()));
        }
        routes.insert(
            key.to_owned(),
            Route {
                responder,
                serial: Arc::new(Mutex::new(())),
            },
        );
        Ok(())
    }

    fn query(
        &self,
        key: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        if let Some((responder, serial)) = self.shared.route(key) {
            let _serial = lock(&serial);
            return Ok(responder(&payload));
        }

        let peers: Vec<(u64, mpsc::UnboundedSender<Frame>)> = lock(&self.shared.peers)
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();
        if peers.is_empty() {
            return Err(TransportError::NoResponder(key.to_owned()));
        }

        let id = self.shared.next_query.fetch_add(1, Ordering::Relaxed);
        let (reply, outcome) = std_mpsc::sync_channel(1);
        lock(&self.shared.pending).insert(
            id,
            Pending {
                key: key.to_owned(),
                reply,
                waiting: peers.iter().map(|(peer, _)| *peer).collect(),
            },
        );
        for (peer, sender) in peers {
            let frame = Frame::Query {
                id,
                key: key.to_owned(),
                payload: payload.clone(),
            };
            if sender.send(frame).is_err() {
                self.shared.give_up(id, peer, TransportError::Disconnected);
            }
        }

        let result = outcome.recv_timeout(timeout);
        lock(&self.shared.pending).remove(&id);
        match result {
            Ok(reply) => reply,
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(TransportError::Timeout {
                key: key.to_owned(),
                timeout,
            }),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                Err(TransportError::Disconnected(key.to_owned()))
            }
        }
    }

    fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.shared.deliver(key, &payload);
        for sender in lock(&self.shared.peers).values() {
            let _ = sender.send(Frame::Publish {
                key: key.to_owned(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    fn subscribe(&self, key: &str) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.shared.subscribers)
            .entry(key.to_owned())
            .or_default()
            .push(sender);
        Ok(Subscription::new(key.to_owned(), receiver))
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        lock(&self.shared.routes).clear();
        lock(&self.shared.subscribers).clear();
        lock(&self.shared.peers).clear();
        for (_, entry) in lock(&self.shared.pending).drain() {
            let _ = entry.reply.try_send(Err(TransportError::Closed));
        }
        for task in lock(&self.shared.tasks).drain(..) {
            task.abort();
        }
        if let Some(runtime) = lock(&self.runtime).take() {
            runtime.shutdown_background();
        }
        tracing::debug!(endpoints = ?self.endpoints, "transport closed");
    }

    fn local_endpoints(&self) -> Vec<String> {
        self.endpoints.clone()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
