// MIT License
// Copyright 2023--present liaison developers

//! In-process transport.
//!
//! A [`MemoryBus`] is a router shared by any number of attached
//! [`MemoryTransport`]s. Responders run on a helper thread so a query can
//! give up after its timeout. Publications are delivered synchronously, so a
//! log event published by a responder is visible to subscribers before the
//! reply reaches the querying side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use super::{Responder, Subscription, Transport, TransportError};

struct Route {
    owner: u64,
    responder: Responder,
    serial: Arc<Mutex<()>>,
}

struct Subscriber {
    owner: u64,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct Router {
    next_owner: AtomicU64,
    routes: Mutex<HashMap<String, Route>>,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared in-process router.
#[derive(Clone, Default)]
pub struct MemoryBus {
    router: Arc<Router>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new transport endpoint on this bus.
    pub fn attach(&self) -> MemoryTransport {
        MemoryTransport {
            router: Arc::clone(&self.router),
            owner: self.router.next_owner.fetch_add(1, Ordering::Relaxed),
            closed: AtomicBool::new(false),
        }
    }
}

/// One endpoint of a [`MemoryBus`].
pub struct MemoryTransport {
    router: Arc<Router>,
    owner: u64,
    closed: AtomicBool,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn declare_responder(&self, key: &str, responder: Responder) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut routes = lock(&self.router.routes);
        if routes.contains_key(key) {
            return Err(TransportError::DuplicateResponder(key.to_owned()));
        }
        routes.insert(
            key.to_owned(),
            Route {
                owner: self.owner,
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
        let (responder, serial) = {
            let routes = lock(&self.router.routes);
            let route = routes
                .get(key)
                .ok_or_else(|| TransportError::NoResponder(key.to_owned()))?;
            (Arc::clone(&route.responder), Arc::clone(&route.serial))
        };

        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);
        std::thread::Builder::new()
            .name("liaison-memory-responder".into())
            .spawn(move || {
                let _serial = lock(&serial);
                let reply = responder(&payload);
                let _ = reply_tx.try_send(reply);
            })
            .map_err(|source| TransportError::Io {
                endpoint: key.to_owned(),
                source,
            })?;

        match reply_rx.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
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
        let mut subscribers = lock(&self.router.subscribers);
        if let Some(list) = subscribers.get_mut(key) {
            list.retain(|s| s.sender.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    fn subscribe(&self, key: &str) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.router.subscribers)
            .entry(key.to_owned())
            .or_default()
            .push(Subscriber {
                owner: self.owner,
                sender,
            });
        Ok(Subscription::new(key.to_owned(), receiver))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        lock(&self.router.routes).retain(|_, route| route.owner != self.owner);
        for list in lock(&self.router.subscribers).values_mut() {
            list.retain(|s| s.owner != self.owner);
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}
