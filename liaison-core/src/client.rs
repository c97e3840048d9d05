// MIT License
// Copyright 2023--present liaison developers

//! Typed client for a served model unit.
//!
//! [`RemoteModel`] turns catalogue calls into queries on a [`Session`]. It
//! carries no FFI concerns; the exported `fmi3*` stub wraps it.

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::status::Status;
use crate::transport::{Session, Subscription, TransportError};
use crate::wire::{
    self, DoStepRequest, DoStepResponse, EnterInitializationModeRequest, Function,
    GetValuesRequest, GetValuesResponse, InstanceRequest, InstantiateRequest, InstantiateResponse,
    InstantiationKind, LifecycleOp, RemoteHandle, SetDebugLoggingRequest, SetValuesRequest,
    StatusResponse, UpdateDiscreteStatesResponse, ValueKind, Values, VoidResponse, WireError,
    WireMessage,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("{function} returned {received} values but the caller has room for {capacity}")]
    Overflow {
        function: Function,
        received: usize,
        capacity: usize,
    },
}

impl ClientError {
    /// The status a caller sees for this failure.
    ///
    /// Anything that leaves the server's state unknown is fatal.
    pub fn status(&self) -> Status {
        match self {
            ClientError::Transport(_) | ClientError::Wire(_) => Status::Fatal,
            ClientError::Config(_) | ClientError::Overflow { .. } => Status::Error,
        }
    }
}

/// A model unit served under one namespace.
#[derive(Debug, Clone)]
pub struct RemoteModel {
    session: Session,
    namespace: String,
}

impl RemoteModel {
    pub fn new(session: Session, namespace: impl Into<String>) -> Self {
        Self {
            session,
            namespace: namespace.into(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Subscribe to the model's log channel.
    pub fn subscribe_logs(&self) -> Result<Subscription, ClientError> {
        Ok(self.session.subscribe(&wire::log_key(&self.namespace))?)
    }

    fn call<Req, Resp>(&self, function: Function, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: WireMessage,
    {
        let payload = wire::encode(request)?;
        tracing::trace!(%function, bytes = payload.len(), "query");
        let reply = self
            .session
            .query(&function.key(&self.namespace), payload)?;
        Ok(wire::decode(&reply)?)
    }

    /// `None` when the model declined to instantiate.
    pub fn instantiate(
        &self,
        kind: InstantiationKind,
        request: &InstantiateRequest,
    ) -> Result<Option<RemoteHandle>, ClientError> {
        let response: InstantiateResponse = self.call(Function::Instantiate(kind), request)?;
        Ok(response.instance)
    }

    pub fn free_instance(&self, instance: RemoteHandle) -> Result<(), ClientError> {
        let _: VoidResponse = self.call(Function::FreeInstance, &InstanceRequest { instance })?;
        Ok(())
    }

    pub fn set_debug_logging(
        &self,
        instance: RemoteHandle,
        logging_on: bool,
        categories: Vec<String>,
    ) -> Result<Status, ClientError> {
        let request = SetDebugLoggingRequest::new(instance, logging_on, categories);
        let response: StatusResponse = self.call(Function::SetDebugLogging, &request)?;
        Ok(response.status)
    }

    pub fn enter_initialization_mode(
        &self,
        request: &EnterInitializationModeRequest,
    ) -> Result<Status, ClientError> {
        let response: StatusResponse = self.call(Function::EnterInitializationMode, request)?;
        Ok(response.status)
    }

    pub fn lifecycle(&self, instance: RemoteHandle, op: LifecycleOp) -> Result<Status, ClientError> {
        let response: StatusResponse =
            self.call(Function::Lifecycle(op), &InstanceRequest { instance })?;
        Ok(response.status)
    }

    pub fn do_step(&self, request: &DoStepRequest) -> Result<DoStepResponse, ClientError> {
        self.call(Function::DoStep, request)
    }

    pub fn update_discrete_states(
        &self,
        instance: RemoteHandle,
    ) -> Result<UpdateDiscreteStatesResponse, ClientError> {
        self.call(Function::UpdateDiscreteStates, &InstanceRequest { instance })
    }

    /// Read values of `kind`. At most `n_values` come back; a reply with more
    /// is rejected rather than truncated.
    pub fn get_values(
        &self,
        instance: RemoteHandle,
        kind: ValueKind,
        value_references: &[u32],
        n_values: usize,
    ) -> Result<(Status, Values), ClientError> {
        let function = Function::GetValues(kind);
        let request = GetValuesRequest::new(instance, value_references.to_vec(), n_values);
        let response: GetValuesResponse = self.call(function, &request)?;
        if response.values.kind() != kind {
            return Err(WireError::KindMismatch {
                expected: kind,
                found: response.values.kind(),
            }
            .into());
        }
        if response.values.len() > n_values {
            return Err(ClientError::Overflow {
                function,
                received: response.values.len(),
                capacity: n_values,
            });
        }
        Ok((response.status, response.values))
    }

    /// Write `values`; the routing key follows their kind.
    pub fn set_values(
        &self,
        instance: RemoteHandle,
        value_references: &[u32],
        values: Values,
    ) -> Result<Status, ClientError> {
        let function = Function::SetValues(values.kind());
        let request = SetValuesRequest::new(instance, value_references.to_vec(), values);
        let response: StatusResponse = self.call(function, &request)?;
        Ok(response.status)
    }
}
