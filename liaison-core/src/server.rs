// MIT License
// Copyright 2023--present liaison developers

//! Server-side dispatcher.
//!
//! A [`Dispatcher`] owns one [`ModelBackend`] and the registry of instances
//! created through it. [`Dispatcher::serve`] declares one responder per
//! catalogue function on the session; each responder decodes its request,
//! resolves the remote handle, calls the backend and encodes the reply.
//!
//! Every request is answered. A stale handle, an undecodable request or a
//! backend that could not make the call yields a reply with
//! [`Status::Error`]; a panic inside the backend yields [`Status::Fatal`].

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::backend::{BackendError, InstanceLogger, LogSink, ModelBackend};
use crate::config::{validate_namespace, ConfigError};
use crate::registry::{InstanceRegistry, RegistryError};
use crate::status::Status;
use crate::transport::{Session, TransportError};
use crate::wire::{
    self, DoStepRequest, DoStepResponse, EnterInitializationModeRequest, Function,
    GetValuesRequest, GetValuesResponse, InstanceRequest, InstantiateRequest, InstantiateResponse,
    LogEvent, RemoteHandle, SetDebugLoggingRequest, SetValuesRequest, StatusResponse,
    UpdateDiscreteStatesResponse, Values, VoidResponse, WireError,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// `None` once the instance has been handed back to the backend.
type Slot<I> = Mutex<Option<I>>;

/// Serves one model backend under one namespace.
pub struct Dispatcher<B: ModelBackend> {
    backend: B,
    session: Session,
    namespace: String,
    registry: InstanceRegistry<Slot<B::Instance>>,
}

impl<B: ModelBackend> Dispatcher<B> {
    pub fn new(
        backend: B,
        session: Session,
        namespace: impl Into<String>,
    ) -> Result<Self, ServerError> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        Ok(Self {
            backend,
            session,
            namespace,
            registry: InstanceRegistry::new(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of instances currently registered.
    pub fn live_instances(&self) -> usize {
        self.registry.len()
    }

    /// Declare a responder for every catalogue function.
    pub fn serve(self: &Arc<Self>) -> Result<(), ServerError> {
        for function in Function::all() {
            let dispatcher = Arc::clone(self);
            self.session.declare_responder(
                &function.key(&self.namespace),
                Arc::new(move |payload: &[u8]| -> Vec<u8> { dispatcher.handle(function, payload) }),
            )?;
        }
        tracing::info!(
            namespace = %self.namespace,
            endpoints = ?self.session.local_endpoints(),
            "serving"
        );
        Ok(())
    }

    /// Free every remaining instance, then withdraw from the session.
    pub fn shutdown(&self) {
        for (handle, slot) in self.registry.drain() {
            let instance = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(instance) = instance {
                tracing::info!(%handle, "freeing instance left open at shutdown");
                self.release(handle, instance);
            }
        }
        self.session.close();
    }

    /// Answer one request. Never fails: errors become failure replies.
    pub fn handle(&self, function: Function, payload: &[u8]) -> Vec<u8> {
        tracing::debug!(%function, bytes = payload.len(), "dispatch");
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(function, payload)));
        let status = match outcome {
            Ok(Ok(reply)) => return reply,
            Ok(Err(e)) => {
                tracing::warn!(%function, error = %e, "request failed");
                Status::Error
            }
            Err(_) => {
                tracing::error!(%function, "model panicked");
                Status::Fatal
            }
        };
        failure_reply(function, status).unwrap_or_else(|e| {
            tracing::error!(%function, error = %e, "failed to encode failure reply");
            Vec::new()
        })
    }

    fn dispatch(&self, function: Function, payload: &[u8]) -> Result<Vec<u8>, ServerError> {
        let reply = match function {
            Function::Instantiate(kind) => {
                let request: InstantiateRequest = wire::decode(payload)?;
                let handle = self.registry.allocate_handle();
                let logger = InstanceLogger::new(handle, self.log_sink());
                let instance = match self.backend.instantiate(kind, &request, logger)? {
                    Some(instance) => {
                        self.registry.insert(handle, Mutex::new(Some(instance)))?;
                        tracing::info!(%handle, name = %request.instance_name, ?kind, "instantiated");
                        Some(handle)
                    }
                    None => {
                        tracing::warn!(name = %request.instance_name, ?kind, "model declined to instantiate");
                        None
                    }
                };
                wire::encode(&InstantiateResponse { instance })?
            }
            Function::FreeInstance => {
                let request: InstanceRequest = wire::decode(payload)?;
                self.free(request.instance);
                wire::encode(&VoidResponse)?
            }
            Function::SetDebugLogging => {
                let request: SetDebugLoggingRequest = wire::decode(payload)?;
                let status = self.with_instance(request.instance, |backend, instance| {
                    backend.set_debug_logging(instance, request.logging_on, &request.categories)
                })?;
                wire::encode(&StatusResponse { status })?
            }
            Function::EnterInitializationMode => {
                let request: EnterInitializationModeRequest = wire::decode(payload)?;
                let status = self.with_instance(request.instance, |backend, instance| {
                    backend.enter_initialization_mode(instance, &request)
                })?;
                wire::encode(&StatusResponse { status })?
            }
            Function::Lifecycle(op) => {
                let request: InstanceRequest = wire::decode(payload)?;
                let status = self.with_instance(request.instance, |backend, instance| {
                    backend.lifecycle(instance, op)
                })?;
                wire::encode(&StatusResponse { status })?
            }
            Function::DoStep => {
                let request: DoStepRequest = wire::decode(payload)?;
                let response = self.with_instance(request.instance, |backend, instance| {
                    backend.do_step(instance, &request)
                })?;
                wire::encode(&response)?
            }
            Function::UpdateDiscreteStates => {
                let request: InstanceRequest = wire::decode(payload)?;
                let response = self.with_instance(request.instance, |backend, instance| {
                    backend.update_discrete_states(instance)
                })?;
                wire::encode(&response)?
            }
            Function::GetValues(kind) => {
                let request: GetValuesRequest = wire::decode(payload)?;
                let n_values = request.capacity(kind)?;
                let (status, values) = self.with_instance(request.instance, |backend, instance| {
                    backend.get_values(instance, kind, &request.value_references, n_values)
                })?;
                if values.kind() != kind {
                    return Err(WireError::KindMismatch {
                        expected: kind,
                        found: values.kind(),
                    }
                    .into());
                }
                wire::encode(&GetValuesResponse::new(status, values))?
            }
            Function::SetValues(kind) => {
                let request: SetValuesRequest = wire::decode(payload)?;
                if request.values.kind() != kind {
                    return Err(WireError::KindMismatch {
                        expected: kind,
                        found: request.values.kind(),
                    }
                    .into());
                }
                let status = self.with_instance(request.instance, |backend, instance| {
                    backend.set_values(instance, &request.value_references, &request.values)
                })?;
                wire::encode(&StatusResponse { status })?
            }
        };
        Ok(reply)
    }

    /// Run `f` against the live instance behind `handle`.
    fn with_instance<R>(
        &self,
        handle: RemoteHandle,
        f: impl FnOnce(&B, &mut B::Instance) -> Result<R, BackendError>,
    ) -> Result<R, ServerError> {
        let slot = self.registry.get(handle)?;
        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        let instance = guard.as_mut().ok_or(RegistryError::NotFound(handle))?;
        Ok(f(&self.backend, instance)?)
    }

    /// The registry entry goes first, whatever the model says afterwards.
    fn free(&self, handle: RemoteHandle) {
        let Some(slot) = self.registry.remove(handle) else {
            return;
        };
        let instance = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(instance) = instance {
            self.release(handle, instance);
        }
    }

    fn release(&self, handle: RemoteHandle, instance: B::Instance) {
        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.backend.free_instance(instance)));
        match outcome {
            Ok(Ok(())) => tracing::info!(%handle, "instance freed"),
            Ok(Err(e)) => tracing::error!(%handle, error = %e, "model failed to free instance"),
            Err(_) => tracing::error!(%handle, "model panicked while freeing instance"),
        }
    }

    fn log_sink(&self) -> LogSink {
        let session = self.session.clone();
        let key = wire::log_key(&self.namespace);
        Arc::new(move |event: LogEvent| {
            let published = wire::encode(&event)
                .map_err(ServerError::from)
                .and_then(|payload| Ok(session.publish(&key, payload)?));
            if let Err(e) = published {
                tracing::warn!(error = %e, "failed to publish log event");
            }
        })
    }
}

/// Reply for `function` carrying `status` and nothing else.
fn failure_reply(function: Function, status: Status) -> Result<Vec<u8>, WireError> {
    match function {
        Function::Instantiate(_) => wire::encode(&InstantiateResponse { instance: None }),
        Function::FreeInstance => wire::encode(&VoidResponse),
        Function::SetDebugLogging
        | Function::EnterInitializationMode
        | Function::Lifecycle(_)
        | Function::SetValues(_) => wire::encode(&StatusResponse { status }),
        Function::DoStep => wire::encode(&DoStepResponse::failure(status)),
        Function::UpdateDiscreteStates => {
            wire::encode(&UpdateDiscreteStatesResponse::failure(status))
        }
        Function::GetValues(kind) => {
            wire::encode(&GetValuesResponse::new(status, Values::empty(kind)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::in_process::{InProcessModel, TIME};
    use crate::client::RemoteModel;
    use crate::transport::memory::MemoryBus;
    use crate::wire::{InstantiationKind, LifecycleOp, LogEvent, ValueKind};

    struct Fixture {
        _bus: MemoryBus,
        dispatcher: Arc<Dispatcher<InProcessModel>>,
        client: RemoteModel,
    }

    fn fixture(model: InProcessModel) -> Fixture {
        let bus = MemoryBus::new();
        let dispatcher =
            Arc::new(Dispatcher::new(model, Session::in_memory(&bus), "ball").unwrap());
        dispatcher.serve().unwrap();
        let client = RemoteModel::new(Session::in_memory(&bus), "ball");
        Fixture {
            _bus: bus,
            dispatcher,
            client,
        }
    }

    fn instantiate(client: &RemoteModel) -> RemoteHandle {
        client
            .instantiate(
                InstantiationKind::CoSimulation,
                &InstantiateRequest::new("ball", "{token}"),
            )
            .unwrap()
            .unwrap()
    }

    fn step(instance: RemoteHandle, point: f64, size: f64) -> DoStepRequest {
        DoStepRequest {
            instance,
            current_communication_point: point,
            communication_step_size: size,
            no_set_fmu_state_prior_to_current_point: true,
        }
    }

    #[test]
    fn set_then_get_float64() {
        let f = fixture(InProcessModel::new());
        let handle = instantiate(&f.client);

        let init = EnterInitializationModeRequest {
            instance: handle,
            tolerance_defined: false,
            tolerance: 0.0,
            start_time: 0.0,
            stop_time_defined: false,
            stop_time: 0.0,
        };
        assert_eq!(f.client.enter_initialization_mode(&init).unwrap(), Status::Ok);
        assert_eq!(
            f.client
                .lifecycle(handle, LifecycleOp::ExitInitializationMode)
                .unwrap(),
            Status::Ok
        );
        assert_eq!(
            f.client
                .set_values(handle, &[1], Values::Float64(vec![3.14]))
                .unwrap(),
            Status::Ok
        );

        let (status, values) = f
            .client
            .get_values(handle, ValueKind::Float64, &[1], 1)
            .unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(values, Values::Float64(vec![3.14]));
    }

    #[test]
    fn values_come_back_in_reference_order() {
        let f = fixture(InProcessModel::new());
        let handle = instantiate(&f.client);
        f.client
            .set_values(handle, &[1, 2, 3], Values::Int16(vec![10, 20, 30]))
            .unwrap();

        let (status, values) = f
            .client
            .get_values(handle, ValueKind::Int16, &[3, 1, 2], 3)
            .unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(values, Values::Int16(vec![30, 10, 20]));
    }

    #[test]
    fn strings_and_binaries_cross_the_wire() {
        let f = fixture(InProcessModel::new());
        let handle = instantiate(&f.client);
        f.client
            .set_values(handle, &[4], Values::String(vec!["hello".into()]))
            .unwrap();
        f.client
            .set_values(handle, &[5], Values::Binary(vec![vec![0, 1, 2, 255]]))
            .unwrap();

        let (_, strings) = f
            .client
            .get_values(handle, ValueKind::String, &[4], 1)
            .unwrap();
        assert_eq!(strings, Values::String(vec!["hello".into()]));
        let (_, binaries) = f
            .client
            .get_values(handle, ValueKind::Binary, &[5], 1)
            .unwrap();
        assert_eq!(binaries, Values::Binary(vec![vec![0, 1, 2, 255]]));
    }

    #[test]
    fn step_reports_termination() {
        let f = fixture(InProcessModel::new().terminate_after_steps(1));
        let handle = instantiate(&f.client);

        let response = f.client.do_step(&step(handle, 0.0, 0.1)).unwrap();
        assert_eq!(response.status, Status::Ok);
        assert!(response.terminate_simulation);
        assert_eq!(response.last_successful_time, 0.1);

        let (_, time) = f
            .client
            .get_values(handle, ValueKind::Float64, &[TIME], 1)
            .unwrap();
        assert_eq!(time, Values::Float64(vec![0.1]));
    }

    #[test]
    fn stale_handle_is_an_error() {
        let f = fixture(InProcessModel::new());
        let handle = instantiate(&f.client);
        f.client.free_instance(handle).unwrap();

        let (status, values) = f
            .client
            .get_values(handle, ValueKind::Float64, &[TIME], 1)
            .unwrap();
        assert_eq!(status, Status::Error);
        assert!(values.is_empty());

        let response = f.client.do_step(&step(handle, 0.0, 1.0)).unwrap();
        assert_eq!(response.status, Status::Error);
        // Freeing twice is harmless.
        f.client.free_instance(handle).unwrap();
    }

    #[test]
    fn never_issued_handle_is_an_error() {
        let f = fixture(InProcessModel::new());
        let status = f
            .client
            .lifecycle(RemoteHandle(4242), LifecycleOp::Terminate)
            .unwrap();
        assert_eq!(status, Status::Error);
        let response = f.client.update_discrete_states(RemoteHandle(4242)).unwrap();
        assert_eq!(response.status, Status::Error);
    }

    #[test]
    fn instances_are_independent() {
        let f = fixture(InProcessModel::new());
        let first = instantiate(&f.client);
        let second = instantiate(&f.client);
        assert_ne!(first, second);

        f.client
            .set_values(first, &[7], Values::UInt8(vec![1]))
            .unwrap();
        f.client
            .set_values(second, &[7], Values::UInt8(vec![2]))
            .unwrap();
        f.client.free_instance(second).unwrap();

        let (status, values) = f
            .client
            .get_values(first, ValueKind::UInt8, &[7], 1)
            .unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(values, Values::UInt8(vec![1]));
        assert_eq!(f.dispatcher.live_instances(), 1);
    }

    #[test]
    fn declined_instantiation_yields_no_handle() {
        let f = fixture(InProcessModel::new().with_instantiation_token("{right}"));
        let instance = f
            .client
            .instantiate(
                InstantiationKind::ModelExchange,
                &InstantiateRequest::new("ball", "{wrong}"),
            )
            .unwrap();
        assert_eq!(instance, None);
        assert_eq!(f.dispatcher.live_instances(), 0);
    }

    #[test]
    fn failed_free_still_unregisters() {
        let f = fixture(InProcessModel::new().failing_free());
        let handle = instantiate(&f.client);
        f.client.free_instance(handle).unwrap();
        assert_eq!(f.dispatcher.live_instances(), 0);
    }

    #[test]
    fn log_events_carry_the_handle() {
        let f = fixture(InProcessModel::new());
        let mut logs = f.client.subscribe_logs().unwrap();
        let mut request = InstantiateRequest::new("ball", "{token}");
        request.logging_on = true;
        let handle = f
            .client
            .instantiate(InstantiationKind::CoSimulation, &request)
            .unwrap()
            .unwrap();

        let events: Vec<LogEvent> = logs
            .drain()
            .iter()
            .map(|payload| wire::decode(payload).unwrap())
            .collect();
        assert!(!events.is_empty());
        assert!(events.iter().all(|event| event.instance == Some(handle)));
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let f = fixture(InProcessModel::new());
        let handle = instantiate(&f.client);
        let request = SetValuesRequest::new(handle, vec![1], Values::Float64(vec![1.0]));
        let reply = f
            .dispatcher
            .handle(Function::SetValues(ValueKind::Int32), &wire::encode(&request).unwrap());
        let response: StatusResponse = wire::decode(&reply).unwrap();
        assert_eq!(response.status, Status::Error);
    }

    fn read(f: &Fixture, kind: ValueKind, request: &GetValuesRequest) -> GetValuesResponse {
        let reply = f
            .dispatcher
            .handle(Function::GetValues(kind), &wire::encode(request).unwrap());
        wire::decode(&reply).unwrap()
    }

    fn events(logs: &mut crate::transport::Subscription) -> Vec<LogEvent> {
        logs.drain()
            .iter()
            .map(|payload| wire::decode(payload).unwrap())
            .collect()
    }

    #[test]
    fn huge_value_count_is_refused() {
        let f = fixture(InProcessModel::new());
        let handle = instantiate(&f.client);
        for kind in ValueKind::ALL {
            let mut request = GetValuesRequest::new(handle, vec![TIME], 1);
            request.n_values = 1 << 45;
            let response = read(&f, kind, &request);
            assert_eq!(response.status, Status::Error, "{kind}");
            assert_eq!(response.values, Values::empty(kind));
        }
        // The instance is still usable afterwards.
        let (status, _) = f
            .client
            .get_values(handle, ValueKind::Float64, &[TIME], 1)
            .unwrap();
        assert_eq!(status, Status::Ok);
    }

    #[test]
    fn count_mismatch_is_refused_before_the_model_sees_it() {
        let f = fixture(InProcessModel::new());
        let handle = instantiate(&f.client);
        let mut logs = f.client.subscribe_logs().unwrap();
        let cases = [
            (ValueKind::Float64, vec![TIME, TIME], 1),
            (ValueKind::Int32, vec![1, 2, 3], 0),
            (ValueKind::String, vec![4], 2),
            (ValueKind::Binary, vec![5, 6], 1),
            (ValueKind::Clock, vec![7], 0),
            (ValueKind::Clock, vec![7], 3),
        ];
        for (kind, references, n_values) in cases {
            let request = GetValuesRequest::new(handle, references, n_values);
            let response = read(&f, kind, &request);
            assert_eq!(response.status, Status::Error, "{kind} with room for {n_values}");
            assert!(response.values.is_empty());
        }
        // The model never ran, so it had nothing to complain about.
        assert!(events(&mut logs).is_empty());
    }

    #[test]
    fn spare_room_is_left_to_the_model() {
        let f = fixture(InProcessModel::new());
        let handle = instantiate(&f.client);
        let mut logs = f.client.subscribe_logs().unwrap();

        let response = read(&f, ValueKind::Float64, &GetValuesRequest::new(handle, vec![TIME], 3));
        assert_eq!(response.status, Status::Error);

        let events = events(&mut logs);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, "logStatusError");
        assert_eq!(events[0].instance, Some(handle));
    }

    #[test]
    fn undecodable_request_is_answered() {
        let f = fixture(InProcessModel::new());
        let reply = f
            .dispatcher
            .handle(Function::GetValues(ValueKind::Int64), &[0xff, 0xff]);
        let response: GetValuesResponse = wire::decode(&reply).unwrap();
        assert_eq!(response.status, Status::Error);
        assert_eq!(response.values, Values::Int64(Vec::new()));
    }

    #[test]
    fn shutdown_frees_everything() {
        let f = fixture(InProcessModel::new());
        instantiate(&f.client);
        instantiate(&f.client);
        assert_eq!(f.dispatcher.live_instances(), 2);

        f.dispatcher.shutdown();
        assert_eq!(f.dispatcher.live_instances(), 0);
        assert!(f
            .client
            .lifecycle(RemoteHandle(1), LifecycleOp::Terminate)
            .is_err());
    }

    #[test]
    fn invalid_namespace_is_rejected() {
        let bus = MemoryBus::new();
        assert!(matches!(
            Dispatcher::new(InProcessModel::new(), Session::in_memory(&bus), "a/b"),
            Err(ServerError::Config(_))
        ));
    }
}
