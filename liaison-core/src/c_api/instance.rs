// MIT License
// Copyright 2023--present liaison developers

//! The object behind an `fmi3Instance` handed out by the stub.

use std::ffi::CString;
use std::os::raw::c_char;

use crate::client::{ClientError, RemoteModel};
use crate::config::UnitConfig;
use crate::status::{set_last_error, Status};
use crate::transport::{Session, Subscription};
use crate::types::{fmi3InstanceEnvironment, fmi3LogMessageCallback};
use crate::wire::{
    self, DoStepRequest, DoStepResponse, EnterInitializationModeRequest, Function,
    InstantiateRequest, InstantiationKind, LifecycleOp, LogEvent, RemoteHandle,
    UpdateDiscreteStatesResponse, ValueKind, Values,
};

/// The host's log callback plus the environment pointer it expects back.
#[derive(Clone, Copy)]
pub(crate) struct HostLogger {
    environment: fmi3InstanceEnvironment,
    callback: fmi3LogMessageCallback,
}

impl HostLogger {
    pub(crate) fn new(environment: fmi3InstanceEnvironment, callback: fmi3LogMessageCallback) -> Self {
        Self {
            environment,
            callback,
        }
    }

    pub(crate) fn emit(&self, status: Status, category: &str, message: &str) {
        let Some(callback) = self.callback else {
            return;
        };
        let category = c_text(category);
        let message = c_text(message);
        unsafe { callback(self.environment, status.into(), category.as_ptr(), message.as_ptr()) };
    }

    fn forward(&self, event: &LogEvent) {
        self.emit(event.status, &event.category, &event.message);
    }
}

fn c_text(text: &str) -> CString {
    CString::new(text.replace('\0', " ")).unwrap_or_default()
}

fn status_category(status: Status) -> &'static str {
    match status {
        Status::Ok => "logEvents",
        Status::Warning => "logStatusWarning",
        Status::Discard => "logStatusDiscard",
        Status::Error => "logStatusError",
        Status::Fatal => "logStatusFatal",
    }
}

/// Report a failure to the host: last-error slot plus log callback.
pub(crate) fn report(logger: &HostLogger, status: Status, message: &str) {
    set_last_error(message);
    logger.emit(status, status_category(status), message);
}

/// One remote instance as seen by the host.
pub struct RemoteInstance {
    model: RemoteModel,
    handle: RemoteHandle,
    logs: Subscription,
    logger: HostLogger,
    strings: Vec<CString>,
    binaries: Vec<Vec<u8>>,
}

impl RemoteInstance {
    /// Connect using the unit config next to `resource_path` and instantiate.
    ///
    /// `Ok(None)` is the model declining; the host has already been told.
    pub(crate) fn open(
        kind: InstantiationKind,
        request: &InstantiateRequest,
        resource_path: Option<&str>,
        logger: HostLogger,
    ) -> Result<Option<Self>, ClientError> {
        let config = UnitConfig::load(&UnitConfig::locate(resource_path)?)?;
        let session = Session::connect(&config.transport)?;
        Self::open_on(RemoteModel::new(session, config.namespace), kind, request, logger)
    }

    pub(crate) fn open_on(
        model: RemoteModel,
        kind: InstantiationKind,
        request: &InstantiateRequest,
        logger: HostLogger,
    ) -> Result<Option<Self>, ClientError> {
        let mut logs = model.subscribe_logs()?;
        let Some(handle) = model.instantiate(kind, request)? else {
            // Nothing else can be live on this fresh session.
            let events = decode_events(&mut logs);
            for event in &events {
                logger.forward(event);
            }
            let message = format!(
                "{}: model declined to instantiate {}",
                Function::Instantiate(kind),
                request.instance_name
            );
            // The model's own messages say why; add ours only when it sent none.
            if events.is_empty() {
                report(&logger, Status::Error, &message);
            } else {
                set_last_error(&message);
            }
            model.session().close();
            return Ok(None);
        };

        let mut instance = Self {
            model,
            handle,
            logs,
            logger,
            strings: Vec::new(),
            binaries: Vec::new(),
        };
        instance.relay_logs();
        Ok(Some(instance))
    }

    pub fn handle(&self) -> RemoteHandle {
        self.handle
    }

    pub(crate) fn logger(&self) -> &HostLogger {
        &self.logger
    }

    /// Called before every operation. Drops strings and binaries handed out
    /// by the previous one.
    pub(crate) fn begin_call(&mut self) {
        self.strings.clear();
        self.binaries.clear();
    }

    /// Forward this instance's pending log events to the host.
    pub(crate) fn relay_logs(&mut self) {
        for event in decode_events(&mut self.logs) {
            if event.instance == Some(self.handle) {
                self.logger.forward(&event);
            }
        }
    }

    fn fail(&self, function: &str, error: ClientError) -> Status {
        let status = error.status();
        report(&self.logger, status, &format!("{function}: {error}"));
        status
    }

    /// Release the remote instance and the session.
    pub(crate) fn free(mut self) {
        if let Err(e) = self.model.free_instance(self.handle) {
            self.fail("fmi3FreeInstance", e);
        }
        self.relay_logs();
        self.model.session().close();
    }

    pub(crate) fn set_debug_logging(&mut self, logging_on: bool, categories: Vec<String>) -> Status {
        self.model
            .set_debug_logging(self.handle, logging_on, categories)
            .unwrap_or_else(|e| self.fail("fmi3SetDebugLogging", e))
    }

    pub(crate) fn enter_initialization_mode(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> Status {
        let request = EnterInitializationModeRequest {
            instance: self.handle,
            tolerance_defined: tolerance.is_some(),
            tolerance: tolerance.unwrap_or_default(),
            start_time,
            stop_time_defined: stop_time.is_some(),
            stop_time: stop_time.unwrap_or_default(),
        };
        self.model
            .enter_initialization_mode(&request)
            .unwrap_or_else(|e| self.fail("fmi3EnterInitializationMode", e))
    }

    pub(crate) fn lifecycle(&mut self, op: LifecycleOp) -> Status {
        self.model
            .lifecycle(self.handle, op)
            .unwrap_or_else(|e| self.fail(op.name(), e))
    }

    pub(crate) fn do_step(
        &mut self,
        current_communication_point: f64,
        communication_step_size: f64,
        no_set_fmu_state_prior_to_current_point: bool,
    ) -> DoStepResponse {
        let request = DoStepRequest {
            instance: self.handle,
            current_communication_point,
            communication_step_size,
            no_set_fmu_state_prior_to_current_point,
        };
        self.model
            .do_step(&request)
            .unwrap_or_else(|e| DoStepResponse::failure(self.fail("fmi3DoStep", e)))
    }

    pub(crate) fn update_discrete_states(&mut self) -> UpdateDiscreteStatesResponse {
        self.model
            .update_discrete_states(self.handle)
            .unwrap_or_else(|e| {
                UpdateDiscreteStatesResponse::failure(self.fail("fmi3UpdateDiscreteStates", e))
            })
    }

    pub(crate) fn get_values(
        &mut self,
        kind: ValueKind,
        value_references: &[u32],
        n_values: usize,
    ) -> (Status, Values) {
        self.model
            .get_values(self.handle, kind, value_references, n_values)
            .unwrap_or_else(|e| (self.fail(kind.getter_name(), e), Values::empty(kind)))
    }

    pub(crate) fn set_values(&mut self, value_references: &[u32], values: Values) -> Status {
        let function = values.kind().setter_name();
        self.model
            .set_values(self.handle, value_references, values)
            .unwrap_or_else(|e| self.fail(function, e))
    }

    /// Keep `strings` alive until the next call and return pointers to them.
    pub(crate) fn retain_strings(&mut self, strings: Vec<String>) -> Vec<*const c_char> {
        self.strings = strings.iter().map(|s| c_text(s)).collect();
        self.strings.iter().map(|s| s.as_ptr()).collect()
    }

    /// Keep `binaries` alive until the next call and return `(size, pointer)`
    /// for each.
    pub(crate) fn retain_binaries(&mut self, binaries: Vec<Vec<u8>>) -> Vec<(usize, *const u8)> {
        self.binaries = binaries;
        self.binaries
            .iter()
            .map(|b| (b.len(), b.as_ptr()))
            .collect()
    }
}

fn decode_events(logs: &mut Subscription) -> Vec<LogEvent> {
    logs.drain()
        .iter()
        .filter_map(|payload| match wire::decode::<LogEvent>(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(error = %e, "dropping undecodable log event");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::in_process::InProcessModel;
    use crate::server::Dispatcher;
    use crate::status::fmi3Status;
    use crate::transport::memory::MemoryBus;
    use crate::types::fmi3String;
    use std::ffi::CStr;
    use std::os::raw::c_void;
    use std::sync::{Arc, Mutex};

    type Seen = Mutex<Vec<(fmi3Status, String, String)>>;

    unsafe extern "C" fn record(
        environment: fmi3InstanceEnvironment,
        status: fmi3Status,
        category: fmi3String,
        message: fmi3String,
    ) {
        let seen = unsafe { &*(environment as *const Seen) };
        let category = unsafe { CStr::from_ptr(category) }.to_string_lossy().into_owned();
        let message = unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned();
        seen.lock().unwrap().push((status, category, message));
    }

    fn serve(bus: &MemoryBus, model: InProcessModel) -> Arc<Dispatcher<InProcessModel>> {
        let dispatcher = Arc::new(Dispatcher::new(model, Session::in_memory(bus), "ball").unwrap());
        dispatcher.serve().unwrap();
        dispatcher
    }

    #[test]
    fn only_own_logs_are_forwarded() {
        let bus = MemoryBus::new();
        let _server = serve(&bus, InProcessModel::new());
        let seen_a: Box<Seen> = Box::default();
        let seen_b: Box<Seen> = Box::default();
        let logger_a = HostLogger::new(&*seen_a as *const Seen as *mut c_void, Some(record));
        let logger_b = HostLogger::new(&*seen_b as *const Seen as *mut c_void, Some(record));

        let mut request = InstantiateRequest::new("a", "");
        request.logging_on = true;
        let model = RemoteModel::new(Session::in_memory(&bus), "ball");
        let mut a = RemoteInstance::open_on(model, InstantiationKind::CoSimulation, &request, logger_a)
            .unwrap()
            .unwrap();
        let model = RemoteModel::new(Session::in_memory(&bus), "ball");
        let mut b = RemoteInstance::open_on(model, InstantiationKind::CoSimulation, &request, logger_b)
            .unwrap()
            .unwrap();
        let before_a = seen_a.lock().unwrap().len();
        let before_b = seen_b.lock().unwrap().len();

        let response = b.do_step(0.0, -1.0, false);
        assert_eq!(response.status, Status::Error);
        b.relay_logs();
        a.relay_logs();

        assert_eq!(seen_a.lock().unwrap().len(), before_a);
        let seen_b = seen_b.lock().unwrap();
        assert_eq!(seen_b.len(), before_b + 1);
        assert_eq!(seen_b[before_b].0, fmi3Status::fmi3Error);
        assert!(seen_b[before_b].2.contains("step size"));
        drop(seen_b);

        a.free();
        b.free();
    }

    #[test]
    fn transport_failure_is_reported_through_the_callback() {
        let bus = MemoryBus::new();
        let server = serve(&bus, InProcessModel::new());
        let seen: Box<Seen> = Box::default();
        let logger = HostLogger::new(&*seen as *const Seen as *mut c_void, Some(record));
        let model = RemoteModel::new(Session::in_memory(&bus), "ball");
        let mut instance = RemoteInstance::open_on(
            model,
            InstantiationKind::CoSimulation,
            &InstantiateRequest::new("a", ""),
            logger,
        )
        .unwrap()
        .unwrap();

        server.shutdown();
        assert_eq!(instance.lifecycle(LifecycleOp::Terminate), Status::Fatal);
        let seen = seen.lock().unwrap();
        let (status, category, message) = seen.last().unwrap();
        assert_eq!(*status, fmi3Status::fmi3Fatal);
        assert_eq!(category, "logStatusFatal");
        assert!(message.starts_with("fmi3Terminate"));
    }

    fn decline(bus: &MemoryBus) -> Vec<(fmi3Status, String, String)> {
        let seen: Box<Seen> = Box::default();
        let logger = HostLogger::new(&*seen as *const Seen as *mut c_void, Some(record));
        let model = RemoteModel::new(Session::in_memory(bus), "ball");
        let opened = RemoteInstance::open_on(
            model,
            InstantiationKind::CoSimulation,
            &InstantiateRequest::new("a", "{wrong}"),
            logger,
        )
        .unwrap();
        assert!(opened.is_none());
        let seen = seen.lock().unwrap().clone();
        seen
    }

    #[test]
    fn declined_instantiation_logs_once() {
        let bus = MemoryBus::new();
        let _server = serve(&bus, InProcessModel::new().with_instantiation_token("{right}"));
        let seen = decline(&bus);
        assert_eq!(seen.len(), 1, "{seen:?}");
        let (status, category, message) = &seen[0];
        assert_eq!(*status, fmi3Status::fmi3Error);
        assert_eq!(category, "logStatusError");
        assert!(message.contains("token mismatch"));

        let last = unsafe { CStr::from_ptr(crate::status::liaison_last_error()) };
        assert!(last
            .to_str()
            .unwrap()
            .starts_with("fmi3InstantiateCoSimulation: model declined"));
    }

    #[test]
    fn silent_decline_is_explained_to_the_host() {
        let bus = MemoryBus::new();
        let server = Session::in_memory(&bus);
        server
            .declare_responder(
                &Function::Instantiate(InstantiationKind::CoSimulation).key("ball"),
                Arc::new(|_: &[u8]| -> Vec<u8> {
                    wire::encode(&crate::wire::InstantiateResponse { instance: None }).unwrap()
                }),
            )
            .unwrap();
        let seen = decline(&bus);
        assert_eq!(seen.len(), 1, "{seen:?}");
        assert!(seen[0].2.contains("model declined to instantiate a"));
    }

    #[test]
    fn retained_strings_are_nul_terminated() {
        let bus = MemoryBus::new();
        let _server = serve(&bus, InProcessModel::new());
        let model = RemoteModel::new(Session::in_memory(&bus), "ball");
        let mut instance = RemoteInstance::open_on(
            model,
            InstantiationKind::ModelExchange,
            &InstantiateRequest::new("a", ""),
            HostLogger::new(std::ptr::null_mut(), None),
        )
        .unwrap()
        .unwrap();

        let pointers = instance.retain_strings(vec!["left".into(), "right".into()]);
        let text: Vec<&str> = pointers
            .iter()
            .map(|p| unsafe { CStr::from_ptr(*p) }.to_str().unwrap())
            .collect();
        assert_eq!(text, ["left", "right"]);
        instance.free();
    }
}
