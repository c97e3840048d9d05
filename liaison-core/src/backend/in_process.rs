// MIT License
// Copyright 2023--present liaison developers

//! A minimal model implemented in Rust.
//!
//! Every value reference holds one value of whatever kind was last written to
//! it. Value reference `0` is the model time as `Float64`. `fmi3DoStep`
//! advances the time by the step size.

use std::collections::HashMap;

use crate::backend::{BackendError, InstanceLogger, ModelBackend};
use crate::status::Status;
use crate::wire::{
    DoStepRequest, DoStepResponse, EnterInitializationModeRequest, InstantiateRequest,
    InstantiationKind, LifecycleOp, UpdateDiscreteStatesResponse, ValueKind, Values,
};

/// Value reference of the model time.
pub const TIME: u32 = 0;

#[derive(Debug, Clone, Default)]
pub struct InProcessModel {
    instantiation_token: Option<String>,
    terminate_after_steps: Option<u64>,
    fail_on_free: bool,
}

impl InProcessModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline to instantiate unless the caller presents `token`.
    pub fn with_instantiation_token(mut self, token: impl Into<String>) -> Self {
        self.instantiation_token = Some(token.into());
        self
    }

    /// Request termination once `steps` steps have completed.
    pub fn terminate_after_steps(mut self, steps: u64) -> Self {
        self.terminate_after_steps = Some(steps);
        self
    }

    /// Report a failure from every `fmi3FreeInstance`.
    pub fn failing_free(mut self) -> Self {
        self.fail_on_free = true;
        self
    }
}

#[derive(Debug)]
pub struct InProcessInstance {
    name: String,
    logger: InstanceLogger,
    logging_on: bool,
    time: f64,
    steps: u64,
    store: HashMap<u32, Values>,
}

impl InProcessInstance {
    fn log(&self, status: Status, category: &str, message: &str) {
        if self.logging_on || status >= Status::Error {
            self.logger.log(status, category, message);
        }
    }

    fn read(&self, kind: ValueKind, value_reference: u32) -> Option<Values> {
        if value_reference == TIME && kind == ValueKind::Float64 {
            return Some(Values::Float64(vec![self.time]));
        }
        self.store
            .get(&value_reference)
            .filter(|stored| stored.kind() == kind)
            .cloned()
    }
}

impl ModelBackend for InProcessModel {
    type Instance = InProcessInstance;

    fn instantiate(
        &self,
        kind: InstantiationKind,
        request: &InstantiateRequest,
        logger: InstanceLogger,
    ) -> Result<Option<InProcessInstance>, BackendError> {
        if let Some(expected) = &self.instantiation_token {
            if *expected != request.instantiation_token {
                logger.log(
                    Status::Error,
                    "logStatusError",
                    &format!("{}: instantiation token mismatch", request.instance_name),
                );
                return Ok(None);
            }
        }
        let instance = InProcessInstance {
            name: request.instance_name.clone(),
            logger,
            logging_on: request.logging_on,
            time: 0.0,
            steps: 0,
            store: HashMap::new(),
        };
        instance.log(
            Status::Ok,
            "logEvents",
            &format!("{} instantiated for {kind:?}", instance.name),
        );
        Ok(Some(instance))
    }

    fn free_instance(&self, instance: InProcessInstance) -> Result<(), BackendError> {
        if self.fail_on_free {
            return Err(BackendError::Teardown(format!(
                "{} could not be released",
                instance.name
            )));
        }
        Ok(())
    }

    fn set_debug_logging(
        &self,
        instance: &mut InProcessInstance,
        logging_on: bool,
        _categories: &[String],
    ) -> Result<Status, BackendError> {
        instance.logging_on = logging_on;
        Ok(Status::Ok)
    }

    fn enter_initialization_mode(
        &self,
        instance: &mut InProcessInstance,
        request: &EnterInitializationModeRequest,
    ) -> Result<Status, BackendError> {
        instance.time = request.start_time;
        Ok(Status::Ok)
    }

    fn lifecycle(
        &self,
        instance: &mut InProcessInstance,
        op: LifecycleOp,
    ) -> Result<Status, BackendError> {
        if op == LifecycleOp::Reset {
            instance.time = 0.0;
            instance.steps = 0;
            instance.store.clear();
        }
        Ok(Status::Ok)
    }

    fn do_step(
        &self,
        instance: &mut InProcessInstance,
        request: &DoStepRequest,
    ) -> Result<DoStepResponse, BackendError> {
        if request.communication_step_size <= 0.0 {
            instance.log(
                Status::Error,
                "logStatusError",
                &format!(
                    "communication step size must be positive, got {}",
                    request.communication_step_size
                ),
            );
            return Ok(DoStepResponse::failure(Status::Error));
        }

        instance.time = request.current_communication_point + request.communication_step_size;
        instance.steps += 1;
        let terminate_simulation = self
            .terminate_after_steps
            .is_some_and(|limit| instance.steps >= limit);
        if terminate_simulation {
            instance.log(Status::Ok, "logEvents", "simulation finished");
        }

        Ok(DoStepResponse {
            status: Status::Ok,
            event_handling_needed: false,
            terminate_simulation,
            early_return: false,
            last_successful_time: instance.time,
        })
    }

    fn update_discrete_states(
        &self,
        _instance: &mut InProcessInstance,
    ) -> Result<UpdateDiscreteStatesResponse, BackendError> {
        Ok(UpdateDiscreteStatesResponse::failure(Status::Ok))
    }

    fn get_values(
        &self,
        instance: &mut InProcessInstance,
        kind: ValueKind,
        value_references: &[u32],
        n_values: usize,
    ) -> Result<(Status, Values), BackendError> {
        // Only scalar variables: one value per reference.
        if n_values != value_references.len() {
            instance.log(
                Status::Error,
                "logStatusError",
                &format!(
                    "expected {} values, caller provided room for {n_values}",
                    value_references.len()
                ),
            );
            return Ok((Status::Error, Values::empty(kind)));
        }

        let mut values = Values::empty(kind);
        for &vr in value_references {
            let Some(value) = instance.read(kind, vr) else {
                instance.log(
                    Status::Error,
                    "logStatusError",
                    &format!("no {kind} variable with value reference {vr}"),
                );
                return Ok((Status::Error, Values::empty(kind)));
            };
            values
                .append(value)
                .map_err(|e| BackendError::InvalidArgument(e.to_string()))?;
        }
        Ok((Status::Ok, values))
    }

    fn set_values(
        &self,
        instance: &mut InProcessInstance,
        value_references: &[u32],
        values: &Values,
    ) -> Result<Status, BackendError> {
        if values.len() != value_references.len() {
            instance.log(
                Status::Error,
                "logStatusError",
                &format!(
                    "{} values for {} value references",
                    values.len(),
                    value_references.len()
                ),
            );
            return Ok(Status::Error);
        }
        if value_references.contains(&TIME) {
            instance.log(Status::Error, "logStatusError", "time is read-only");
            return Ok(Status::Error);
        }

        for (index, &vr) in value_references.iter().enumerate() {
            if let Some(value) = values.element(index) {
                instance.store.insert(vr, value);
            }
        }
        Ok(Status::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LogSink;
    use crate::wire::{LogEvent, RemoteHandle};
    use std::sync::{Arc, Mutex};

    fn logger() -> (InstanceLogger, Arc<Mutex<Vec<LogEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: LogSink = {
            let seen = Arc::clone(&seen);
            Arc::new(move |event: LogEvent| seen.lock().unwrap().push(event))
        };
        (InstanceLogger::new(RemoteHandle(1), sink), seen)
    }

    fn instantiate(model: &InProcessModel, logging_on: bool) -> InProcessInstance {
        let (logger, _) = logger();
        let mut request = InstantiateRequest::new("ball", "{token}");
        request.logging_on = logging_on;
        model
            .instantiate(InstantiationKind::CoSimulation, &request, logger)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let model = InProcessModel::new();
        let mut instance = instantiate(&model, false);
        let status = model
            .set_values(&mut instance, &[5, 6], &Values::Float64(vec![3.14, -1.0]))
            .unwrap();
        assert_eq!(status, Status::Ok);

        let (status, values) = model
            .get_values(&mut instance, ValueKind::Float64, &[6, 5], 2)
            .unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(values, Values::Float64(vec![-1.0, 3.14]));
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let model = InProcessModel::new();
        let mut instance = instantiate(&model, false);
        let (status, values) = model
            .get_values(&mut instance, ValueKind::Int32, &[77], 1)
            .unwrap();
        assert_eq!(status, Status::Error);
        assert!(values.is_empty());
    }

    #[test]
    fn step_advances_time_and_terminates() {
        let model = InProcessModel::new().terminate_after_steps(1);
        let mut instance = instantiate(&model, false);
        let request = DoStepRequest {
            instance: RemoteHandle(1),
            current_communication_point: 0.0,
            communication_step_size: 0.1,
            no_set_fmu_state_prior_to_current_point: true,
        };
        let response = model.do_step(&mut instance, &request).unwrap();
        assert_eq!(response.status, Status::Ok);
        assert!(response.terminate_simulation);
        assert_eq!(response.last_successful_time, 0.1);

        let (_, time) = model
            .get_values(&mut instance, ValueKind::Float64, &[TIME], 1)
            .unwrap();
        assert_eq!(time, Values::Float64(vec![0.1]));
    }

    #[test]
    fn wrong_token_declines() {
        let model = InProcessModel::new().with_instantiation_token("{abc}");
        let (logger, seen) = logger();
        let request = InstantiateRequest::new("ball", "{xyz}");
        let instance = model
            .instantiate(InstantiationKind::ModelExchange, &request, logger)
            .unwrap();
        assert!(instance.is_none());
        assert_eq!(seen.lock().unwrap()[0].status, Status::Error);
    }

    #[test]
    fn logging_follows_debug_flag() {
        let model = InProcessModel::new();
        let (logger, seen) = logger();
        let mut request = InstantiateRequest::new("ball", "");
        request.logging_on = true;
        let mut instance = model
            .instantiate(InstantiationKind::CoSimulation, &request, logger)
            .unwrap()
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);

        model.set_debug_logging(&mut instance, false, &[]).unwrap();
        model
            .lifecycle(&mut instance, LifecycleOp::Terminate)
            .unwrap();
        let request = DoStepRequest {
            instance: RemoteHandle(1),
            current_communication_point: 0.0,
            communication_step_size: 1.0,
            no_set_fmu_state_prior_to_current_point: false,
        };
        model.do_step(&mut instance, &request).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn failing_free_reports_teardown() {
        let model = InProcessModel::new().failing_free();
        let instance = instantiate(&model, false);
        assert!(matches!(
            model.free_instance(instance),
            Err(BackendError::Teardown(_))
        ));
    }
}
