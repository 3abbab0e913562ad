//! In-memory [`CloudApi`] for tests and local development.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::client::CloudApi;
use crate::error::ApiError;
use crate::types::{
    CreateInstanceRequest, Instance, InstanceFilter, InstanceStatus, InstanceType,
    NewStartupScript, StartupScript,
};

/// Fake cloud with scripted failures and per-operation call counters.
///
/// Outcomes queued with `fail_*` or [`MockCloudApi::queue_create_results`]
/// are consumed one per call, in order; once a queue is empty the operation
/// succeeds.
#[derive(Default)]
pub struct MockCloudApi {
    state: Mutex<MockState>,
    calls: CallCounters,
}

#[derive(Default)]
struct MockState {
    instances: Vec<Instance>,
    instance_types: Vec<InstanceType>,
    scripts: Vec<StartupScript>,
    create_results: VecDeque<Result<(), ApiError>>,
    delete_results: VecDeque<Result<(), ApiError>>,
    list_results: VecDeque<Result<(), ApiError>>,
    next_id: u64,
    created_requests: Vec<CreateInstanceRequest>,
}

#[derive(Default)]
struct CallCounters {
    list_instance_types: AtomicUsize,
    list_instances: AtomicUsize,
    create_instance: AtomicUsize,
    delete_instance: AtomicUsize,
    upload_script: AtomicUsize,
    delete_script: AtomicUsize,
    list_scripts: AtomicUsize,
}

impl MockCloudApi {
    /// Create an empty mock cloud.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(state: &mut MockState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{:04}", state.next_id)
    }

    /// Seed the instance-type catalog.
    pub fn set_instance_types(&self, instance_types: Vec<InstanceType>) {
        self.state().instance_types = instance_types;
    }

    /// Add an existing instance.
    pub fn add_instance(&self, instance: Instance) {
        self.state().instances.push(instance);
    }

    /// Add a running instance tagged with `group` and return its id.
    pub fn add_running(&self, group: &str, location: &str, hostname: &str) -> String {
        let mut state = self.state();
        let id = Self::next_id(&mut state, "inst");
        state.instances.push(Instance {
            id: id.clone(),
            hostname: hostname.to_string(),
            description: group.to_string(),
            instance_type: "1V100.6V".to_string(),
            location: location.to_string(),
            status: InstanceStatus::Running,
            ip: None,
            is_spot: false,
            created_at: None,
        });
        id
    }

    /// Remove an instance without going through the API.
    pub fn remove_instance(&self, instance_id: &str) {
        self.state().instances.retain(|i| i.id != instance_id);
    }

    /// Current instances.
    pub fn instances(&self) -> Vec<Instance> {
        self.state().instances.clone()
    }

    /// Current stored scripts.
    pub fn scripts(&self) -> Vec<StartupScript> {
        self.state().scripts.clone()
    }

    /// Every accepted create request, in order.
    pub fn created_requests(&self) -> Vec<CreateInstanceRequest> {
        self.state().created_requests.clone()
    }

    /// Fail the next unscripted create call with `err`.
    pub fn fail_create(&self, err: ApiError) {
        self.state().create_results.push_back(Err(err));
    }

    /// Script the outcome of the next create calls, one entry per call.
    pub fn queue_create_results(&self, results: impl IntoIterator<Item = Result<(), ApiError>>) {
        self.state().create_results.extend(results);
    }

    /// Fail the next unscripted delete call with `err`.
    pub fn fail_delete(&self, err: ApiError) {
        self.state().delete_results.push_back(Err(err));
    }

    /// Fail the next unscripted instance listing with `err`.
    pub fn fail_list(&self, err: ApiError) {
        self.state().list_results.push_back(Err(err));
    }

    pub fn list_instance_types_calls(&self) -> usize {
        self.calls.list_instance_types.load(Ordering::SeqCst)
    }

    pub fn list_instances_calls(&self) -> usize {
        self.calls.list_instances.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.calls.create_instance.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.calls.delete_instance.load(Ordering::SeqCst)
    }

    pub fn upload_script_calls(&self) -> usize {
        self.calls.upload_script.load(Ordering::SeqCst)
    }

    pub fn delete_script_calls(&self) -> usize {
        self.calls.delete_script.load(Ordering::SeqCst)
    }

    pub fn list_scripts_calls(&self) -> usize {
        self.calls.list_scripts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudApi for MockCloudApi {
    async fn list_instance_types(&self) -> Result<Vec<InstanceType>, ApiError> {
        self.calls.list_instance_types.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().instance_types.clone())
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, ApiError> {
        self.calls.list_instances.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();

        if let Some(Err(err)) = state.list_results.pop_front() {
            return Err(err);
        }

        Ok(state
            .instances
            .iter()
            .filter(|instance| filter.matches(instance))
            .cloned()
            .collect())
    }

    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<String, ApiError> {
        self.calls.create_instance.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();

        if let Some(Err(err)) = state.create_results.pop_front() {
            debug!(hostname = %request.hostname, error = %err, "[MOCK] Create failed");
            return Err(err);
        }

        let id = Self::next_id(&mut state, "inst");
        state.instances.push(Instance {
            id: id.clone(),
            hostname: request.hostname.clone(),
            description: request.description.clone(),
            instance_type: request.instance_type.clone(),
            location: request.location_code.clone(),
            status: InstanceStatus::Provisioning,
            ip: None,
            is_spot: request.is_spot,
            created_at: None,
        });
        state.created_requests.push(request.clone());

        debug!(instance_id = %id, hostname = %request.hostname, "[MOCK] Instance created");
        Ok(id)
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<(), ApiError> {
        self.calls.delete_instance.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();

        if let Some(Err(err)) = state.delete_results.pop_front() {
            return Err(err);
        }

        let before = state.instances.len();
        state.instances.retain(|i| i.id != instance_id);
        if state.instances.len() == before {
            return Err(ApiError::NotFound(format!("instance {instance_id}")));
        }
        Ok(())
    }

    async fn upload_script(&self, script: &NewStartupScript) -> Result<String, ApiError> {
        self.calls.upload_script.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();

        let id = Self::next_id(&mut state, "script");
        state.scripts.push(StartupScript {
            id: id.clone(),
            name: script.name.clone(),
            script: script.script.clone(),
        });
        Ok(id)
    }

    async fn delete_script(&self, script_id: &str) -> Result<(), ApiError> {
        self.calls.delete_script.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();

        let before = state.scripts.len();
        state.scripts.retain(|s| s.id != script_id);
        if state.scripts.len() == before {
            return Err(ApiError::NotFound(format!("script {script_id}")));
        }
        Ok(())
    }

    async fn list_scripts(&self, name: Option<&str>) -> Result<Vec<StartupScript>, ApiError> {
        self.calls.list_scripts.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .state()
            .scripts
            .iter()
            .filter(|script| name.map(|name| script.name == name).unwrap_or(true))
            .cloned()
            .collect())
    }
}
