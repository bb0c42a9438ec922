//! The `missionControl.*` handler set.
//!
//! Every handler validates its params before touching the store, and every
//! store failure is reported as `INTERNAL_ERROR` instead of being propagated.
//! [`MissionControl::invoke`] hands exactly one result to the caller's sink.

use aoc_core::job_contracts::{
    JobStatus, NewJob, OperationError, StatusStamp, DEFAULT_JOB_TYPE, LIST_LIMIT, METHOD_CREATE,
    METHOD_DELETE, METHOD_GET, METHOD_LIST, METHOD_SPAWN, METHOD_UPDATE_STATUS,
};
use aoc_core::job_ipc::{OperationRequest, OperationResponse};
use aoc_storage::{JobStore, StorageError};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type Handler = fn(&MissionControl, &Value) -> Result<Value, OperationError>;

pub const HANDLERS: [(&str, Handler); 6] = [
    (METHOD_LIST, handle_list as Handler),
    (METHOD_GET, handle_get as Handler),
    (METHOD_UPDATE_STATUS, handle_update_status as Handler),
    (METHOD_DELETE, handle_delete as Handler),
    (METHOD_CREATE, handle_create as Handler),
    (METHOD_SPAWN, handle_spawn as Handler),
];

pub fn handler_for(method: &str) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, handler)| *handler)
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

impl StoreLocation {
    fn open(&self) -> Result<JobStore, StorageError> {
        match self {
            StoreLocation::File(path) => JobStore::open(path),
            StoreLocation::InMemory => JobStore::open_in_memory(),
        }
    }
}

/// A job store opened on first use and kept for the lifetime of the handle.
/// A failed open leaves the handle empty so the next call retries.
pub struct StoreHandle {
    location: StoreLocation,
    store: Mutex<Option<JobStore>>,
    opens: AtomicUsize,
}

impl StoreHandle {
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            store: Mutex::new(None),
            opens: AtomicUsize::new(0),
        }
    }

    /// How many times the store has been opened; stays at 1 once open.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.store
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or_else(|poisoned| poisoned.into_inner().is_some())
    }

    pub fn with_store<T>(
        &self,
        f: impl FnOnce(&mut JobStore) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let store = match guard.take() {
            Some(store) => store,
            None => {
                let store = self.location.open()?;
                let opens = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
                info!(event = "job_store_opened", location = ?self.location, opens);
                store
            }
        };
        f(guard.insert(store))
    }
}

pub struct MissionControl {
    store: StoreHandle,
    clock: Arc<dyn Clock>,
}

impl MissionControl {
    pub fn new(location: StoreLocation) -> Self {
        Self {
            store: StoreHandle::new(location),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn open_at(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreLocation::File(path.into()))
    }

    pub fn in_memory() -> Self {
        Self::new(StoreLocation::InMemory)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Routes `method` to its handler and reports the outcome to `respond`
    /// exactly once, as `(true, payload, None)` or `(false, None, error)`.
    pub fn invoke<F>(&self, method: &str, params: &Value, respond: F)
    where
        F: FnOnce(bool, Option<Value>, Option<OperationError>),
    {
        let result = match handler_for(method) {
            Some(handler) => handler(self, params),
            None => Err(OperationError::invalid_request(format!(
                "Unknown method: {method}"
            ))),
        };

        match result {
            Ok(payload) => respond(true, Some(payload), None),
            Err(error) => {
                debug!(event = "mission_control_error", method, code = %error.code, message = %error.message);
                respond(false, None, Some(error))
            }
        }
    }

    pub fn call(&self, request: &OperationRequest) -> OperationResponse {
        let mut response = None;
        self.invoke(&request.method, &request.params, |ok, payload, error| {
            response = Some(OperationResponse {
                request_id: request.request_id.clone(),
                ok,
                payload,
                error,
            });
        });
        response.unwrap_or_else(|| {
            OperationResponse::failure(
                request.request_id.clone(),
                OperationError::internal("handler produced no response"),
            )
        })
    }

    fn with_store<T>(
        &self,
        method: &str,
        action: &str,
        f: impl FnOnce(&mut JobStore) -> Result<T, StorageError>,
    ) -> Result<T, OperationError> {
        self.store.with_store(f).map_err(|err| {
            warn!(event = "mission_control_store_error", method, error = %err);
            OperationError::internal(format!("Failed to {action}: {err}"))
        })
    }
}

fn handle_list(control: &MissionControl, _params: &Value) -> Result<Value, OperationError> {
    let jobs = control.with_store(METHOD_LIST, "list jobs", |store| {
        store.recent_jobs(LIST_LIMIT)
    })?;
    Ok(json!({ "ok": true, "jobs": jobs }))
}

fn handle_get(control: &MissionControl, params: &Value) -> Result<Value, OperationError> {
    let id = param_string(params, "id");
    if id.is_empty() {
        return Err(OperationError::invalid_request("Missing id"));
    }

    let job = control.with_store(METHOD_GET, "get job", |store| store.job(&id))?;
    match job {
        Some(job) => Ok(json!({ "ok": true, "job": job })),
        None => Err(OperationError::not_found(format!("Job not found: {id}"))),
    }
}

fn handle_update_status(
    control: &MissionControl,
    params: &Value,
) -> Result<Value, OperationError> {
    let id = param_string(params, "id");
    let status = param_string(params, "status");
    if id.is_empty() || status.is_empty() {
        return Err(OperationError::invalid_request("Missing id or status"));
    }
    let status = status
        .parse::<JobStatus>()
        .ok()
        .filter(JobStatus::is_settable)
        .ok_or_else(|| OperationError::invalid_request("Invalid status"))?;

    let stamp = StatusStamp::for_status(status, control.clock.now_ms());
    let changes = control.with_store(METHOD_UPDATE_STATUS, "update job status", |store| {
        store.update_job_status(&id, &stamp)
    })?;
    debug!(event = "job_status_updated", job_id = %id, status = %status, changes);
    Ok(json!({ "ok": true }))
}

fn handle_delete(control: &MissionControl, params: &Value) -> Result<Value, OperationError> {
    let id = param_string(params, "id");
    if id.is_empty() {
        return Err(OperationError::invalid_request("Missing id"));
    }

    let deleted = control.with_store(METHOD_DELETE, "delete job", |store| store.delete_job(&id))?;
    info!(event = "job_deleted", job_id = %id, deleted);
    Ok(json!({ "ok": true, "deleted": deleted }))
}

fn handle_create(control: &MissionControl, params: &Value) -> Result<Value, OperationError> {
    let job_type = param_string(params, "type");
    let job = NewJob {
        job_type: if job_type.is_empty() {
            DEFAULT_JOB_TYPE.to_string()
        } else {
            job_type
        },
        title: param_string(params, "title"),
        description: param_opt_string(params, "description"),
        priority: param_priority(params),
        agent_id: param_opt_string(params, "agent_id"),
        tags: param_opt_string(params, "tags"),
        ..NewJob::new(Uuid::new_v4().to_string(), control.clock.now_ms())
    };

    control.with_store(METHOD_CREATE, "create job", |store| store.insert_job(&job))?;
    info!(event = "job_created", job_id = %job.id, job_type = %job.job_type);
    Ok(json!({ "ok": true, "id": job.id }))
}

fn handle_spawn(_control: &MissionControl, _params: &Value) -> Result<Value, OperationError> {
    Err(OperationError::not_implemented(format!(
        "{METHOD_SPAWN} is not implemented"
    )))
}

/// Text form of a param: strings as-is, `null`/missing as empty, anything
/// else as its JSON rendering.
fn param_string(params: &Value, key: &str) -> String {
    match params.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(value)) => value.clone(),
        Some(other) => other.to_string(),
    }
}

fn param_opt_string(params: &Value, key: &str) -> Option<String> {
    Some(param_string(params, key)).filter(|value| !value.is_empty())
}

fn param_priority(params: &Value) -> i64 {
    let truncate = |value: f64| value.is_finite().then(|| value.trunc() as i64);
    match params.get("priority") {
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(truncate))
            .unwrap_or(0),
        Some(Value::String(text)) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(truncate))
                .unwrap_or(0)
        }
        Some(Value::Bool(flag)) => i64::from(*flag),
        _ => 0,
    }
}
