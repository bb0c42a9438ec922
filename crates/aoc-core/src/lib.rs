pub mod job_contracts;
pub mod job_ipc;

pub use job_contracts::{ErrorCode, Job, JobStatus, NewJob, OperationError, StatusStamp};
pub use job_ipc::{OperationRequest, OperationResponse};
