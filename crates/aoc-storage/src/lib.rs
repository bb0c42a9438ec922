mod job_store;

pub use job_store::{ConfidenceRecord, JobStore, StorageError, JOBS_SCHEMA_VERSION};
