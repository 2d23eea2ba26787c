//! # namestats-service
//!
//! Boundary services used by the CLI: accepting dataset uploads,
//! scheduling reprocessing, soft deletion, and read-only job status.

pub mod dataset;
pub mod job;

pub use dataset::upload::{DatasetUploadService, SubmitDatasetParams, SubmittedDataset};
pub use job::status::{JobStatusService, JobStatusView};
