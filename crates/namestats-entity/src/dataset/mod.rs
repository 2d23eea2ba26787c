//! Uploaded dataset entities.

pub mod model;
pub mod status;

pub use model::{CreateDataset, Dataset};
pub use status::DatasetStatus;
