//! PostgreSQL implementations of the store traits.

pub mod dataset;
pub mod job;
pub mod name_count;

pub use dataset::DatasetRepository;
pub use job::JobRepository;
pub use name_count::NameCountRepository;
