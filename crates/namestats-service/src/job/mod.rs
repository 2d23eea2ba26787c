//! Job services.

pub mod status;
