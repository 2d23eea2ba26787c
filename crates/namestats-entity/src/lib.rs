//! # namestats-entity
//!
//! Domain entity models for NameStats. Every struct in this crate
//! represents a database table row or a domain value object. Database
//! entities additionally derive `sqlx::FromRow`.

pub mod dataset;
pub mod job;
pub mod record;
