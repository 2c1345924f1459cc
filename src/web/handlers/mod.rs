//! Request handlers, grouped by endpoint family.

pub mod analytics;
pub mod health;
pub mod queue;
pub mod status;
pub mod usage;
