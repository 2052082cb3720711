//! Application-level operations for the registration context.

pub mod admission;
pub mod deletion;
pub mod queries;
pub mod revision;
