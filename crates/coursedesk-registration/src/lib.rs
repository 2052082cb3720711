//! Coursedesk — registration bounded context.
//!
//! Responsible for seat-reservation admission control, concurrency-token
//! guarded revisions, dependent-resource deletion, and occupancy queries.

pub mod application;
pub mod domain;
