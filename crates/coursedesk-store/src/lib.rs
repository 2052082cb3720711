//! PostgreSQL store implementation for the Coursedesk registration core.

pub mod pg_store;
pub mod schema;

pub use pg_store::PgStore;
