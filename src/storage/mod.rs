mod feeds;
mod schema;

pub use schema::{Database, StoreError};
