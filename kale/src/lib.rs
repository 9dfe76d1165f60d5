//! Lightweight document models over a schema-less document store.
//!
//! This crate is the primary entry point of the kale framework. It re-exports
//! the core types from the sub-crates and provides access to the storage
//! backends.
//!
//! # Features
//!
//! - **Attribute containers** - Nested documents readable by key or by attribute
//! - **Persistent models** - `save`, `insert` and `remove` map instances to stored documents
//! - **Identity map** - Repeated reads of a live document return the same instance
//! - **Lazy cursors** - Hydrate one document per advance; slicing never over-fetches
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::OnceLock;
//! use kale::{prelude::*, memory::InMemoryStore};
//!
//! static DB: OnceLock<Database> = OnceLock::new();
//!
//! fn db() -> Database {
//!     DB.get_or_init(|| Database::new(InMemoryStore::new())).clone()
//! }
//!
//! #[derive(Model)]
//! #[model(collection = "users", database = db)]
//! struct User;
//!
//! #[tokio::main]
//! async fn main() -> KaleResult<()> {
//!     let alice = Instance::<User>::from_value(Value::map([("name", "alice")]))?;
//!     alice.set("address", Value::map([("city", "Montreal")]));
//!     alice.save().await?;
//!
//!     // The identity map hands back the same live instance.
//!     let found = User::collection()?
//!         .find_one(Filter::eq("address.city", "Montreal"))
//!         .await?
//!         .unwrap();
//!     assert!(Instance::ptr_eq(&alice, &found));
//!
//!     // Cursors are lazy; slicing narrows the query instead of fetching.
//!     let first_two = User::collection()?
//!         .find(Query::new())
//!         .slice(..2)?
//!         .try_collect()
//!         .await?;
//!
//!     alice.remove(None).await?;
//!     assert!(!alice.is_persisted());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use kale_core::{
    backend, collection, container, cursor, database, error, identity, model, query, value,
};
pub use kale_macros::Model;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use kale_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use kale_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
