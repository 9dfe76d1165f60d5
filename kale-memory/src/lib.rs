//! In-memory document storage backend for kale.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is meant for development,
//! tests, and small data sets.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Insertion-ordered collections** - Natural order is the order documents were inserted
//! - **Full query support** - Filtering on dotted paths, sorting, offset and limit
//! - **Unique indexes** - Enforced on insert and replace
//!
//! # Quick Start
//!
//! ```ignore
//! use kale::prelude::*;
//! use kale::memory::InMemoryStore;
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
//!     let user = Instance::<User>::from_value(Value::map([("name", "Alice")]))?;
//!     user.save().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
