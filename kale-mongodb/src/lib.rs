//! MongoDB backend implementation for kale.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait,
//! translating kale filters into MongoDB queries and streaming results through
//! driver cursors.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! kale = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use kale::{database::Database, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect(MongoDbStore::builder("mongodb://localhost:27017", "my_database")).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod query;
pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
