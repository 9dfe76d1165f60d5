//! Client-side object-document mapping over a document store.
//!
//! This crate is the core of the kale project and provides:
//!
//! - **Values** ([`value`]) - The dynamically-typed field values documents are made of
//! - **Containers** ([`container`]) - Shared, nested attribute containers
//! - **Identity map** ([`identity`]) - Weak registry deduplicating hydrated documents
//! - **Models** ([`model`]) - Model declarations and the save/insert/remove lifecycle
//! - **Collections** ([`collection`]) - Model-aware and raw collection handles
//! - **Cursors** ([`cursor`]) - Lazy, sliceable cursors over query results
//! - **Database** ([`database`]) - The shared handle to one store
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Query and filtering API** ([`query`]) - Filter and query construction
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use kale::prelude::*;
//!
//! #[derive(Model)]
//! #[model(collection = "posts", database = app::db)]
//! struct Post;
//!
//! let post = Instance::<Post>::from_value(Value::map([("title", "hello")]))?;
//! post.set("meta", Value::map([("tags", Value::array(["intro"]))]));
//! post.save().await?;
//!
//! let tags = post.item("meta")?.as_container().unwrap().item("tags")?;
//! ```

pub mod backend;
pub mod collection;
pub mod container;
pub mod cursor;
pub mod database;
pub mod error;
pub mod identity;
pub mod model;
pub mod query;
pub mod value;
