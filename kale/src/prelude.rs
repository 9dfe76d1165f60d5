//! Convenient re-exports of commonly used types from kale.
//!
//! ```ignore
//! use kale::prelude::*;
//! ```

pub use kale_core::{
    backend::{RawCursor, StoreBackend, StoreBackendBuilder},
    collection::{CollectionProxy, RawCollection},
    container::{AttrContainer, Attribute, ID_KEY},
    cursor::CursorProxy,
    database::Database,
    error::{KaleError, KaleResult},
    model::{BaseModel, Instance, Model, ModelExt},
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    value::{ModelRef, Value},
};
pub use kale_macros::Model;
