//! Lazy, hydrating cursors over query results.
//!
//! A [`CursorProxy`] holds a query, not results. The backend cursor is opened
//! on the first [`next`](CursorProxy::next), and each advance fetches and
//! hydrates exactly one document. Indexing and slicing are answered by
//! narrowing the query, so they never fetch documents outside the requested
//! window.
//!
//! Cursors are forward-only: once exhausted they stay exhausted.

use std::{
    fmt,
    ops::{Bound, RangeBounds},
};

use futures::{Stream, stream};

use crate::{
    backend::RawCursor,
    collection::CollectionProxy,
    error::{KaleError, KaleResult},
    model::{Instance, Model},
    query::Query,
};

pub struct CursorProxy<T: Model> {
    collection: CollectionProxy<T>,
    query: Query,
    raw: Option<Box<dyn RawCursor>>,
    started: bool,
    exhausted: bool,
}

impl<T: Model> CursorProxy<T> {
    pub(crate) fn new(collection: CollectionProxy<T>, query: Query) -> Self {
        // A zero-length window is answered without asking the store; some
        // backends read a limit of zero as "no limit".
        let exhausted = query.limit == Some(0);

        Self {
            collection,
            query,
            raw: None,
            started: false,
            exhausted,
        }
    }

    /// The query this cursor will run (or is running).
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn collection(&self) -> &CollectionProxy<T> {
        &self.collection
    }

    /// Whether the cursor has been advanced at least once.
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Advances the cursor, returning the next hydrated instance.
    pub async fn next(&mut self) -> KaleResult<Option<Instance<T>>> {
        self.started = true;
        if self.exhausted {
            return Ok(None);
        }

        if self.raw.is_none() {
            let opened = self
                .collection
                .raw()
                .find(self.query.clone())
                .await?;
            self.raw = Some(opened);
        }
        let Some(raw) = self.raw.as_mut() else {
            return Ok(None);
        };

        match raw.next_document().await? {
            Some(document) => self.collection.hydrate(document).map(Some),
            None => {
                self.exhausted = true;
                self.raw = None;
                Ok(None)
            }
        }
    }

    /// Hydrates the document at position `index` of this cursor's result.
    ///
    /// Runs a one-document query; the cursor itself is not advanced.
    pub async fn get(&self, index: usize) -> KaleResult<Option<Instance<T>>> {
        let window = self
            .query
            .window(index, index.checked_add(1));
        if window.limit == Some(0) {
            return Ok(None);
        }

        self.collection.find_one(window).await
    }

    /// Returns a cursor over positions `range` of this cursor's result.
    ///
    /// Nothing is fetched.
    ///
    /// # Errors
    ///
    /// [`KaleError::InvalidOperation`] if this cursor has already been advanced.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> KaleResult<CursorProxy<T>> {
        if self.started {
            return Err(KaleError::InvalidOperation(
                "cannot slice a cursor that has already been advanced".to_string(),
            ));
        }

        let start = match range.start_bound() {
            Bound::Included(start) => *start,
            Bound::Excluded(start) => start.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(end) => end.checked_add(1),
            Bound::Excluded(end) => Some(*end),
            Bound::Unbounded => None,
        };

        Ok(CursorProxy::new(
            self.collection.clone(),
            self.query.window(start, end),
        ))
    }

    /// Drains the remaining results.
    pub async fn try_collect(mut self) -> KaleResult<Vec<Instance<T>>> {
        let mut instances = Vec::new();
        while let Some(instance) = self.next().await? {
            instances.push(instance);
        }

        Ok(instances)
    }

    /// Adapts the cursor into a [`Stream`] of hydrated instances.
    pub fn into_stream(self) -> impl Stream<Item = KaleResult<Instance<T>>> {
        stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor
                .next()
                .await?
                .map(|instance| (instance, cursor)))
        })
    }
}

impl<T: Model> fmt::Debug for CursorProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorProxy")
            .field("collection", &self.collection.name())
            .field("query", &self.query)
            .field("started", &self.started)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
