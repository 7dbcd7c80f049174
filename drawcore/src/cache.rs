// Copyright (c) 2026 The drawcore developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use foldhash::HashMap;
use parking_lot::RwLock;
use std::{borrow::Borrow, hash::Hash};

/// A map whose entries are written once and never mutated afterwards.
///
/// Readers never block each other, except when an entry is vacant. Two threads racing on the
/// same vacant key may both run their producer, but only the first published value is kept and
/// both callers observe it.
#[derive(Debug)]
pub(crate) struct OnceCache<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for OnceCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> OnceCache<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::default()),
        }
    }

    /// Returns the number of published entries.
    pub(crate) fn len(&self) -> usize {
        self.inner.read().len()
    }
}

impl<K, V> OnceCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// Returns the value for the specified `key`, if it exists.
    pub(crate) fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.read().get(key).cloned()
    }

    /// Returns the value for the specified `key`. The entry gets written to with the key-value
    /// pair returned by `f` if it doesn't exist. If `f` returns [`Err`], the error is
    /// propagated and the entry isn't written to.
    pub(crate) fn get_or_try_insert<Q, E>(
        &self,
        key: &Q,
        f: impl FnOnce() -> Result<(K, V), E>,
    ) -> Result<V, E>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let (key, value) = f()?;

        // Another thread may have published in the meantime; its value wins.
        Ok(self
            .inner
            .write()
            .entry(key)
            .or_insert_with(|| value)
            .clone())
    }
}
