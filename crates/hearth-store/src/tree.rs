//! A typed view over a single sled tree.

use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

use crate::error::{Error, Result};

/// A sled tree that stores JSON-encoded rows of type `T`, keyed by byte key.
///
/// This is the store's only encoding boundary: everywhere else in the
/// workspace talks in terms of `hearth_proto` types, never raw bytes.
#[derive(Clone)]
pub struct Tree<T> {
    inner: sled::Tree,
    _marker: PhantomData<T>,
}

impl<T> Tree<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(inner: sled::Tree) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Access the raw sled tree, for transaction composition.
    pub fn raw(&self) -> &sled::Tree {
        &self.inner
    }

    /// Insert or overwrite a row under `key`.
    pub fn put(&self, key: impl AsRef<[u8]>, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.inner.insert(key.as_ref(), bytes)?;
        Ok(())
    }

    /// Fetch a row by key.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.inner.get(key.as_ref())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a row by key, returning it if it existed.
    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<Option<T>> {
        match self.inner.remove(key.as_ref())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Iterate every row in the tree.
    pub fn scan(&self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for item in self.inner.iter() {
            let (_, bytes) = item?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Iterate every (key, row) pair in the tree.
    pub fn scan_with_keys(&self) -> Result<Vec<(Vec<u8>, T)>> {
        let mut out = Vec::new();
        for item in self.inner.iter() {
            let (key, bytes) = item?;
            out.push((key.to_vec(), serde_json::from_slice(&bytes)?));
        }
        Ok(out)
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the tree holds no rows.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Fetch a row, erroring with [`Error::NotFound`] if it is absent.
    pub fn require(&self, key: impl AsRef<[u8]> + std::fmt::Display) -> Result<T> {
        let key_display = key.to_string();
        self.get(key)?
            .ok_or_else(|| Error::NotFound(key_display))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        value: String,
    }

    fn tree() -> Tree<Row> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Tree::new(db.open_tree("t").unwrap())
    }

    #[test]
    fn put_get_remove_roundtrip() {
        let t = tree();
        let row = Row { value: "x".into() };
        t.put("k", &row).unwrap();
        assert_eq!(t.get("k").unwrap(), Some(row));
        assert_eq!(t.len(), 1);
        let removed = t.remove("k").unwrap();
        assert!(removed.is_some());
        assert!(t.is_empty());
    }

    #[test]
    fn require_errors_when_missing() {
        let t = tree();
        let err = t.require("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
