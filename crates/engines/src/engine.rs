//! The engine contract consumed by the facade.
//!
//! Every engine speaks the same lifecycle and CRUD surface; the payload and
//! result types are [`Value`] so a dispatcher can route to any engine
//! without knowing its data model. Engines keep richer inherent methods
//! (`add_edge`, `add_point`, typed queries) alongside the trait.

use polystore_core::{Error, Result, Value};

/// Public engine contract: lifecycle plus scoped CRUD and query.
///
/// `scope` is the engine's logical namespace: a collection, table, graph,
/// or series name. Engines that cannot answer a query shape signal
/// [`Error::QueryUnsupported`].
pub trait StorageEngine: Send + Sync {
    /// Load the latest snapshot, replay the WAL on top, rebuild indexes,
    /// and rotate the WAL.
    fn startup(&self) -> Result<()>;

    /// Take a snapshot named `latest` and close the WAL.
    fn shutdown(&self) -> Result<()>;

    /// Equivalent to `startup` on an already-constructed engine.
    fn recover(&self) -> Result<()> {
        self.startup()
    }

    /// Insert or overwrite one entry.
    fn put(&self, scope: &str, key: &str, payload: Value) -> Result<()>;

    /// Read one entry. Absence is `None`, not an error.
    fn get(&self, scope: &str, key: &str) -> Result<Option<Value>>;

    /// Remove one entry. Returns whether anything was removed.
    fn delete(&self, scope: &str, key: &str) -> Result<bool>;

    /// Evaluate a query shape. Engines without a query model signal
    /// [`Error::QueryUnsupported`].
    fn query(&self, scope: &str, shape: &Value) -> Result<Vec<Value>>;
}

/// Reject empty or oversized namespace and key strings.
pub(crate) fn check_name(what: &str, name: &str, max_len: usize) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{} must be a non-empty string",
            what
        )));
    }
    if name.len() > max_len {
        return Err(Error::InvalidArgument(format!(
            "{} exceeds {} characters",
            what, max_len
        )));
    }
    Ok(())
}

/// Decode a `Bytes` payload that must contain a JSON object.
///
/// Used by the graph and time-series trait impls, whose `put` payloads are
/// encoded attribute maps.
pub(crate) fn decode_object_payload(what: &str, payload: &Value) -> Result<polystore_core::Object> {
    let bytes = payload.as_bytes().ok_or_else(|| {
        Error::InvalidArgument(format!(
            "{} payload must be bytes, got {}",
            what,
            payload.type_name()
        ))
    })?;
    let decoded: Value = serde_json::from_slice(bytes)
        .map_err(|_| Error::InvalidArgument(format!("{} payload must be valid JSON", what)))?;
    decoded
        .into_object()
        .map_err(|actual| Error::InvalidArgument(format!("{} payload must be a JSON object, got {}", what, actual)))
}
