//! Core types for Polystore.
//!
//! This crate defines the shared vocabulary of the workspace: the dynamic
//! [`Value`] model, the [`Filter`] grammar used by the structured engines,
//! the canonical [`Error`] type, and the [`EngineKind`] identity enum.

pub mod error;
pub mod filter;
pub mod kind;
pub mod value;

pub use error::{Error, Result};
pub use filter::{CmpOp, Filter, Predicate};
pub use kind::EngineKind;
pub use value::{object, Object, Value};
