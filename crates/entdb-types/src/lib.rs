#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **entdb-types** – Shared primitive data structures for EntDB.
//!
//! The crate is dependency-light and sits at the bottom of the crate graph
//! so that every other EntDB crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about I/O, the WAL backend, or the
//! concrete store engine: those live in `entdb-wal-core`, `entdb-schema` and
//! `entdb-store` respectively.

pub mod config;
pub mod error;
pub mod event;
pub mod event_position;
pub mod ids;
pub mod operation;
pub mod receipt;
pub mod schema;
pub mod value;

pub use config::Config;
pub use error::{EntError, ErrorCode, FieldError};
pub use event::{Event, EnvelopeVersion, CURRENT_ENVELOPE_VERSION};
pub use event_position::{Checkpoint, Position};
pub use ids::{EdgeTypeId, FieldId, NodeId, TenantId, TypeId};
pub use operation::{AliasRef, NodeRef, Operation, TxRequest};
pub use receipt::{Conflict, Receipt};
pub use schema::{EdgeType, FieldDef, FieldKind, NodeType, Schema};
pub use value::Value;
