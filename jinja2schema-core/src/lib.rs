//! Infers the structural shape of the context a template expects from
//! its source, without rendering it.

pub mod api;
pub mod config;
pub mod error;
mod expr;
pub mod merge;
pub mod registry;
pub mod schema;
pub mod scope;
mod stmt;
pub mod types;
pub mod visitor;

pub use api::{infer, infer_with};
pub use config::{Config, IndexedVariableType, TupleSchema};
pub use error::{InferError, Result};
pub use merge::{merge, MergeError, MergeMode};
pub use schema::{to_schema, to_schema_string};
pub use scope::Scope;
pub use types::{Meta, ScalarLiteral, Structural};
pub use visitor::{MacroDescriptor, NullLoader, TemplateLoader, Visitor};
