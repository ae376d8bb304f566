//! Schema metadata: catalog loading, relevance condensation and alias lookup.

pub mod catalog;
pub mod condenser;
pub mod synonyms;

pub use catalog::{derive_pk_fk, CatalogReader, Column, ForeignKeyHint, KeyHints, Table};
pub use condenser::{build_condensed_context, CondensedContext};
pub use synonyms::{default_synonyms, resolve_synonyms, surface_relevant_columns};
