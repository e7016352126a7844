pub mod classify;
pub mod cleanup;
pub mod connectivity;
pub mod consolidation;
pub mod context;
pub mod graph;
pub mod mapping;
pub mod propagate;
pub mod types;
pub mod value;
