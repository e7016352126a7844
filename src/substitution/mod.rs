//! Builders for what replaces a consolidated batch: the substitution template,
//! the abstract node standing for it, and unified nested definitions.

pub mod abstract_node;
pub mod generator;
pub mod nested;
