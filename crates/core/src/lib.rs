//! Domain types and pure logic for the wikigraph knowledge base.
//!
//! This crate has no internal dependencies so it can be shared by the store,
//! engine and worker crates alike.

pub mod article;
pub mod diff;
pub mod directory;
pub mod error;
pub mod extract;
pub mod schema;
pub mod slug;
pub mod tag;
pub mod tag_type;
pub mod types;
