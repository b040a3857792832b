//! kbsearch - Hybrid retrieval for knowledge-base-backed assistants
//!
//! Given a query embedding and the raw query text, kbsearch returns the most
//! relevant document chunks or code examples from a continuously growing
//! corpus by fusing dense vector similarity with lexical ranking. It also
//! provides batched per-source counts for listing views.

pub mod cli;
pub mod config;
pub mod corpus;
pub mod error;
pub mod index;
pub mod retrieval;
pub mod storage;

pub use error::{KbError, Result};
