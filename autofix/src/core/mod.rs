//! Deterministic, pure logic shared by the repair engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values (model text, edit records, budgets) and return deterministic outputs
//! suitable for tests.

pub mod budget;
pub mod error;
pub mod escalation;
pub mod path;
pub mod preview;
pub mod sanitize;
pub mod text;
pub mod types;
