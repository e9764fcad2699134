//! Generation seam for the Parley batch engine.
//!
//! The language-model client itself lives outside this workspace. This crate
//! defines the `Generator` trait it must implement, the `DynGenerator`
//! wrapper the executor holds, the request/response types, and helpers for
//! pulling structured data out of a model reply.

mod generator;
mod scripted;
mod structured;
mod types;

pub use generator::*;
pub use scripted::ScriptedGenerator;
pub use structured::extract_structured;
pub use tokio_util::sync::CancellationToken;
pub use types::*;
