//! Tool trait and registry for Parley.
//!
//! Step hooks can name a tool instead of carrying a callable. The engine
//! resolves those names against a [`ToolRegistry`] at invocation time.

mod tool;

pub use tool::*;
