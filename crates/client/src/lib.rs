//! Embedding entry point for the fxq SQL compiler.
//!
//! [`Engine`] owns the entity metadata, the compiler configuration and an
//! optimizer registry; the `fxq` binary wraps it in a small CLI and REPL.

pub mod engine;
pub mod repl;

pub use engine::Engine;
