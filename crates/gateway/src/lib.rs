//! Gateway library surface — HTTP API, CLI REPL, and bootstrap wiring.
//! The `osa` binary is a thin argument-parsing shell over this.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
