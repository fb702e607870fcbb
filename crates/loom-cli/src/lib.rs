//! A thin, network-free CLI over `loom_pipeline::Pipeline` (SPEC_FULL.md
//! §"CLI"): wires the in-memory reference repositories and a
//! deterministic mock provider together and drives `ProcessTurn` from
//! stdin for manual exploration. Modeled on `sa-gateway`'s `Cli`/
//! `Command` pattern, minus the server — there is no network listener.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod seed;

pub use cli::{dispatch, Cli, Command};
