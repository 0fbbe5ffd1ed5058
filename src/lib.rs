// src/lib.rs — Library root for codeloop

pub mod cli;
pub mod core;
pub mod infra;
pub mod provider;
