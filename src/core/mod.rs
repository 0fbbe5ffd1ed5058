// src/core/mod.rs — Generate-build-refine engine

pub mod generator;
pub mod orchestrator;
pub mod program;
pub mod prompt;
pub mod qa;
pub mod toolchain;
pub mod truncation;
pub mod types;
pub mod verifier;
pub mod workspace;
