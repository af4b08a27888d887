// File: src/core/mod.rs
pub mod aligner;
pub mod engine;
pub mod scorer;
pub mod types;
