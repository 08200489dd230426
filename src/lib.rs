//! Administrative command surface for the access control engine.
//!
//! Exposes the CLI modules for integration testing.

pub mod cli;
