//! Library exports for the winsession engine.
//!
//! Exposes the session data model and store, the save/match/restore engine and
//! the windowing boundary so that other front ends can drive the same engine
//! as the `winsession` binary.

pub mod config;
pub mod engine;
pub mod process;
pub mod session;
pub mod windowing;

pub use config::Config;
