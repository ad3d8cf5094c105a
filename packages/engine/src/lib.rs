//! `fsexec`: a content-addressed filesystem execution and cache engine.
//!
//! Callers register a set of named `kind`s with the [`executor::Registry`],
//! then ask an [`engine::Engine`] to `execute` a `(kind, input)` pair. The
//! engine fingerprints the request, reuses a published artifact on a cache
//! hit, and otherwise runs the registered function in an isolated scratch
//! workspace before atomically publishing its output.

pub mod engine;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod fs;
pub mod graph;
pub mod layout;
pub mod linker;
pub mod manifest;
pub mod path;
pub mod publish;
