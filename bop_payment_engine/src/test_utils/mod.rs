//! Helpers for tests: throw-away databases, a scripted set of payment processors, and shop fixtures.
pub mod fixtures;
pub mod prepare_env;
pub mod scripted_processors;
