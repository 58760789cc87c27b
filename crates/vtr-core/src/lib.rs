//! Shared types and error kinds for the test-runner workspace.

pub mod error;
pub mod types;

pub use error::RunnerError;
pub use types::{Code, Flavour, Options, TestId, UiMode};
