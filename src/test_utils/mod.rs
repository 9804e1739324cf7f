//! Test doubles for exercising the engine without a database server.

pub mod mock;
pub mod test_helpers;

pub use mock::MockDriver;
pub use test_helpers::*;
