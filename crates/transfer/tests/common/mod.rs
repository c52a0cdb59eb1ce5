pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{Harness, USER, drain};
#[allow(unused_imports)]
pub use mocks::{MemoryServer, SigningCounter, StaticKeys};
