//! Repository traits for queue operations.

pub mod blocks;
pub mod tasks;

pub use blocks::BlockRepo;
pub use tasks::{ClaimFilter, TaskRepo};
