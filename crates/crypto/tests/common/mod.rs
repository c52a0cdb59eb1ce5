pub mod mocks;

#[allow(unused_imports)]
pub use mocks::{CountingProvider, FailingProvider};

use std::path::{Path, PathBuf};

/// Write `data` to `dir/name` and return the path.
#[allow(dead_code)]
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}
