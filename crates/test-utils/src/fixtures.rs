//! Filesystem fixtures.

use std::fs;
use std::path::{Path, PathBuf};

/// Native grid shapes of the supported providers.
pub mod grid {
    /// GFS 0.25 degree global grid.
    pub const GFS_0P25: (usize, usize) = (1440, 721);
    /// ECMWF open data 0.25 degree global grid.
    pub const ECMWF_0P25: (usize, usize) = (1440, 721);
}

/// Create `root/{name}/{z}/{x}/{y}.png` with placeholder content and return
/// the subdirectory.
pub fn make_tile_subtree(root: &Path, name: &str) -> PathBuf {
    let dir = root.join(name);
    let leaf = dir.join("0").join("0");
    fs::create_dir_all(&leaf).expect("create tile subtree");
    fs::write(leaf.join("0.png"), b"png").expect("write tile");
    dir
}
