//! Shell scripts standing in for the tun2socks binary

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub(crate) struct FakeBinary {
    dir: PathBuf,
    path: PathBuf,
}

impl FakeBinary {
    /// Write an executable script. `$DIR` in `body` expands to the scratch
    /// directory holding it, for files the script leaves behind.
    pub(crate) fn new(body: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("outline-tun2socks-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tun2socks");
        let script = format!("#!/bin/sh\nDIR='{}'\n{}\n", dir.display(), body);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.join(name)).unwrap_or_default()
    }

    /// Lines in a file the script appends to
    pub(crate) fn count_lines(&self, name: &str) -> usize {
        self.read(name).lines().count()
    }
}

impl Drop for FakeBinary {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
