//! Path allow/deny policy, applied at every file-read boundary and during
//! resource listing.

use std::path::{Path, PathBuf};

use crate::error::{CtxError, Result};

/// Maximum file size admitted by the policy (50 MiB).
pub const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Reserved secret extensions that are never read or listed.
const SECRET_SUFFIXES: &[&str] = &[".env", ".key", ".pem"];

/// Why a path was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deny {
    SecretExtension,
    TooLarge,
    OutsideRoots,
    Missing,
}

pub struct Policy {
    roots: Vec<PathBuf>,
}

impl Policy {
    /// Build a policy over the given allowed roots. Roots that cannot be
    /// canonicalized are kept as-is (they simply never match).
    pub fn new(roots: &[PathBuf]) -> Self {
        let roots = roots
            .iter()
            .map(|r| r.canonicalize().unwrap_or_else(|_| r.clone()))
            .collect();
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Check a path against the policy. `Ok(canonical)` when allowed.
    pub fn check(&self, path: &Path) -> std::result::Result<PathBuf, Deny> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if SECRET_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            return Err(Deny::SecretExtension);
        }

        let canonical = match path.canonicalize() {
            Ok(c) => c,
            Err(_) => return Err(Deny::Missing),
        };
        if !self.roots.iter().any(|r| canonical.starts_with(r)) {
            return Err(Deny::OutsideRoots);
        }

        match std::fs::metadata(&canonical) {
            Ok(m) if m.len() > MAX_FILE_BYTES => Err(Deny::TooLarge),
            Ok(_) => Ok(canonical),
            Err(_) => Err(Deny::Missing),
        }
    }

    /// True when the path passes the policy. Missing files count as denied
    /// (used at directory-listing time).
    pub fn allows(&self, path: &Path) -> bool {
        self.check(path).is_ok()
    }

    /// Read a file through the policy, mapping denials onto the error
    /// taxonomy (missing files are "not found" at read time).
    pub fn read(&self, path: &Path) -> Result<String> {
        match self.check(path) {
            Ok(canonical) => Ok(std::fs::read_to_string(&canonical)?),
            Err(Deny::OutsideRoots) => Err(CtxError::RootViolation(path.to_path_buf())),
            Err(Deny::Missing) => Err(CtxError::NotFound(path.display().to_string())),
            Err(_) => Err(CtxError::PolicyDenied(path.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn denies_secret_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in [".env", "server.key", "ca.pem", "prod.env"] {
            let p = dir.path().join(name);
            fs::write(&p, "secret").unwrap();
            let policy = Policy::new(&[dir.path().to_path_buf()]);
            assert_eq!(policy.check(&p), Err(Deny::SecretExtension), "{name}");
        }
    }

    #[test]
    fn denies_paths_outside_roots() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let p = other.path().join("a.ts");
        fs::write(&p, "x").unwrap();
        let policy = Policy::new(&[dir.path().to_path_buf()]);
        assert_eq!(policy.check(&p), Err(Deny::OutsideRoots));
        assert!(matches!(policy.read(&p), Err(CtxError::RootViolation(_))));
    }

    #[test]
    fn missing_is_deny_at_list_time_not_found_at_read_time() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::new(&[dir.path().to_path_buf()]);
        let p = dir.path().join("gone.ts");
        assert!(!policy.allows(&p));
        assert!(matches!(policy.read(&p), Err(CtxError::NotFound(_))));
    }

    #[test]
    fn allows_ordinary_source_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.ts");
        fs::write(&p, "export function a() {}").unwrap();
        let policy = Policy::new(&[dir.path().to_path_buf()]);
        assert!(policy.allows(&p));
        assert!(policy.read(&p).unwrap().contains("function a"));
    }
}
