//! Per-profile browser cookie persistence.
//!
//! Cookies are stored as a JSON array in `<session_dir>/<profile>_cookies.json`
//! so a later run can skip the login form while the portal session is alive.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::browser::Cookie;
use crate::error::Result;
use crate::persist;

const COOKIE_FILE_SUFFIX: &str = "_cookies.json";

/// Cookie store rooted at a session directory.
#[derive(Debug, Clone)]
pub struct CookieJar {
    dir: PathBuf,
}

impl CookieJar {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Cookie file for `profile`.
    #[must_use]
    pub fn path_for(&self, profile: &str) -> PathBuf {
        self.dir.join(format!("{profile}{COOKIE_FILE_SUFFIX}"))
    }

    /// Stored cookies for `profile`, if any.
    ///
    /// A corrupted file is deleted and treated as absent.
    pub fn load(&self, profile: &str) -> Result<Option<Vec<Cookie>>> {
        let path = self.path_for(profile);
        match persist::read_json::<Vec<Cookie>>(&path) {
            Ok(Some(cookies)) if cookies.is_empty() => Ok(None),
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(
                    "Corrupted cookie file at {}: {}. Deleting and starting fresh.",
                    path.display(),
                    e
                );
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Could not delete {}: {}", path.display(), e);
                }
                Ok(None)
            }
        }
    }

    pub fn save(&self, profile: &str, cookies: &[Cookie]) -> Result<()> {
        persist::write_json_atomic(&self.path_for(profile), cookies)?;
        info!(profile, count = cookies.len(), "Session cookies saved");
        Ok(())
    }

    /// Remove the stored session for `profile`.
    pub fn delete(&self, profile: &str) -> Result<()> {
        let path = self.path_for(profile);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn exists(&self, profile: &str) -> bool {
        self.path_for(profile).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn jar() -> (CookieJar, TempDir) {
        let dir = TempDir::new().unwrap();
        (CookieJar::new(dir.path().join("sessions")), dir)
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (jar, _dir) = jar();
        let cookies = vec![Cookie::new("sid", "abc"), Cookie::new("csrf", "xyz")];

        jar.save("default", &cookies).unwrap();
        assert!(jar.exists("default"));
        assert_eq!(jar.load("default").unwrap(), Some(cookies));
    }

    #[test]
    fn test_profiles_are_separate_files() {
        let (jar, _dir) = jar();
        jar.save("alice", &[Cookie::new("sid", "1")]).unwrap();

        assert!(jar.path_for("alice").ends_with("alice_cookies.json"));
        assert!(jar.load("bob").unwrap().is_none());
    }

    #[test]
    fn test_corrupted_file_is_discarded() {
        let (jar, _dir) = jar();
        std::fs::create_dir_all(jar.path_for("x").parent().unwrap()).unwrap();
        std::fs::write(jar.path_for("x"), "not json").unwrap();

        assert!(jar.load("x").unwrap().is_none());
        assert!(!jar.exists("x"));
    }

    #[test]
    fn test_delete() {
        let (jar, _dir) = jar();
        jar.save("p", &[Cookie::new("a", "b")]).unwrap();
        jar.delete("p").unwrap();
        assert!(!jar.exists("p"));
        jar.delete("p").unwrap();
    }
}
