//! Host key store for the trust-on-first-use and strict policies.
//!
//! Stored at `~/.arc/known_hosts` by default. One `host fingerprint` pair per
//! line, where `host` is the bare name for port 22 and `[name]:port` otherwise.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::Mutex;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Result of looking a host up in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostStatus {
    /// The host is known and the fingerprint matches.
    Known,
    /// The host has never been seen before.
    Unknown,
    /// The host is known but the fingerprint has changed.
    Changed {
        /// The previously stored fingerprint.
        expected: String,
    },
}

/// `SHA256:<base64>` fingerprint of a server key, in OpenSSH notation.
pub fn fingerprint(key: &PublicKey) -> String {
    let digest = Sha256::digest(key.public_key_bytes());
    let encoded = BASE64.encode(digest);
    format!("SHA256:{}", encoded.trim_end_matches('='))
}

/// Known hosts file.
///
/// Sessions connect concurrently, so read-modify-write cycles are serialized.
pub struct KnownHosts {
    path: PathBuf,
    lock: Mutex<()>,
}

impl KnownHosts {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store key for a host/port pair.
    pub fn host_id(host: &str, port: u16) -> String {
        if port == arc_core::DEFAULT_SSH_PORT {
            host.to_string()
        } else {
            format!("[{host}]:{port}")
        }
    }

    /// Look up a host's fingerprint.
    pub fn verify(&self, host: &str, port: u16, fingerprint: &str) -> io::Result<HostStatus> {
        let _guard = self.lock.lock();
        let id = Self::host_id(host, port);

        for (stored_host, stored_fp) in self.load_entries()? {
            if stored_host == id {
                if stored_fp == fingerprint {
                    return Ok(HostStatus::Known);
                }
                return Ok(HostStatus::Changed {
                    expected: stored_fp,
                });
            }
        }

        Ok(HostStatus::Unknown)
    }

    /// Add or replace a host's fingerprint.
    pub fn add(&self, host: &str, port: u16, fingerprint: &str) -> io::Result<()> {
        let _guard = self.lock.lock();
        let id = Self::host_id(host, port);
        let mut entries = self.load_entries()?;

        entries.retain(|(h, _)| *h != id);
        entries.push((id, fingerprint.to_string()));

        self.save_entries(&entries)
    }

    /// Remove a host entry. Returns whether one existed.
    pub fn remove(&self, host: &str, port: u16) -> io::Result<bool> {
        let _guard = self.lock.lock();
        let id = Self::host_id(host, port);
        let mut entries = self.load_entries()?;
        let len_before = entries.len();
        entries.retain(|(h, _)| *h != id);
        let removed = entries.len() < len_before;

        if removed {
            self.save_entries(&entries)?;
        }

        Ok(removed)
    }

    pub fn list(&self) -> io::Result<Vec<(String, String)>> {
        let _guard = self.lock.lock();
        self.load_entries()
    }

    fn load_entries(&self) -> io::Result<Vec<(String, String)>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let entries = content
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    return None;
                }
                let (host, fp) = line.split_once(' ')?;
                let fp = fp.trim();
                if fp.is_empty() {
                    return None;
                }
                Some((host.to_string(), fp.to_string()))
            })
            .collect();

        Ok(entries)
    }

    fn save_entries(&self, entries: &[(String, String)]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
                }
            }
        }

        let mut content = String::new();
        for (host, fp) in entries {
            content.push_str(host);
            content.push(' ');
            content.push_str(fp);
            content.push('\n');
        }
        fs::write(&self.path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, KnownHosts) {
        let dir = tempfile::tempdir().unwrap();
        let store = KnownHosts::new(dir.path().join("arc").join("known_hosts"));
        (dir, store)
    }

    #[test]
    fn unknown_host() {
        let (_dir, kh) = temp_store();
        assert_eq!(
            kh.verify("arc.local", 22, "SHA256:abc").unwrap(),
            HostStatus::Unknown
        );
    }

    #[test]
    fn add_and_verify_known() {
        let (_dir, kh) = temp_store();
        kh.add("arc.local", 22, "SHA256:abc").unwrap();
        assert_eq!(
            kh.verify("arc.local", 22, "SHA256:abc").unwrap(),
            HostStatus::Known
        );
    }

    #[test]
    fn detect_changed_fingerprint() {
        let (_dir, kh) = temp_store();
        kh.add("arc.local", 22, "SHA256:abc").unwrap();
        assert_eq!(
            kh.verify("arc.local", 22, "SHA256:def").unwrap(),
            HostStatus::Changed {
                expected: "SHA256:abc".to_string()
            }
        );
    }

    #[test]
    fn ports_are_distinct_hosts() {
        let (_dir, kh) = temp_store();
        kh.add("arc.local", 2222, "SHA256:abc").unwrap();
        assert_eq!(
            kh.verify("arc.local", 22, "SHA256:abc").unwrap(),
            HostStatus::Unknown
        );
        let list = kh.list().unwrap();
        assert_eq!(list, vec![("[arc.local]:2222".to_string(), "SHA256:abc".to_string())]);
    }

    #[test]
    fn update_and_remove() {
        let (_dir, kh) = temp_store();
        kh.add("arc.local", 22, "SHA256:abc").unwrap();
        kh.add("arc.local", 22, "SHA256:def").unwrap();
        assert_eq!(kh.list().unwrap().len(), 1);
        assert_eq!(
            kh.verify("arc.local", 22, "SHA256:def").unwrap(),
            HostStatus::Known
        );
        assert!(kh.remove("arc.local", 22).unwrap());
        assert!(!kh.remove("arc.local", 22).unwrap());
        assert_eq!(
            kh.verify("arc.local", 22, "SHA256:def").unwrap(),
            HostStatus::Unknown
        );
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let (_dir, kh) = temp_store();
        fs::create_dir_all(kh.path().parent().unwrap()).unwrap();
        fs::write(kh.path(), "# managed by arc-connect\n\npi.local SHA256:xyz\nbroken\n").unwrap();
        assert_eq!(kh.list().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, kh) = temp_store();
        kh.add("arc.local", 22, "SHA256:abc").unwrap();
        let mode = fs::metadata(kh.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn fingerprint_matches_openssh() {
        let key = PublicKey::from_openssh(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGcQdCUhfwN9VPuVq+VEnISnr6gVtUqi/dzCQ5nfMTX1",
        )
        .unwrap();
        assert_eq!(
            fingerprint(&key),
            "SHA256:Bj8TYqDcruFf8h6K+R8GIo2CuYucaqhfjmRr17tFsUI"
        );
    }
}
