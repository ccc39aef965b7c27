//! SSH backend seam
//!
//! The session worker drives an [`SshBackend`] over an already-connected
//! [`Transport`]. No wire implementation is bundled; a front-end installs
//! one through an [`SshConnector`]. Host keys are checked against a
//! [`HostKeyStore`], normally the file-backed [`KnownHosts`].

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::transport::{Transport, TransportError};

/// SSH errors
#[derive(Debug, Error)]
pub enum SshError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("authentication failed")]
    Auth,
    #[error("{0}")]
    Channel(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("known hosts: {0}")]
    KnownHosts(#[from] io::Error),
    #[error("SSH support is not available in this build.")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, SshError>;

/// How to authenticate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SshAuth {
    Password(String),
    PublicKey {
        private_key: PathBuf,
        public_key: Option<PathBuf>,
        passphrase: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshCredentials {
    pub username: String,
    pub auth: SshAuth,
}

/// Server host key as presented during the handshake
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostKey {
    pub algorithm: String,
    /// SHA-256 fingerprint
    pub fingerprint: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostKeyVerdict {
    Known,
    Unknown,
    Mismatch,
}

/// Storage of trusted host keys
pub trait HostKeyStore: Send {
    fn check(&self, host: &str, key: &HostKey) -> HostKeyVerdict;
    fn add(&mut self, host: &str, key: &HostKey) -> Result<()>;
}

/// Known hosts file, one `host algorithm fingerprint` entry per line
#[derive(Debug, Default)]
pub struct KnownHosts {
    path: Option<PathBuf>,
    entries: Vec<(String, HostKey)>,
}

impl KnownHosts {
    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`; a missing file is an empty store
    pub fn load(path: &Path) -> Result<Self> {
        let mut hosts = Self {
            path: Some(path.to_path_buf()),
            entries: Vec::new(),
        };
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(hosts),
            Err(e) => return Err(e.into()),
        };

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(host), Some(algorithm), Some(fingerprint)) => hosts.entries.push((
                    host.to_string(),
                    HostKey {
                        algorithm: algorithm.to_string(),
                        fingerprint: fingerprint.to_string(),
                    },
                )),
                _ => warn!("{}:{}: malformed known hosts entry", path.display(), lineno + 1),
            }
        }
        debug!("loaded {} known host keys", hosts.entries.len());
        Ok(hosts)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HostKeyStore for KnownHosts {
    fn check(&self, host: &str, key: &HostKey) -> HostKeyVerdict {
        let mut found_host = false;
        for (h, k) in &self.entries {
            if h != host {
                continue;
            }
            if k == key {
                return HostKeyVerdict::Known;
            }
            found_host = true;
        }
        if found_host {
            HostKeyVerdict::Mismatch
        } else {
            HostKeyVerdict::Unknown
        }
    }

    fn add(&mut self, host: &str, key: &HostKey) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{} {} {}", host, key.algorithm, key.fingerprint)?;
        }
        self.entries.push((host.to_string(), key.clone()));
        Ok(())
    }
}

/// Outcome of a channel read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelRead {
    Data(usize),
    NoData,
    Eof,
}

/// One SSH connection's protocol engine
pub trait SshBackend: Send {
    /// Key exchange; returns the server host key
    fn handshake(&mut self, transport: &mut dyn Transport) -> Result<HostKey>;
    fn authenticate(
        &mut self,
        transport: &mut dyn Transport,
        credentials: &SshCredentials,
    ) -> Result<()>;
    /// Open a session channel with a PTY and start a shell
    fn open_shell(
        &mut self,
        transport: &mut dyn Transport,
        term: &str,
        cols: u16,
        rows: u16,
    ) -> Result<()>;
    fn read(&mut self, transport: &mut dyn Transport, buf: &mut [u8]) -> Result<ChannelRead>;
    fn write(&mut self, transport: &mut dyn Transport, bytes: &[u8]) -> Result<usize>;
    fn resize(&mut self, transport: &mut dyn Transport, cols: u16, rows: u16) -> Result<()>;
    fn disconnect(&mut self, transport: &mut dyn Transport);
}

/// Factory for SSH backends, one per connection
pub type SshConnector = Arc<dyn Fn() -> Box<dyn SshBackend> + Send + Sync>;

/// Parse `[user@]host[:port]`
pub fn parse_target(spec: &str, default_port: u16) -> Option<(Option<String>, String, u16)> {
    let (user, rest) = match spec.split_once('@') {
        Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
        Some((_, rest)) => (None, rest),
        None => (None, spec),
    };
    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (rest, default_port),
    };
    if host.is_empty() {
        return None;
    }
    Some((user, host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_path(name: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("seventty-{}-{}-{}", std::process::id(), n, name))
    }

    fn key(fp: &str) -> HostKey {
        HostKey {
            algorithm: "ssh-ed25519".into(),
            fingerprint: fp.into(),
        }
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("alice@example.com:2222", 22),
            Some((Some("alice".into()), "example.com".into(), 2222))
        );
        assert_eq!(parse_target("example.com", 22), Some((None, "example.com".into(), 22)));
        assert_eq!(parse_target("host:notaport", 22), None);
        assert_eq!(parse_target("bob@", 22), None);
    }

    #[test]
    fn test_verdicts() {
        let mut hosts = KnownHosts::in_memory();
        assert_eq!(hosts.check("a", &key("AAA")), HostKeyVerdict::Unknown);
        hosts.add("a", &key("AAA")).unwrap();
        assert_eq!(hosts.check("a", &key("AAA")), HostKeyVerdict::Known);
        assert_eq!(hosts.check("a", &key("BBB")), HostKeyVerdict::Mismatch);
        assert_eq!(hosts.check("b", &key("AAA")), HostKeyVerdict::Unknown);
    }

    #[test]
    fn test_known_hosts_file_round_trip() {
        let path = temp_path("known_hosts");
        let mut hosts = KnownHosts::load(&path).unwrap();
        assert!(hosts.is_empty());
        hosts.add("example.com", &key("SHA256:abc")).unwrap();

        let reloaded = KnownHosts::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.check("example.com", &key("SHA256:abc")),
            HostKeyVerdict::Known
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let path = temp_path("known_hosts_bad");
        fs::write(&path, "# comment\n\nonly-two fields\nh ssh-rsa SHA256:x\n").unwrap();
        let hosts = KnownHosts::load(&path).unwrap();
        assert_eq!(hosts.len(), 1);
        let _ = fs::remove_file(&path);
    }
}
