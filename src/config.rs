//! Configuration and theme loading for seventty.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.seventty/config.toml`
//! - Built-in palettes (`dark`, `light`) and STTY1 theme files
//! - Conversion into the options every session is created with
//!
//! # Configuration File
//!
//! ```toml
//! terminal_type = "xterm-256color"
//! theme = "dark"
//! # theme_file = "/home/me/themes/nord.sttheme"
//! prompt_color = 4
//!
//! [palette]
//! background = "101010"
//! ansi = ["000000", "CC0000"]
//!
//! [network]
//! connect_timeout_secs = 30
//!
//! [ssh]
//! username = "me"
//! private_key = "/home/me/.ssh/id_ed25519"
//! ```
//!
//! # Theme Files
//!
//! An STTY1 theme is 20 lines: the magic `STTY1`, then background,
//! foreground and cursor, then ANSI colors 0-15, each as `RRGGBB`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::color::{Palette, Rgb};
use crate::core::lifecycle::WorkerOptions;
use crate::core::session::{SessionOptions, SshOptions};
use crate::core::ssh::SshAuth;
use crate::wm::GridSize;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid theme file: {0}")]
    Theme(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sent in TERMINAL-TYPE replies and SSH PTY requests
    pub terminal_type: String,
    /// Built-in theme name
    pub theme: String,
    /// STTY1 theme file, applied over the built-in theme
    pub theme_file: Option<PathBuf>,
    pub bold_is_bright: bool,
    /// Local shell prompt color, 0-15
    pub prompt_color: u8,
    /// Used when `RUST_LOG` is not set
    pub log_level: String,
    pub palette: PaletteOverrides,
    pub network: NetworkConfig,
    pub scrollback: ScrollbackConfig,
    pub window: WindowConfig,
    pub ssh: SshConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            terminal_type: "xterm-256color".to_string(),
            theme: "dark".to_string(),
            theme_file: None,
            bold_is_bright: true,
            prompt_color: 4,
            log_level: "info".to_string(),
            palette: PaletteOverrides::default(),
            network: NetworkConfig::default(),
            scrollback: ScrollbackConfig::default(),
            window: WindowConfig::default(),
            ssh: SshConfig::default(),
        }
    }
}

/// Individual palette colors, as `RRGGBB`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteOverrides {
    pub foreground: Option<String>,
    pub background: Option<String>,
    pub cursor: Option<String>,
    /// Up to 16 entries, starting at color 0
    pub ansi: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: u64,
    pub stop_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub buffer_size: usize,
    pub telnet_port: u16,
    pub ssh_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            stop_timeout_ms: 5000,
            poll_interval_ms: 10,
            buffer_size: 8192,
            telnet_port: 23,
            ssh_port: 22,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollbackConfig {
    pub lines: usize,
    pub cols: usize,
}

impl Default for ScrollbackConfig {
    fn default() -> Self {
        Self { lines: 100, cols: 80 }
    }
}

/// Grid used for new windows when the host size is unknown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub cols: u16,
    pub rows: u16,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub username: Option<String>,
    /// Password, or the key passphrase when `private_key` is set
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    pub public_key: Option<PathBuf>,
    pub accept_new_host_keys: bool,
    /// Defaults to `~/.seventty/known_hosts`
    pub known_hosts: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            private_key: None,
            public_key: None,
            accept_new_host_keys: true,
            known_hosts: None,
        }
    }
}

impl Config {
    /// Load `~/.seventty/config.toml`, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// `~/.seventty`
    pub fn config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".seventty"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Built-in theme, then theme file, then overrides
    pub fn palette(&self) -> Palette {
        let mut palette = Palette::by_name(&self.theme).unwrap_or_else(|| {
            warn!("unknown theme '{}'; using dark", self.theme);
            Palette::dark()
        });

        if let Some(path) = &self.theme_file {
            match load_theme_file(path) {
                Ok(theme) => palette = theme,
                Err(e) => warn!("{}: {}", path.display(), e),
            }
        }

        let overrides = &self.palette;
        apply_override(&mut palette.fg, overrides.foreground.as_deref(), "foreground");
        apply_override(&mut palette.bg, overrides.background.as_deref(), "background");
        apply_override(&mut palette.cursor, overrides.cursor.as_deref(), "cursor");
        for (slot, hex) in palette.ansi.iter_mut().zip(&overrides.ansi) {
            apply_override(slot, Some(hex), "ansi");
        }
        palette
    }

    pub fn window_grid(&self) -> GridSize {
        GridSize::new(self.window.cols, self.window.rows)
    }

    pub fn session_options(&self) -> SessionOptions {
        let net = &self.network;
        let ssh = &self.ssh;

        let auth = match (&ssh.private_key, &ssh.password) {
            (Some(private_key), passphrase) => Some(SshAuth::PublicKey {
                private_key: private_key.clone(),
                public_key: ssh.public_key.clone(),
                passphrase: passphrase.clone(),
            }),
            (None, Some(password)) => Some(SshAuth::Password(password.clone())),
            (None, None) => None,
        };
        let known_hosts = ssh
            .known_hosts
            .clone()
            .or_else(|| Self::config_dir().map(|dir| dir.join("known_hosts")));

        SessionOptions {
            terminal_type: self.terminal_type.clone(),
            palette: self.palette(),
            bold_is_bright: self.bold_is_bright,
            prompt_color: self.prompt_color.min(15),
            scrollback_lines: self.scrollback.lines,
            scrollback_cols: self.scrollback.cols,
            connect_timeout: Duration::from_secs(net.connect_timeout_secs),
            stop_timeout: Duration::from_millis(net.stop_timeout_ms),
            worker: WorkerOptions {
                buffer_size: net.buffer_size,
                poll_interval: Duration::from_millis(net.poll_interval_ms),
            },
            telnet_port: net.telnet_port,
            ssh_port: net.ssh_port,
            ssh: SshOptions {
                username: ssh.username.clone(),
                auth,
                accept_new_host_keys: ssh.accept_new_host_keys,
                known_hosts,
            },
        }
    }
}

fn apply_override(slot: &mut Rgb, hex: Option<&str>, what: &str) {
    if let Some(hex) = hex {
        match Rgb::parse_hex(hex) {
            Some(rgb) => *slot = rgb,
            None => warn!("palette {}: bad color '{}'", what, hex),
        }
    }
}

pub fn load_theme_file(path: &Path) -> Result<Palette> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_theme(&content)
}

/// Parse an STTY1 theme; nothing is applied unless every line parses
pub fn parse_theme(content: &str) -> Result<Palette> {
    let mut lines = content.lines();

    match lines.next() {
        Some(magic) if magic.starts_with("STTY1") => {}
        _ => return Err(ConfigError::Theme("missing STTY1 header".into())),
    }

    let mut next_color = |what: &str| -> Result<Rgb> {
        let line = lines
            .next()
            .ok_or_else(|| ConfigError::Theme(format!("missing {}", what)))?;
        Rgb::parse_hex(line).ok_or_else(|| ConfigError::Theme(format!("bad {} '{}'", what, line)))
    };

    let bg = next_color("background")?;
    let fg = next_color("foreground")?;
    let cursor = next_color("cursor")?;
    let mut ansi = [Rgb::default(); 16];
    for (i, slot) in ansi.iter_mut().enumerate() {
        *slot = next_color(format!("color {}", i).as_str())?;
    }

    Ok(Palette {
        ansi,
        fg,
        bg,
        cursor,
    })
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
