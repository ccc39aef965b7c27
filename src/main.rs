//! seventty - a Telnet, raw TCP and SSH terminal client
//!
//! Each window holds up to eight session tabs. A tab starts as a local shell
//! with `telnet`, `nc` and `ssh` commands, or connects directly when a target
//! is given on the command line.
//!
//! # Keybindings (Ctrl+B prefix)
//!
//! | Key | Action |
//! |-----|--------|
//! | c | New tab |
//! | n/p | Next/Previous tab |
//! | w | Next window |
//! | W | New window |
//! | x | Close tab |
//! | d | Disconnect |
//! | PageUp/PageDown | Scroll half a page |
//! | Up/Down | Scroll one line |
//! | q | Quit |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use seventty::config::Config;
use seventty::core::color::Palette;
use seventty::core::session::ConnectRequest;
use seventty::core::ssh::parse_target;
use seventty::ui::{KeyMapper, Renderer};
use seventty::wm::{GridSize, WindowManager};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connection named on the command line, before config defaults apply
#[derive(Debug, PartialEq, Eq)]
enum Target {
    Telnet { host: String, port: Option<u16> },
    Netcat { host: String, port: u16 },
    Ssh(String),
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    config: Option<PathBuf>,
    theme: Option<String>,
    target: Option<Target>,
}

fn print_version() {
    eprintln!("seventty {}", VERSION);
}

fn print_help() {
    eprintln!("seventty {} - Telnet, raw TCP and SSH terminal client", VERSION);
    eprintln!();
    eprintln!("Usage: seventty [OPTIONS] [telnet HOST [PORT] | nc HOST PORT | ssh [USER@]HOST[:PORT]]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>   Configuration file (default ~/.seventty/config.toml)");
    eprintln!("  -t, --theme <NAME>    Color theme: {}", Palette::names().join(", "));
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keybindings (Ctrl+B prefix):");
    eprintln!("  Ctrl+B, c             New tab");
    eprintln!("  Ctrl+B, n / p         Next / previous tab");
    eprintln!("  Ctrl+B, w             Next window");
    eprintln!("  Ctrl+B, W             New window");
    eprintln!("  Ctrl+B, x             Close tab");
    eprintln!("  Ctrl+B, d             Disconnect");
    eprintln!("  Ctrl+B, PageUp/Down   Scroll back / forward half a page");
    eprintln!("  Ctrl+B, Up/Down       Scroll one line");
    eprintln!("  Ctrl+B, Ctrl+B        Send Ctrl+B");
    eprintln!("  Ctrl+B, q             Quit");
    eprintln!();
    eprintln!("Without a target the tab starts in the local shell; type 'help' there.");
    eprintln!();
    eprintln!("Configuration: ~/.seventty/config.toml");
    eprintln!("Log file:      ~/.seventty/seventty.log");
}

fn parse_port(value: &str) -> Result<u16, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid port: {}", value))
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("Missing config path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "-t" | "--theme" => {
                i += 1;
                let name = args.get(i).ok_or("Missing theme name")?;
                if Palette::by_name(name).is_none() {
                    return Err(format!("Unknown theme: {}", name));
                }
                parsed.theme = Some(name.clone());
            }
            "telnet" | "nc" | "ssh" if parsed.target.is_none() => {
                let rest = &args[i + 1..];
                parsed.target = Some(parse_target_args(&args[i], rest)?);
                break;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn parse_target_args(command: &str, rest: &[String]) -> Result<Target, String> {
    match (command, rest) {
        ("telnet", [host]) => Ok(Target::Telnet {
            host: host.clone(),
            port: None,
        }),
        ("telnet", [host, port]) => Ok(Target::Telnet {
            host: host.clone(),
            port: Some(parse_port(port)?),
        }),
        ("nc", [host, port]) => Ok(Target::Netcat {
            host: host.clone(),
            port: parse_port(port)?,
        }),
        ("ssh", [target]) => Ok(Target::Ssh(target.clone())),
        ("telnet", _) => Err("Usage: telnet HOST [PORT]".to_string()),
        ("nc", _) => Err("Usage: nc HOST PORT".to_string()),
        _ => Err("Usage: ssh [USER@]HOST[:PORT]".to_string()),
    }
}

fn resolve_target(target: Target, config: &Config) -> Result<ConnectRequest, String> {
    Ok(match target {
        Target::Telnet { host, port } => ConnectRequest::Telnet {
            host,
            port: port.unwrap_or(config.network.telnet_port),
        },
        Target::Netcat { host, port } => ConnectRequest::Raw { host, port },
        Target::Ssh(target) => {
            let (user, host, port) = parse_target(&target, config.network.ssh_port)
                .ok_or_else(|| format!("Invalid ssh target: {}", target))?;
            ConnectRequest::Ssh { user, host, port }
        }
    })
}

/// Log to `~/.seventty/seventty.log`; the display is never written to
fn init_logging(config: &Config) {
    let log_path = Config::config_dir()
        .map(|dir| dir.join("seventty.log"))
        .unwrap_or_else(|| PathBuf::from("seventty.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let argv: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(theme) = &args.theme {
        config.theme = theme.clone();
    }

    init_logging(&config);
    info!("seventty {} starting", VERSION);

    let request = match args.target.map(|t| resolve_target(t, &config)).transpose() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    run(config, request)
}

fn run(config: Config, request: Option<ConnectRequest>) -> anyhow::Result<()> {
    let grid = match Renderer::size() {
        Ok((cols, rows)) => {
            let (cols, rows) = Renderer::grid_for(cols, rows);
            GridSize::new(cols, rows)
        }
        Err(_) => config.window_grid(),
    };

    let mut wm = WindowManager::new(config.session_options(), grid);
    wm.new_window()?;
    if let (Some(request), Some(sid)) = (request, wm.active_session()) {
        info!("initial connection: {:?}", request);
        if let Err(e) = wm.connect(sid, request) {
            warn!("initial connection: {}", e);
        }
    }

    let mut renderer = Renderer::new();
    renderer.init()?;
    let result = main_loop(&mut wm, &mut renderer, grid);
    renderer.cleanup()?;
    info!("seventty exiting");
    result
}

fn main_loop(wm: &mut WindowManager, renderer: &mut Renderer, mut grid: GridSize) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(10);
    let mut prefix_mode = false;

    loop {
        if wm.exit_requested() {
            break;
        }
        wm.pump();
        if wm.exit_requested() {
            break;
        }
        renderer.render(wm)?;

        if !event::poll(poll_timeout)? {
            continue;
        }
        match event::read()? {
            Event::Key(key) => {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if prefix_mode {
                    prefix_mode = false;
                    handle_prefix_key(wm, renderer, &key, grid);
                } else if KeyMapper::is_prefix(&key) {
                    prefix_mode = true;
                } else {
                    send_key(wm, &key);
                }
            }
            Event::Paste(text) => {
                if let Some(sid) = wm.active_session() {
                    let modes = wm.session(sid).map(|s| s.screen().modes()).unwrap_or_default();
                    if let Err(e) = wm.write_input(sid, &KeyMapper::paste(&text, &modes)) {
                        warn!("paste: {}", e);
                    }
                }
            }
            Event::Resize(cols, rows) => {
                let (cols, rows) = Renderer::grid_for(cols, rows);
                info!("Resize: {}x{}", cols, rows);
                grid = GridSize::new(cols, rows);
                for window in wm.windows() {
                    if let Err(e) = wm.resize(window.id, cols, rows) {
                        warn!("resize window {}: {}", window.id, e);
                    }
                }
                renderer.invalidate();
            }
            _ => {}
        }
    }

    Ok(())
}

fn send_key(wm: &mut WindowManager, key: &KeyEvent) {
    let Some(sid) = wm.active_session() else {
        return;
    };
    let modes = wm.session(sid).map(|s| s.screen().modes()).unwrap_or_default();
    if let Some(bytes) = KeyMapper::map(key, &modes) {
        if let Err(e) = wm.write_input(sid, &bytes) {
            warn!("input: {}", e);
        }
    }
}

fn handle_prefix_key(wm: &mut WindowManager, renderer: &mut Renderer, key: &KeyEvent, grid: GridSize) {
    let (Some(wid), Some(sid)) = (wm.active_window(), wm.active_session()) else {
        return;
    };

    let result = match key.code {
        KeyCode::Char('c') => wm.new_session(wid).map(|_| ()),
        KeyCode::Char('n') => wm.next_session(wid),
        KeyCode::Char('p') => wm.prev_session(wid),
        KeyCode::Char('w') => {
            wm.next_window();
            Ok(())
        }
        KeyCode::Char('W') => wm
            .new_window()
            .and_then(|new| wm.resize(new, grid.cols, grid.rows)),
        KeyCode::Char('x') => wm.close_session(sid),
        KeyCode::Char('d') => wm.disconnect(sid).map(|outcome| {
            info!("{:?}: disconnect {:?}", sid, outcome);
        }),
        KeyCode::PageUp => wm.scroll_up(sid),
        KeyCode::PageDown => wm.scroll_down(sid),
        KeyCode::Up => wm.scroll_up_line(sid),
        KeyCode::Down => wm.scroll_down_line(sid),
        KeyCode::Char('q') => {
            wm.request_exit();
            Ok(())
        }
        _ if KeyMapper::is_prefix(key) => wm.write_input(sid, &[0x02]),
        _ => Ok(()),
    };

    if let Err(e) = result {
        warn!("prefix {:?}: {}", key.code, e);
    }
    renderer.invalidate();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_options_and_target() {
        let parsed = parse_args(&args(&["-t", "light", "telnet", "bbs.example", "2323"])).unwrap();
        assert_eq!(parsed.theme.as_deref(), Some("light"));
        assert_eq!(
            parsed.target,
            Some(Target::Telnet {
                host: "bbs.example".into(),
                port: Some(2323)
            })
        );

        let parsed = parse_args(&args(&["--config", "/tmp/c.toml", "ssh", "root@host"])).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(parsed.target, Some(Target::Ssh("root@host".into())));
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&["nc", "host"])).is_err());
        assert!(parse_args(&args(&["telnet", "host", "port"])).is_err());
        assert!(parse_args(&args(&["-t", "neon"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(parse_args(&args(&["-c"])).is_err());
    }

    #[test]
    fn test_resolve_target_uses_config_ports() {
        let config = Config::default();
        assert_eq!(
            resolve_target(
                Target::Telnet {
                    host: "h".into(),
                    port: None
                },
                &config
            ),
            Ok(ConnectRequest::Telnet {
                host: "h".into(),
                port: 23
            })
        );
        assert_eq!(
            resolve_target(Target::Ssh("alice@h:2200".into()), &config),
            Ok(ConnectRequest::Ssh {
                user: Some("alice".into()),
                host: "h".into(),
                port: 2200
            })
        );
        assert!(resolve_target(Target::Ssh("h:x".into()), &config).is_err());
    }
}
