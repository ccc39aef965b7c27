//! Local shell
//!
//! A line editor with a handful of built-in commands. Input arrives as the
//! bytes a terminal would send; output is VT text for the session screen.
//! Commands that need the session table (new tabs, inline connections,
//! closing) come back as [`ShellAction`]s.

use std::collections::VecDeque;

use super::color::Palette;
use super::ssh::parse_target;

pub const HISTORY_SIZE: usize = 32;
/// Longest editable line
pub const LINE_MAX: usize = 255;
const MAX_ARGS: usize = 32;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Work the shell hands back to the session owner
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellAction {
    /// Open a Telnet tab
    Telnet { host: String, port: u16 },
    /// Run raw TCP inline in this session
    Netcat { host: String, port: u16 },
    /// Open an SSH tab
    Ssh {
        user: Option<String>,
        host: String,
        port: u16,
    },
    /// Close this session (or its window, or the program)
    Exit,
}

/// Echo text plus any actions produced by one batch of input
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub echo: Vec<u8>,
    pub actions: Vec<ShellAction>,
}

impl ShellOutput {
    fn write(&mut self, s: &str) {
        self.echo.extend_from_slice(s.as_bytes());
    }
}

#[derive(Clone, Debug)]
pub struct ShellOptions {
    /// 0..15, mapped onto SGR 30-37 / 90-97
    pub prompt_color: u8,
    pub palette: Palette,
    pub telnet_port: u16,
    pub ssh_port: u16,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            prompt_color: 4,
            palette: Palette::default(),
            telnet_port: 23,
            ssh_port: 22,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Escape {
    None,
    Esc,
    Csi(Vec<u8>),
    Ss3,
}

enum Key {
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
}

pub struct LocalShell {
    options: ShellOptions,
    line: String,
    /// Byte offset into `line` (ASCII only)
    cursor: usize,
    history: VecDeque<String>,
    /// Index into `history` while browsing
    history_pos: Option<usize>,
    saved_line: String,
    escape: Escape,
    prev_cr: bool,
}

impl LocalShell {
    pub fn new(options: ShellOptions) -> Self {
        Self {
            options,
            line: String::new(),
            cursor: 0,
            history: VecDeque::with_capacity(HISTORY_SIZE),
            history_pos: None,
            saved_line: String::new(),
            escape: Escape::None,
            prev_cr: false,
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Clear screen, banner and first prompt
    pub fn banner(&self) -> Vec<u8> {
        let mut out = ShellOutput::default();
        out.write(CLEAR_SCREEN);
        out.write("SevenTTY local shell\r\n");
        out.write("type 'help' for commands\r\n\r\n");
        out.write(&self.prompt());
        out.echo
    }

    pub fn prompt(&self) -> String {
        let c = self.options.prompt_color.min(15);
        let sgr = if c >= 8 { 90 + (c - 8) } else { 30 + c };
        format!("\x1b[1;{}mlocal\x1b[0m \x1b[1m$\x1b[0m ", sgr)
    }

    /// Fresh prompt after an inline connection ends
    pub fn resume(&mut self) -> Vec<u8> {
        self.reset_line();
        let mut out = ShellOutput::default();
        out.write("\r\n");
        out.write(&self.prompt());
        out.echo
    }

    pub fn handle_input(&mut self, bytes: &[u8]) -> ShellOutput {
        let mut out = ShellOutput::default();
        for &b in bytes {
            let prev_cr = std::mem::replace(&mut self.prev_cr, b == b'\r');
            if self.escape != Escape::None {
                if let Some(key) = self.decode_escape(b) {
                    self.handle_key(key, &mut out);
                }
                continue;
            }
            match b {
                0x1B => self.escape = Escape::Esc,
                b'\r' => self.enter(&mut out),
                b'\n' if !prev_cr => self.enter(&mut out),
                b'\n' => {}
                0x01 => self.handle_key(Key::Home, &mut out),
                0x05 => self.handle_key(Key::End, &mut out),
                0x03 => {
                    out.write("^C\r\n");
                    self.reset_line();
                    out.write(&self.prompt());
                }
                0x04 => {
                    if self.line.is_empty() {
                        out.write("exit\r\n");
                        out.actions.push(ShellAction::Exit);
                    }
                }
                0x0C => {
                    out.write(CLEAR_SCREEN);
                    out.write(&self.prompt());
                    out.write(&self.line);
                    let back = self.line.len() - self.cursor;
                    if back > 0 {
                        out.write(&format!("\x1b[{}D", back));
                    }
                }
                0x15 => self.erase_display(&mut out),
                0x08 | 0x7F => self.backspace(&mut out),
                0x20..=0x7E => self.insert(b as char, &mut out),
                _ => {}
            }
            if out.actions.contains(&ShellAction::Exit) {
                break;
            }
        }
        out
    }

    /// Track escape sequences; returns a key once one completes
    fn decode_escape(&mut self, b: u8) -> Option<Key> {
        match std::mem::replace(&mut self.escape, Escape::None) {
            Escape::None => None,
            Escape::Esc => {
                match b {
                    b'[' => self.escape = Escape::Csi(Vec::new()),
                    b'O' => self.escape = Escape::Ss3,
                    _ => {}
                }
                None
            }
            Escape::Ss3 => simple_key(b),
            Escape::Csi(mut params) => match b {
                0x30..=0x3F => {
                    if params.len() < 8 {
                        params.push(b);
                    }
                    self.escape = Escape::Csi(params);
                    None
                }
                b'~' => match params.as_slice() {
                    b"1" | b"7" => Some(Key::Home),
                    b"4" | b"8" => Some(Key::End),
                    // page keys belong to scrollback
                    _ => None,
                },
                _ => simple_key(b),
            },
        }
    }

    fn handle_key(&mut self, key: Key, out: &mut ShellOutput) {
        match key {
            Key::Left => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    out.write("\x1b[D");
                }
            }
            Key::Right => {
                if self.cursor < self.line.len() {
                    self.cursor += 1;
                    out.write("\x1b[C");
                }
            }
            Key::Home => {
                if self.cursor > 0 {
                    out.write(&format!("\x1b[{}D", self.cursor));
                    self.cursor = 0;
                }
            }
            Key::End => {
                let ahead = self.line.len() - self.cursor;
                if ahead > 0 {
                    out.write(&format!("\x1b[{}C", ahead));
                    self.cursor = self.line.len();
                }
            }
            Key::Up => self.history_prev(out),
            Key::Down => self.history_next(out),
        }
    }

    fn history_prev(&mut self, out: &mut ShellOutput) {
        if self.history.is_empty() {
            return;
        }
        let next = match self.history_pos {
            None => {
                self.saved_line = self.line.clone();
                self.history.len() - 1
            }
            Some(pos) if pos > 0 => pos - 1,
            Some(_) => return,
        };
        self.erase_display(out);
        self.line = self.history[next].clone();
        self.cursor = self.line.len();
        self.history_pos = Some(next);
        out.write(&self.line);
    }

    fn history_next(&mut self, out: &mut ShellOutput) {
        let Some(pos) = self.history_pos else {
            return;
        };
        self.erase_display(out);
        if pos + 1 < self.history.len() {
            self.history_pos = Some(pos + 1);
            self.line = self.history[pos + 1].clone();
        } else {
            self.history_pos = None;
            self.line = std::mem::take(&mut self.saved_line);
        }
        self.cursor = self.line.len();
        out.write(&self.line);
    }

    fn insert(&mut self, c: char, out: &mut ShellOutput) {
        if self.line.len() >= LINE_MAX {
            return;
        }
        self.line.insert(self.cursor, c);
        self.cursor += 1;
        if self.cursor == self.line.len() {
            out.echo.push(c as u8);
        } else {
            out.write(&self.line[self.cursor - 1..]);
            out.write(&format!("\x1b[{}D", self.line.len() - self.cursor));
        }
    }

    fn backspace(&mut self, out: &mut ShellOutput) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        self.line.remove(self.cursor);
        out.write("\x08");
        self.redraw_from_cursor(out);
    }

    /// Rewrite the tail of the line and blank the old last column
    fn redraw_from_cursor(&self, out: &mut ShellOutput) {
        out.write(&self.line[self.cursor..]);
        out.write(" ");
        out.write(&format!("\x1b[{}D", self.line.len() - self.cursor + 1));
    }

    /// Wipe the displayed line and empty the buffer
    fn erase_display(&mut self, out: &mut ShellOutput) {
        let ahead = self.line.len() - self.cursor;
        if ahead > 0 {
            out.write(&format!("\x1b[{}C", ahead));
        }
        for _ in 0..self.line.len() {
            out.write("\x08 \x08");
        }
        self.line.clear();
        self.cursor = 0;
    }

    fn reset_line(&mut self) {
        self.line.clear();
        self.cursor = 0;
        self.history_pos = None;
    }

    fn enter(&mut self, out: &mut ShellOutput) {
        out.write("\r\n");
        let line = std::mem::take(&mut self.line);
        self.reset_line();

        if !line.is_empty() {
            if self.history.len() == HISTORY_SIZE {
                self.history.pop_front();
            }
            self.history.push_back(line.clone());
            self.execute(&line, out);
        }

        // the prompt returns later for inline connections, never for exit
        if out.actions.is_empty() || matches!(out.actions.last(), Some(ShellAction::Telnet { .. } | ShellAction::Ssh { .. })) {
            out.write(&self.prompt());
        }
    }

    fn execute(&mut self, line: &str, out: &mut ShellOutput) {
        let argv = parse_args(line);
        let Some(cmd) = argv.first() else {
            return;
        };
        let args = &argv[1..];

        match cmd.as_str() {
            "help" | "?" => cmd_help(out),
            "echo" => {
                out.write(&args.join(" "));
                out.write("\r\n");
            }
            "clear" | "cls" => out.write(CLEAR_SCREEN),
            "colors" => cmd_colors(&self.options.palette, out),
            "telnet" => match args {
                [host] => out.actions.push(ShellAction::Telnet {
                    host: host.clone(),
                    port: self.options.telnet_port,
                }),
                [host, port, ..] => match port.parse() {
                    Ok(port) => out.actions.push(ShellAction::Telnet {
                        host: host.clone(),
                        port,
                    }),
                    Err(_) => out.write(&format!("telnet: invalid port '{}'\r\n", port)),
                },
                [] => out.write("usage: telnet <host> [port]\r\n"),
            },
            "nc" => match args {
                [host, port, ..] => match port.parse() {
                    Ok(port) => out.actions.push(ShellAction::Netcat {
                        host: host.clone(),
                        port,
                    }),
                    Err(_) => out.write(&format!("nc: invalid port '{}'\r\n", port)),
                },
                _ => out.write("usage: nc <host> <port>\r\n"),
            },
            "ssh" => match args.first().map(|t| parse_target(t, self.options.ssh_port)) {
                Some(Some((user, host, port))) => {
                    out.actions.push(ShellAction::Ssh { user, host, port })
                }
                Some(None) => out.write(&format!("ssh: invalid target '{}'\r\n", args[0])),
                None => out.write("usage: ssh [user@]host[:port]\r\n"),
            },
            "exit" | "quit" => out.actions.push(ShellAction::Exit),
            other => out.write(&format!("{}: command not found (type 'help')\r\n", other)),
        }
    }
}

fn simple_key(b: u8) -> Option<Key> {
    match b {
        b'A' => Some(Key::Up),
        b'B' => Some(Key::Down),
        b'C' => Some(Key::Right),
        b'D' => Some(Key::Left),
        b'H' => Some(Key::Home),
        b'F' => Some(Key::End),
        _ => None,
    }
}

/// Split a command line. Double or single quotes group words and `\ `
/// is a literal space.
pub fn parse_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    while args.len() < MAX_ARGS {
        while matches!(chars.peek(), Some(' ' | '\t')) {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut arg = String::new();
        if first == '"' || first == '\'' {
            chars.next();
            for c in chars.by_ref() {
                if c == first {
                    break;
                }
                arg.push(c);
            }
        } else {
            while let Some(c) = chars.next() {
                match c {
                    '\\' if chars.peek() == Some(&' ') => {
                        chars.next();
                        arg.push(' ');
                    }
                    ' ' | '\t' => break,
                    _ => arg.push(c),
                }
            }
        }
        args.push(arg);
    }
    args
}

fn cmd_help(out: &mut ShellOutput) {
    out.write("SevenTTY local shell - commands:\r\n");
    out.write("\r\n");
    out.write("  \x1b[1mConnections:\x1b[0m\r\n");
    out.write("    telnet <host> [port]  open Telnet tab\r\n");
    out.write("    nc <host> <port>      raw TCP in this tab\r\n");
    out.write("    ssh [user@]h[:p]      open SSH tab\r\n");
    out.write("\r\n");
    out.write("  \x1b[1mSystem:\x1b[0m\r\n");
    out.write("    echo [text...]        print text\r\n");
    out.write("    clear                 clear screen\r\n");
    out.write("    colors                display color test\r\n");
    out.write("    help                  this message\r\n");
    out.write("    exit                  close this tab\r\n");
}

fn cmd_colors(palette: &Palette, out: &mut ShellOutput) {
    out.write("  Palette (hex RGB):\r\n");
    for (i, rgb) in palette.ansi.iter().enumerate() {
        out.write(&format!("    {:2}: {}\r\n", i, rgb.to_hex()));
    }
    out.write(&format!(
        "    fg: {}  bg: {}\r\n",
        palette.fg.to_hex(),
        palette.bg.to_hex()
    ));
    out.write("\r\n");

    out.write("  Normal colors:\r\n  ");
    for i in 0..8 {
        out.write(&format!("\x1b[{}m {:2}  \x1b[0m", 40 + i, i));
    }
    out.write("\r\n");
    out.write("  Bright colors:\r\n  ");
    for i in 0..8 {
        out.write(&format!("\x1b[{}m {:2}  \x1b[0m", 100 + i, 8 + i));
    }
    out.write("\r\n\r\n");

    out.write("  Foreground text:\r\n  ");
    for i in 0..8 {
        if i >= 2 {
            out.write(&format!("\x1b[{}mColor{:<2} \x1b[0m", 30 + i, i));
        } else {
            out.write(&format!("\x1b[{}mColor{} \x1b[0m", 30 + i, i));
        }
    }
    out.write("\r\n  ");
    for i in 0..8 {
        out.write(&format!("\x1b[{}mColor{:<2} \x1b[0m", 90 + i, 8 + i));
    }
    out.write("\r\n");
}
