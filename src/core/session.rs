//! Session management
//!
//! A session is one tab: a screen model, its scrollback and view state, and
//! either a local shell or a worker driving a network connection. The owner
//! calls [`Session::process_output`] to move worker output into the screen.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::color::Palette;
use super::lifecycle::{
    LifecycleError, LifecycleState, Outbound, SessionDriver, SessionLifecycle, StopOutcome,
    WorkerEvent, WorkerLink, WorkerOptions,
};
use super::screen::{CursorPos, LiveCell, NullCallbacks, Rect, ScreenCallbacks, ScreenModel};
use super::scrollback::{CellSource, ScrollbackCell, ScrollbackRing};
use super::shell::{LocalShell, ShellAction, ShellOptions};
use super::ssh::{
    HostKeyStore, KnownHosts, SshAuth, SshConnector, SshCredentials, SshError,
};
use super::term::VtScreen;
use super::worker::{SshDriver, SshSettings, TcpMode, TcpTarget, TelnetDriver};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Ssh(#[from] SshError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    None,
    Ssh,
    Telnet,
    LocalShell,
}

/// What to connect a session to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectRequest {
    Telnet { host: String, port: u16 },
    /// Raw TCP; runs inline when issued on a local shell
    Raw { host: String, port: u16 },
    Ssh {
        user: Option<String>,
        host: String,
        port: u16,
    },
}

/// SSH defaults applied to every SSH connect
#[derive(Clone, Debug)]
pub struct SshOptions {
    pub username: Option<String>,
    pub auth: Option<SshAuth>,
    pub accept_new_host_keys: bool,
    pub known_hosts: Option<PathBuf>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            username: None,
            auth: None,
            accept_new_host_keys: true,
            known_hosts: None,
        }
    }
}

impl SshOptions {
    fn credentials(&self, user: Option<String>) -> SshCredentials {
        let username = user
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| "root".to_string());
        SshCredentials {
            username,
            auth: self.auth.clone().unwrap_or(SshAuth::Password(String::new())),
        }
    }

    fn host_keys(&self) -> Box<dyn HostKeyStore> {
        match &self.known_hosts {
            Some(path) => match KnownHosts::load(path) {
                Ok(hosts) => Box::new(hosts),
                Err(e) => {
                    warn!("{}: {}; host keys will not be saved", path.display(), e);
                    Box::new(KnownHosts::in_memory())
                }
            },
            None => Box::new(KnownHosts::in_memory()),
        }
    }
}

/// Settings shared by every session
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub terminal_type: String,
    pub palette: Palette,
    pub bold_is_bright: bool,
    pub prompt_color: u8,
    pub scrollback_lines: usize,
    pub scrollback_cols: usize,
    pub connect_timeout: Duration,
    pub stop_timeout: Duration,
    pub worker: WorkerOptions,
    pub telnet_port: u16,
    pub ssh_port: u16,
    pub ssh: SshOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            terminal_type: "xterm-256color".to_string(),
            palette: Palette::default(),
            bold_is_bright: true,
            prompt_color: 4,
            scrollback_lines: 100,
            scrollback_cols: 80,
            connect_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_millis(5000),
            worker: WorkerOptions::default(),
            telnet_port: 23,
            ssh_port: 22,
            ssh: SshOptions::default(),
        }
    }
}

/// A selected span of display cells, in reading order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub start: (u16, u16),
    pub end: (u16, u16),
}

impl Selection {
    pub fn new(a: (u16, u16), b: (u16, u16)) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn contains(&self, row: u16, col: u16) -> bool {
        (row, col) >= self.start && (row, col) <= self.end
    }
}

/// View-side state the screen model reports into
pub struct SessionView {
    pub ring: ScrollbackRing,
    pub cursor: CursorPos,
    pub selection: Option<Selection>,
    damage: Rect,
    live_rows: u16,
    attached: bool,
}

impl SessionView {
    fn new(scrollback_lines: usize, scrollback_cols: usize, rows: u16) -> Self {
        Self {
            ring: ScrollbackRing::new(scrollback_lines, scrollback_cols),
            cursor: CursorPos::default(),
            selection: None,
            damage: Rect::default(),
            live_rows: rows,
            attached: true,
        }
    }

    pub fn live_rows(&self) -> u16 {
        self.live_rows
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl ScreenCallbacks for SessionView {
    fn on_damage(&mut self, region: Rect) {
        self.damage = self.damage.union(region);
    }

    fn on_scrollback_push(&mut self, row: &[LiveCell]) {
        self.ring.push_live_row(row);
    }

    fn on_scrollback_pop(&mut self, cols: u16) -> Option<Vec<LiveCell>> {
        self.ring.pop_live_row(cols as usize)
    }

    fn on_cursor_move(&mut self, pos: CursorPos) {
        self.cursor = pos;
    }
}

/// One display cell as the renderer sees it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellView {
    History(ScrollbackCell),
    Live(LiveCell),
    Blank,
}

pub struct Session {
    kind: SessionKind,
    label: String,
    options: Arc<SessionOptions>,
    screen: Box<dyn ScreenModel>,
    view: SessionView,
    lifecycle: SessionLifecycle,
    shell: Option<LocalShell>,
    /// A local shell running `nc` in place
    inline: bool,
}

impl Session {
    /// Session running the local shell
    pub fn new_local_shell(options: Arc<SessionOptions>, cols: u16, rows: u16) -> Self {
        let shell = LocalShell::new(ShellOptions {
            prompt_color: options.prompt_color,
            palette: options.palette.clone(),
            telnet_port: options.telnet_port,
            ssh_port: options.ssh_port,
        });
        let banner = shell.banner();

        let mut session = Self::with_kind(SessionKind::LocalShell, "shell", options, cols, rows);
        session.shell = Some(shell);
        session.feed(&banner);
        session
    }

    /// Empty session waiting for [`Session::connect`]
    pub fn new_remote(options: Arc<SessionOptions>, cols: u16, rows: u16) -> Self {
        Self::with_kind(SessionKind::None, "disconnected", options, cols, rows)
    }

    fn with_kind(
        kind: SessionKind,
        label: &str,
        options: Arc<SessionOptions>,
        cols: u16,
        rows: u16,
    ) -> Self {
        let view = SessionView::new(options.scrollback_lines, options.scrollback_cols, rows);
        Self {
            kind,
            label: label.to_string(),
            options,
            screen: Box::new(VtScreen::new(cols, rows)),
            view,
            lifecycle: SessionLifecycle::new(),
            shell: None,
            inline: false,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn title(&self) -> &str {
        self.screen.title()
    }

    pub fn palette(&self) -> &Palette {
        &self.options.palette
    }

    pub fn bold_is_bright(&self) -> bool {
        self.options.bold_is_bright
    }

    pub fn size(&self) -> (u16, u16) {
        self.screen.size()
    }

    pub fn screen(&self) -> &dyn ScreenModel {
        self.screen.as_ref()
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn is_inline(&self) -> bool {
        self.inline
    }

    /// Feed bytes to the screen model
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.view.attached {
            self.screen.feed(bytes, &mut self.view);
        } else {
            self.screen.feed(bytes, &mut NullCallbacks);
        }
    }

    pub fn print_status(&mut self, text: &str) {
        self.feed(text.as_bytes());
    }

    pub fn detach_callbacks(&mut self) {
        self.view.attached = false;
    }

    pub fn attach_callbacks(&mut self) {
        self.view.attached = true;
    }

    /// Apply worker output in arrival order; true if anything changed
    pub fn process_output(&mut self) -> bool {
        let events = self.lifecycle.drain_events();
        let changed = !events.is_empty();

        for event in events {
            match event {
                WorkerEvent::Output(bytes) => self.feed(&bytes),
                WorkerEvent::Status(text) => self.print_status(&text),
                WorkerEvent::Opened => debug!("{}: connection open", self.label),
                WorkerEvent::Finished => self.connection_ended(),
            }
        }

        let responses = self.screen.take_responses();
        if !responses.is_empty() && (self.shell.is_none() || self.inline) {
            self.lifecycle.send(Outbound::Input(responses));
        }

        if let Some(link) = self.lifecycle.link_mut() {
            link.reap();
        }
        changed
    }

    fn connection_ended(&mut self) {
        if self.inline {
            self.inline = false;
            self.label = "shell".to_string();
            if let Some(shell) = self.shell.as_mut() {
                let prompt = shell.resume();
                self.feed(&prompt);
            }
        } else if self.shell.is_none() {
            self.label = "disconnected".to_string();
        }
    }

    /// Keyboard or paste input; returns local shell actions, if any
    pub fn write_input(&mut self, bytes: &[u8]) -> Vec<ShellAction> {
        if self.view.ring.is_scrolled() {
            self.scroll_reset();
        }

        if self.inline {
            if bytes.contains(&0x03) {
                self.disconnect();
            } else {
                self.lifecycle.send(Outbound::Input(bytes.to_vec()));
            }
            return Vec::new();
        }

        match self.shell.as_mut() {
            Some(shell) => {
                let out = shell.handle_input(bytes);
                self.feed(&out.echo);
                out.actions
            }
            None => {
                self.lifecycle.send(Outbound::Input(bytes.to_vec()));
                Vec::new()
            }
        }
    }

    /// Resize the screen model and tell the worker
    pub fn resize(&mut self, cols: u16, rows: u16) {
        if self.view.attached {
            self.screen.resize(cols, rows, &mut self.view);
        } else {
            self.screen.resize(cols, rows, &mut NullCallbacks);
        }
        self.view.live_rows = rows;
        // queued even while connecting so the first NAWS sees the new grid
        if let Some(link) = self.lifecycle.link() {
            if !link.is_done() {
                link.send(Outbound::Resize { cols, rows });
            }
        }
    }

    /// Start a connection; rejected while a previous worker is still running
    pub fn connect(
        &mut self,
        request: ConnectRequest,
        connector: Option<&SshConnector>,
    ) -> Result<()> {
        if matches!(
            self.lifecycle.state(),
            LifecycleState::Waiting | LifecycleState::Open | LifecycleState::Cleanup
        ) {
            return Err(LifecycleError::Busy.into());
        }

        let (cols, rows) = self.screen.size();
        let timeout = self.options.connect_timeout;
        let inline =
            self.kind == SessionKind::LocalShell && matches!(request, ConnectRequest::Raw { .. });

        let (kind, driver): (SessionKind, Box<dyn SessionDriver>) = match request {
            ConnectRequest::Telnet { host, port } => (
                SessionKind::Telnet,
                Box::new(TelnetDriver::new(
                    TcpTarget::new(host, port),
                    TcpMode::Telnet,
                    &self.options.terminal_type,
                    cols,
                    rows,
                    timeout,
                )),
            ),
            ConnectRequest::Raw { host, port } => (
                SessionKind::Telnet,
                Box::new(TelnetDriver::new(
                    TcpTarget::new(host, port),
                    TcpMode::Raw,
                    &self.options.terminal_type,
                    cols,
                    rows,
                    timeout,
                )),
            ),
            ConnectRequest::Ssh { user, host, port } => {
                let Some(connector) = connector else {
                    self.print_status(&format!("{}\r\n", SshError::Unsupported));
                    self.lifecycle.mark_failed();
                    return Err(SshError::Unsupported.into());
                };
                let settings = SshSettings {
                    target: TcpTarget::new(host, port),
                    credentials: self.options.ssh.credentials(user),
                    terminal_type: self.options.terminal_type.clone(),
                    cols,
                    rows,
                    timeout,
                    accept_new_host_keys: self.options.ssh.accept_new_host_keys,
                };
                (
                    SessionKind::Ssh,
                    Box::new(SshDriver::new(settings, connector(), self.options.ssh.host_keys())),
                )
            }
        };

        let label = driver.label();
        if let Err(e) = self.lifecycle.start(driver, self.options.worker) {
            self.print_status(&format!("{}\r\n", e));
            return Err(e.into());
        }

        info!("{}: connecting", label);
        self.label = label;
        if inline {
            self.inline = true;
        } else {
            self.kind = kind;
            self.shell = None;
        }
        Ok(())
    }

    /// Stop the worker, waiting up to the stop timeout
    pub fn disconnect(&mut self) -> StopOutcome {
        if self.lifecycle.link().is_none() {
            return StopOutcome::NotRunning;
        }

        self.detach_callbacks();
        let outcome = self.lifecycle.request_stop(self.options.stop_timeout);
        self.attach_callbacks();
        self.process_output();

        if outcome == StopOutcome::Abandoned {
            warn!("{}: worker abandoned", self.label);
            self.connection_ended();
        }
        outcome
    }

    /// Tear down; returns a worker that has not finished yet
    pub fn close(mut self) -> Option<WorkerLink> {
        self.begin_close();
        let deadline = Instant::now() + self.options.stop_timeout;
        self.finish_close(deadline)
    }

    /// First half of a close: detach and signal the worker without waiting
    pub fn begin_close(&mut self) {
        self.detach_callbacks();
        self.lifecycle.signal_stop();
    }

    /// Second half of a close: wait for the worker until `deadline`
    pub fn finish_close(mut self, deadline: Instant) -> Option<WorkerLink> {
        self.lifecycle.wait_until(deadline);
        match self.lifecycle.take_link() {
            Some(link) if !link.is_done() => Some(link),
            _ => None,
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        self.options.stop_timeout
    }

    #[cfg(test)]
    pub(crate) fn start_driver(
        &mut self,
        driver: Box<dyn SessionDriver>,
    ) -> std::result::Result<(), LifecycleError> {
        self.lifecycle.start(driver, self.options.worker)
    }

    /// Resolve a display cell through the scroll offset
    pub fn read_cell(&self, row: u16, col: u16) -> CellView {
        match self
            .view
            .ring
            .cell_at(row as usize, col as usize, self.view.live_rows as usize)
        {
            CellSource::History(cell) => CellView::History(cell),
            CellSource::Live { row, col } => match self.screen.cell(row as u16, col as u16) {
                Some(cell) => CellView::Live(cell),
                None => CellView::Blank,
            },
            CellSource::Blank => CellView::Blank,
        }
    }

    pub fn take_damage(&mut self) -> Rect {
        std::mem::take(&mut self.view.damage)
    }

    fn damage_view(&mut self) {
        let (cols, rows) = self.screen.size();
        self.view.damage = Rect::full(cols, rows);
    }

    pub fn scroll_up(&mut self) {
        self.view.ring.scroll_up(self.view.live_rows as usize);
        self.damage_view();
    }

    pub fn scroll_down(&mut self) {
        self.view.ring.scroll_down(self.view.live_rows as usize);
        self.damage_view();
    }

    pub fn scroll_up_line(&mut self) {
        self.view.ring.scroll_up_line();
        self.damage_view();
    }

    pub fn scroll_down_line(&mut self) {
        self.view.ring.scroll_down_line();
        self.damage_view();
    }

    pub fn scroll_reset(&mut self) {
        self.view.ring.scroll_reset();
        self.damage_view();
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.view.selection = selection;
        self.damage_view();
    }

    pub fn is_selected(&self, row: u16, col: u16) -> bool {
        self.view
            .selection
            .map(|s| s.contains(row, col))
            .unwrap_or(false)
    }

    /// Cursor to draw, hidden while scrolled back
    pub fn cursor(&self) -> CursorPos {
        let mut cursor = self.view.cursor;
        if self.view.ring.is_scrolled() {
            cursor.visible = false;
        }
        cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    fn options() -> Arc<SessionOptions> {
        Arc::new(SessionOptions {
            connect_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            ..SessionOptions::default()
        })
    }

    fn screen_text(session: &Session) -> String {
        let (cols, rows) = session.size();
        let mut text = String::new();
        for row in 0..rows {
            let mut line = String::new();
            for col in 0..cols {
                match session.read_cell(row, col) {
                    CellView::Live(cell) if !cell.is_continuation() => line.push(cell.ch),
                    CellView::History(cell) => line.push(cell.ch as char),
                    _ => line.push(' '),
                }
            }
            text.push_str(line.trim_end());
            text.push('\n');
        }
        text
    }

    fn pump_until(session: &mut Session, pred: impl Fn(&Session) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            session.process_output();
            if pred(session) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Server that sends `greeting` and then waits for the client to hang up
    fn hold_open_server(greeting: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(greeting).unwrap();
            let mut buf = [0u8; 256];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        });
        port
    }

    #[test]
    fn test_local_shell_banner_and_echo() {
        let mut session = Session::new_local_shell(options(), 40, 10);
        assert_eq!(session.kind(), SessionKind::LocalShell);
        assert_eq!(session.label(), "shell");
        assert!(screen_text(&session).starts_with("SevenTTY local shell\n"));

        let actions = session.write_input(b"echo hi there\r");
        assert!(actions.is_empty());
        assert!(screen_text(&session).contains("\nhi there\n"));
    }

    #[test]
    fn test_shell_actions_pass_through() {
        let mut session = Session::new_local_shell(options(), 40, 10);
        let actions = session.write_input(b"telnet example.org 2323\r");
        assert_eq!(
            actions,
            vec![ShellAction::Telnet {
                host: "example.org".into(),
                port: 2323
            }]
        );
    }

    #[test]
    fn test_scrollback_read_path() {
        let mut session = Session::new_remote(options(), 20, 4);
        session.feed(b"1\r\n2\r\n3\r\n4\r\n5\r\n6");
        assert_eq!(session.view().ring.count(), 2);
        assert_eq!(screen_text(&session), "3\n4\n5\n6\n");

        session.scroll_up_line();
        match session.read_cell(0, 0) {
            CellView::History(cell) => assert_eq!(cell.ch, b'2'),
            other => panic!("expected history, got {:?}", other),
        }
        assert_eq!(screen_text(&session), "2\n3\n4\n5\n");
        assert!(!session.cursor().visible);
        assert_eq!(session.read_cell(5, 0), CellView::Blank);

        session.write_input(b"x");
        assert!(!session.view().ring.is_scrolled());
    }

    #[test]
    fn test_detached_feed_skips_history() {
        let mut session = Session::new_remote(options(), 20, 2);
        session.detach_callbacks();
        session.feed(b"a\r\nb\r\nc");
        assert_eq!(session.view().ring.count(), 0);
        session.attach_callbacks();
        session.feed(b"\r\nd");
        assert_eq!(session.view().ring.count(), 1);
    }

    #[test]
    fn test_raw_connect_and_disconnect() {
        let port = hold_open_server(b"hello\n");
        let mut session = Session::new_remote(options(), 60, 6);
        session
            .connect(
                ConnectRequest::Raw {
                    host: "127.0.0.1".into(),
                    port,
                },
                None,
            )
            .unwrap();
        assert_eq!(session.label(), "nc 127.0.0.1");
        assert_eq!(session.kind(), SessionKind::Telnet);

        assert!(pump_until(&mut session, |s| screen_text(s).contains("hello")));
        let text = screen_text(&session);
        assert!(text.contains(&format!("Connecting to \"127.0.0.1:{}\"... done.", port)));

        let again = session.connect(
            ConnectRequest::Raw {
                host: "127.0.0.1".into(),
                port,
            },
            None,
        );
        assert!(matches!(again, Err(SessionError::Lifecycle(LifecycleError::Busy))));

        assert_eq!(session.disconnect(), StopOutcome::Stopped);
        assert_eq!(session.lifecycle_state(), LifecycleState::Done);
        assert_eq!(session.label(), "disconnected");
    }

    #[test]
    fn test_inline_nc_returns_to_prompt() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"hi\n").unwrap();
        });

        let mut session = Session::new_local_shell(options(), 60, 20);
        let actions = session.write_input(format!("nc 127.0.0.1 {}\r", port).as_bytes());
        assert_eq!(actions.len(), 1);
        session
            .connect(
                ConnectRequest::Raw {
                    host: "127.0.0.1".into(),
                    port,
                },
                None,
            )
            .unwrap();
        assert!(session.is_inline());
        assert_eq!(session.kind(), SessionKind::LocalShell);

        assert!(pump_until(&mut session, |s| !s.is_inline()));
        let text = screen_text(&session);
        assert!(text.contains("\nhi\n"));
        assert!(text.contains("Connection closed by peer."));
        assert!(text.trim_end().ends_with("local $"));
        assert_eq!(session.label(), "shell");
    }

    #[test]
    fn test_inline_ctrl_c_disconnects() {
        let port = hold_open_server(b"");
        let mut session = Session::new_local_shell(options(), 60, 20);
        session
            .connect(
                ConnectRequest::Raw {
                    host: "127.0.0.1".into(),
                    port,
                },
                None,
            )
            .unwrap();
        assert!(pump_until(&mut session, |s| s.lifecycle_state() == LifecycleState::Open));

        session.write_input(&[0x03]);
        assert_eq!(session.lifecycle_state(), LifecycleState::Done);
        assert!(!session.is_inline());
        assert!(session.shell.is_some());
    }

    #[test]
    fn test_ssh_without_backend() {
        let mut session = Session::new_remote(options(), 60, 6);
        let result = session.connect(
            ConnectRequest::Ssh {
                user: None,
                host: "example.org".into(),
                port: 22,
            },
            None,
        );
        assert!(matches!(result, Err(SessionError::Ssh(SshError::Unsupported))));
        assert!(screen_text(&session).contains("SSH support is not available in this build."));
        assert_eq!(session.lifecycle_state(), LifecycleState::Done);
    }

    #[test]
    fn test_close_after_finish_returns_nothing() {
        let port = hold_open_server(b"x");
        let mut session = Session::new_remote(options(), 40, 6);
        session
            .connect(
                ConnectRequest::Telnet {
                    host: "127.0.0.1".into(),
                    port,
                },
                None,
            )
            .unwrap();
        assert!(pump_until(&mut session, |s| s.lifecycle_state() == LifecycleState::Open));
        assert!(session.close().is_none());
    }

    #[test]
    fn test_selection() {
        let mut session = Session::new_remote(options(), 20, 4);
        session.set_selection(Some(Selection::new((2, 3), (1, 5))));
        assert!(session.is_selected(1, 5));
        assert!(session.is_selected(1, 19));
        assert!(session.is_selected(2, 0));
        assert!(!session.is_selected(2, 4));
        assert!(!session.is_selected(1, 4));
    }
}
