//! Window Manager - windows, their session tabs, and the input/render entry points

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::table::{SessionId, SessionTable};
use super::window::{GridSize, WindowId, WindowTable};
use crate::core::lifecycle::{LifecycleState, StopOutcome};
use crate::core::session::{
    CellView, ConnectRequest, Session, SessionError, SessionKind, SessionOptions,
};
use crate::core::shell::ShellAction;
use crate::core::ssh::SshConnector;

#[derive(Debug, Error)]
pub enum WmError {
    #[error("too many windows")]
    TooManyWindows,
    #[error("too many sessions")]
    TooManySessions,
    #[error("no such window")]
    NoWindow,
    #[error("no such session")]
    NoSession,
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, WmError>;

/// Session summary for tab bars and status lines
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub window: Option<WindowId>,
    pub kind: SessionKind,
    pub label: String,
    pub title: String,
    pub state: LifecycleState,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    pub sessions: Vec<SessionId>,
    pub active_idx: usize,
    pub grid: GridSize,
    pub active: bool,
}

/// Window Manager - owns every session and window
pub struct WindowManager {
    sessions: SessionTable,
    windows: WindowTable,
    options: Arc<SessionOptions>,
    default_grid: GridSize,
    ssh_connector: Option<SshConnector>,
    /// Shell actions waiting for the next pump
    pending: Vec<(SessionId, ShellAction)>,
    exit_requested: bool,
}

impl WindowManager {
    pub fn new(options: SessionOptions, default_grid: GridSize) -> Self {
        Self {
            sessions: SessionTable::new(),
            windows: WindowTable::new(),
            options: Arc::new(options),
            default_grid,
            ssh_connector: None,
            pending: Vec::new(),
            exit_requested: false,
        }
    }

    /// Install the SSH backend factory
    pub fn ssh_connector(&mut self, connector: SshConnector) {
        self.ssh_connector = Some(connector);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    pub fn session(&self, sid: SessionId) -> Option<&Session> {
        self.sessions.get(sid)
    }

    pub fn session_mut(&mut self, sid: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(sid)
    }

    fn session_or_err(&mut self, sid: SessionId) -> Result<&mut Session> {
        self.sessions.get_mut(sid).ok_or(WmError::NoSession)
    }

    pub fn active_window(&self) -> Option<WindowId> {
        self.windows.active()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.windows
            .get(self.windows.active()?)
            .and_then(|w| w.active_session())
    }

    /// Open a window with one local shell
    pub fn new_window(&mut self) -> Result<WindowId> {
        let wid = self
            .windows
            .create(self.default_grid)
            .ok_or(WmError::TooManyWindows)?;
        if let Err(e) = self.new_session(wid) {
            self.windows.remove(wid);
            return Err(e);
        }
        info!("window {} opened", wid);
        Ok(wid)
    }

    pub fn close_window(&mut self, wid: WindowId) -> Result<()> {
        let window = self.windows.remove(wid).ok_or(WmError::NoWindow)?;
        self.sessions.close_all(window.sessions());
        info!("window {} closed", wid);
        if self.windows.is_empty() {
            self.exit_requested = true;
        }
        Ok(())
    }

    fn attach(&mut self, wid: WindowId, session: Session) -> Result<SessionId> {
        let window = self.windows.get(wid).ok_or(WmError::NoWindow)?;
        if window.is_full() {
            return Err(WmError::TooManySessions);
        }
        let sid = self
            .sessions
            .alloc(session)
            .ok_or(WmError::TooManySessions)?;
        if let Some(window) = self.windows.get_mut(wid) {
            window.add_session(sid);
        }
        Ok(sid)
    }

    /// New local shell tab in `wid`
    pub fn new_session(&mut self, wid: WindowId) -> Result<SessionId> {
        let grid = self.windows.get(wid).ok_or(WmError::NoWindow)?.grid;
        let session = Session::new_local_shell(self.options.clone(), grid.cols, grid.rows);
        let sid = self.attach(wid, session)?;
        debug!("window {}: shell session {:?}", wid, sid);
        Ok(sid)
    }

    /// New tab in `wid` connecting to `request`. Connect failures are shown
    /// on the tab itself.
    pub fn new_remote_session(
        &mut self,
        wid: WindowId,
        request: ConnectRequest,
    ) -> Result<SessionId> {
        let grid = self.windows.get(wid).ok_or(WmError::NoWindow)?.grid;
        let session = Session::new_remote(self.options.clone(), grid.cols, grid.rows);
        let sid = self.attach(wid, session)?;
        if let Err(e) = self.connect(sid, request) {
            warn!("{:?}: {}", sid, e);
        }
        Ok(sid)
    }

    /// Close a tab; an emptied window goes with it, and the last window
    /// going means exit
    pub fn close_session(&mut self, sid: SessionId) -> Result<()> {
        let wid = self.windows.find(sid);
        if !self.sessions.close(sid) {
            return Err(WmError::NoSession);
        }
        let Some(wid) = wid else {
            return Ok(());
        };

        let emptied = match self.windows.get_mut(wid) {
            Some(window) => {
                window.remove_session(sid);
                window.is_empty()
            }
            None => false,
        };
        if emptied {
            self.close_window(wid)?;
        }
        Ok(())
    }

    pub fn switch_session(&mut self, wid: WindowId, idx: usize) -> Result<()> {
        let window = self.windows.get_mut(wid).ok_or(WmError::NoWindow)?;
        if window.switch_to(idx) {
            Ok(())
        } else {
            Err(WmError::NoSession)
        }
    }

    pub fn next_session(&mut self, wid: WindowId) -> Result<()> {
        self.windows.get_mut(wid).ok_or(WmError::NoWindow)?.next();
        Ok(())
    }

    pub fn prev_session(&mut self, wid: WindowId) -> Result<()> {
        self.windows.get_mut(wid).ok_or(WmError::NoWindow)?.prev();
        Ok(())
    }

    pub fn set_active_window(&mut self, wid: WindowId) -> Result<()> {
        if self.windows.set_active(wid) {
            Ok(())
        } else {
            Err(WmError::NoWindow)
        }
    }

    pub fn next_window(&mut self) {
        self.windows.next();
    }

    pub fn connect(&mut self, sid: SessionId, request: ConnectRequest) -> Result<()> {
        let connector = self.ssh_connector.clone();
        let session = self.session_or_err(sid)?;
        session.connect(request, connector.as_ref())?;
        Ok(())
    }

    pub fn disconnect(&mut self, sid: SessionId) -> Result<StopOutcome> {
        Ok(self.session_or_err(sid)?.disconnect())
    }

    pub fn write_input(&mut self, sid: SessionId, bytes: &[u8]) -> Result<()> {
        let actions = self.session_or_err(sid)?.write_input(bytes);
        self.pending
            .extend(actions.into_iter().map(|action| (sid, action)));
        Ok(())
    }

    /// Resize a window and every session in it
    pub fn resize(&mut self, wid: WindowId, cols: u16, rows: u16) -> Result<()> {
        let window = self.windows.get_mut(wid).ok_or(WmError::NoWindow)?;
        window.grid = GridSize::new(cols, rows);
        let grid = window.grid;
        let members = window.sessions().to_vec();
        for sid in members {
            if let Some(session) = self.sessions.get_mut(sid) {
                session.resize(grid.cols, grid.rows);
            }
        }
        Ok(())
    }

    pub fn read_cell(&self, sid: SessionId, row: u16, col: u16) -> CellView {
        match self.sessions.get(sid) {
            Some(session) => session.read_cell(row, col),
            None => CellView::Blank,
        }
    }

    pub fn scroll_up(&mut self, sid: SessionId) -> Result<()> {
        self.session_or_err(sid)?.scroll_up();
        Ok(())
    }

    pub fn scroll_down(&mut self, sid: SessionId) -> Result<()> {
        self.session_or_err(sid)?.scroll_down();
        Ok(())
    }

    pub fn scroll_up_line(&mut self, sid: SessionId) -> Result<()> {
        self.session_or_err(sid)?.scroll_up_line();
        Ok(())
    }

    pub fn scroll_down_line(&mut self, sid: SessionId) -> Result<()> {
        self.session_or_err(sid)?.scroll_down_line();
        Ok(())
    }

    pub fn scroll_reset(&mut self, sid: SessionId) -> Result<()> {
        self.session_or_err(sid)?.scroll_reset();
        Ok(())
    }

    /// Move worker output to screens, reap drained slots and run queued
    /// shell actions. Returns true if anything changed.
    pub fn pump(&mut self) -> bool {
        let mut changed = false;
        for (_, session) in self.sessions.iter_mut() {
            changed |= session.process_output();
        }
        self.sessions.reap();

        let pending = std::mem::take(&mut self.pending);
        for (sid, action) in pending {
            changed = true;
            self.apply_action(sid, action);
        }
        changed
    }

    fn apply_action(&mut self, sid: SessionId, action: ShellAction) {
        debug!("{:?}: {:?}", sid, action);
        let Some(wid) = self.windows.find(sid) else {
            return;
        };

        let request = match action {
            ShellAction::Telnet { host, port } => ConnectRequest::Telnet { host, port },
            ShellAction::Ssh { user, host, port } => ConnectRequest::Ssh { user, host, port },
            ShellAction::Netcat { host, port } => {
                if let Err(e) = self.connect(sid, ConnectRequest::Raw { host, port }) {
                    warn!("{:?}: nc: {}", sid, e);
                    if let Some(session) = self.sessions.get_mut(sid) {
                        let prompt = format!("nc: {}\r\n", e);
                        session.print_status(&prompt);
                    }
                }
                return;
            }
            ShellAction::Exit => {
                self.exit_from(sid, wid);
                return;
            }
        };

        if let Err(e) = self.new_remote_session(wid, request) {
            warn!("{:?}: {}", sid, e);
            if let Some(session) = self.sessions.get_mut(sid) {
                session.print_status(&format!("\r\n{}\r\n", e));
            }
        }
    }

    /// `exit` in a shell: close the tab, else the window, else the program
    fn exit_from(&mut self, sid: SessionId, wid: WindowId) {
        let tabs = self.windows.get(wid).map_or(0, |w| w.sessions().len());
        let result = if tabs > 1 {
            self.close_session(sid)
        } else if self.windows.len() > 1 {
            self.close_window(wid)
        } else {
            self.exit_requested = true;
            Ok(())
        };
        if let Err(e) = result {
            warn!("exit: {}", e);
        }
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let active = self.active_session();
        self.sessions
            .iter()
            .map(|(id, session)| SessionInfo {
                id,
                window: self.windows.find(id),
                kind: session.kind(),
                label: session.label().to_string(),
                title: session.title().to_string(),
                state: session.lifecycle_state(),
                active: Some(id) == active,
            })
            .collect()
    }

    pub fn windows(&self) -> Vec<WindowInfo> {
        let active = self.windows.active();
        self.windows
            .iter()
            .map(|w| WindowInfo {
                id: w.id,
                sessions: w.sessions().to_vec(),
                active_idx: w.active_idx(),
                grid: w.grid,
                active: Some(w.id) == active,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telnet::{cmd, naws_frame, opt};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn manager() -> WindowManager {
        let options = SessionOptions {
            connect_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(2),
            ..SessionOptions::default()
        };
        WindowManager::new(options, GridSize::new(80, 24))
    }

    fn pump_until(wm: &mut WindowManager, pred: impl Fn(&WindowManager) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            wm.pump();
            if pred(wm) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn hold_open_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 256];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        });
        port
    }

    /// Telnet server that asks for NAWS and forwards every later byte
    fn naws_server() -> (u16, mpsc::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(&[cmd::IAC, cmd::DO, opt::NAWS]).unwrap();
            let mut initial = [0u8; 12];
            stream.read_exact(&mut initial).unwrap();
            tx.send(initial.to_vec()).unwrap();
            let mut buf = [0u8; 64];
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 || tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        });
        (port, rx)
    }

    #[test]
    fn test_new_window_has_shell() {
        let mut wm = manager();
        let wid = wm.new_window().unwrap();
        let windows = wm.windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].sessions.len(), 1);
        assert!(windows[0].active);

        let sid = wm.active_session().unwrap();
        let info = &wm.sessions()[0];
        assert_eq!(info.id, sid);
        assert_eq!(info.window, Some(wid));
        assert_eq!(info.kind, SessionKind::LocalShell);
        assert_eq!(info.label, "shell");
        match wm.read_cell(sid, 0, 0) {
            CellView::Live(cell) => assert_eq!(cell.ch, 'S'),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_exit_closes_tab_then_requests_exit() {
        let mut wm = manager();
        let wid = wm.new_window().unwrap();
        let first = wm.active_session().unwrap();
        let second = wm.new_session(wid).unwrap();
        assert_eq!(wm.active_session(), Some(second));

        wm.write_input(second, b"exit\r").unwrap();
        wm.pump();
        assert!(wm.session(second).is_none());
        assert_eq!(wm.active_session(), Some(first));
        assert_eq!(wm.read_cell(second, 0, 0), CellView::Blank);

        wm.write_input(first, b"exit\r").unwrap();
        wm.pump();
        assert!(wm.exit_requested());
        assert_eq!(wm.windows().len(), 1);
    }

    #[test]
    fn test_exit_closes_window_when_others_remain() {
        let mut wm = manager();
        let a = wm.new_window().unwrap();
        let b = wm.new_window().unwrap();
        let sid = wm.active_session().unwrap();
        wm.write_input(sid, &[0x04]).unwrap();
        wm.pump();
        assert!(!wm.exit_requested());
        let windows = wm.windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].id, a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_close_last_session_closes_window() {
        let mut wm = manager();
        wm.new_window().unwrap();
        let sid = wm.active_session().unwrap();
        wm.close_session(sid).unwrap();
        assert!(wm.windows().is_empty());
        assert!(wm.exit_requested());
        assert!(matches!(wm.close_session(sid), Err(WmError::NoSession)));
    }

    #[test]
    fn test_telnet_command_opens_tab() {
        let port = hold_open_server();
        let mut wm = manager();
        let wid = wm.new_window().unwrap();
        let shell = wm.active_session().unwrap();

        wm.write_input(shell, format!("telnet 127.0.0.1 {}\r", port).as_bytes())
            .unwrap();
        wm.pump();

        let window = &wm.windows()[0];
        assert_eq!(window.id, wid);
        assert_eq!(window.sessions.len(), 2);
        let remote = wm.active_session().unwrap();
        assert_ne!(remote, shell);
        assert!(pump_until(&mut wm, |wm| {
            wm.session(remote).map(|s| s.lifecycle_state()) == Some(LifecycleState::Open)
        }));
        let info = wm.sessions().into_iter().find(|s| s.id == remote).unwrap();
        assert_eq!(info.label, "telnet 127.0.0.1");
        assert_eq!(info.kind, SessionKind::Telnet);

        assert_eq!(wm.disconnect(remote).unwrap(), StopOutcome::Stopped);
        wm.close_session(remote).unwrap();
        assert_eq!(wm.windows()[0].sessions, vec![shell]);
    }

    #[test]
    fn test_resize_sends_one_naws_per_telnet_session() {
        let mut wm = manager();
        let wid = wm.new_window().unwrap();
        let (port_a, rx_a) = naws_server();
        let (port_b, rx_b) = naws_server();
        let a = wm
            .new_remote_session(
                wid,
                ConnectRequest::Telnet {
                    host: "127.0.0.1".into(),
                    port: port_a,
                },
            )
            .unwrap();
        let b = wm
            .new_remote_session(
                wid,
                ConnectRequest::Telnet {
                    host: "127.0.0.1".into(),
                    port: port_b,
                },
            )
            .unwrap();

        let mut expected_initial = vec![cmd::IAC, cmd::WILL, opt::NAWS];
        expected_initial.extend(naws_frame(80, 24));
        for rx in [&rx_a, &rx_b] {
            let deadline = Instant::now() + Duration::from_secs(5);
            let initial = loop {
                wm.pump();
                if let Ok(bytes) = rx.try_recv() {
                    break bytes;
                }
                assert!(Instant::now() < deadline, "no NAWS reply");
                thread::sleep(Duration::from_millis(5));
            };
            assert_eq!(initial, expected_initial);
        }

        wm.resize(wid, 100, 30).unwrap();
        for (sid, rx) in [(a, &rx_a), (b, &rx_b)] {
            assert_eq!(wm.session(sid).unwrap().size(), (100, 30));
            let mut got = Vec::new();
            let deadline = Instant::now() + Duration::from_secs(5);
            while got.len() < 9 && Instant::now() < deadline {
                if let Ok(bytes) = rx.recv_timeout(Duration::from_millis(20)) {
                    got.extend(bytes);
                }
            }
            assert_eq!(got, naws_frame(100, 30));
        }
        thread::sleep(Duration::from_millis(100));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        let shell = wm.windows()[0].sessions[0];
        assert_eq!(wm.session(shell).unwrap().size(), (100, 30));
    }

    #[test]
    fn test_ssh_without_connector_stays_done() {
        let mut wm = manager();
        let wid = wm.new_window().unwrap();
        let sid = wm
            .new_remote_session(
                wid,
                ConnectRequest::Ssh {
                    user: Some("bob".into()),
                    host: "example.org".into(),
                    port: 22,
                },
            )
            .unwrap();
        assert_eq!(
            wm.session(sid).unwrap().lifecycle_state(),
            LifecycleState::Done
        );
    }

    #[test]
    fn test_window_and_session_selection() {
        let mut wm = manager();
        let a = wm.new_window().unwrap();
        wm.new_session(a).unwrap();
        let b = wm.new_window().unwrap();
        assert_eq!(wm.active_window(), Some(b));

        wm.next_window();
        assert_eq!(wm.active_window(), Some(a));
        wm.switch_session(a, 0).unwrap();
        assert_eq!(wm.windows()[0].active_idx, 0);
        wm.prev_session(a).unwrap();
        assert_eq!(wm.windows()[0].active_idx, 1);
        wm.next_session(a).unwrap();
        assert_eq!(wm.windows()[0].active_idx, 0);
        assert!(wm.switch_session(a, 5).is_err());
        assert!(wm.set_active_window(99).is_err());

        wm.close_window(a).unwrap();
        assert_eq!(wm.active_window(), Some(b));
        assert_eq!(wm.sessions().len(), 1);
    }
}
