//! Session worker lifecycle
//!
//! Each networked session runs one worker thread. The owner writes the
//! [`Command`] flag and the worker writes the [`LifecycleState`] flag:
//!
//! ```text
//! Uninitialized -> Waiting -> Open -> Cleanup -> Done
//!                     \______________________/
//!                      connect failure or Exit
//! ```
//!
//! The I/O buffers move into the worker when it is spawned and come back
//! over a channel just before it sets `Done`. An owner that gives up waiting
//! never touches them; they are reclaimed by [`WorkerLink::reap`] once the
//! worker actually finishes.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::ssh::SshError;
use super::transport::{CancelToken, ConnectError, TransportError};

const GATE_PAUSE: Duration = Duration::from_millis(1);
const STOP_POLL: Duration = Duration::from_millis(5);

/// Owner-to-worker instruction
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Wait = 0,
    Read = 1,
    Exit = 2,
}

impl Command {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Command::Wait,
            1 => Command::Read,
            _ => Command::Exit,
        }
    }
}

/// Worker-reported state
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized = 0,
    Waiting = 1,
    Open = 2,
    Cleanup = 3,
    Done = 4,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Waiting,
            2 => LifecycleState::Open,
            3 => LifecycleState::Cleanup,
            _ => LifecycleState::Done,
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("session is still running")]
    Busy,
    #[error("Failed to allocate buffers.")]
    Allocation,
    #[error("Failed to create read thread.")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Failure inside a session driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error("{0}")]
    Rejected(String),
}

/// The two flags shared between owner and worker
#[derive(Debug)]
pub struct SessionControl {
    command: AtomicU8,
    state: AtomicU8,
    cancel: CancelToken,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionControl {
    pub fn new() -> Self {
        Self {
            command: AtomicU8::new(Command::Wait as u8),
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
            cancel: CancelToken::new(),
        }
    }

    pub fn command(&self) -> Command {
        Command::from_u8(self.command.load(Ordering::SeqCst))
    }

    pub fn set_command(&self, command: Command) {
        self.command.store(command as u8, Ordering::SeqCst);
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Ask the worker to stop and unblock any in-flight connect
    pub fn request_exit(&self) {
        self.set_command(Command::Exit);
        self.cancel.cancel();
    }

    pub fn exit_requested(&self) -> bool {
        self.command() == Command::Exit
    }
}

/// Per-session I/O buffers
#[derive(Debug)]
pub struct SessionBuffers {
    pub recv: Vec<u8>,
    pub send: Vec<u8>,
}

impl SessionBuffers {
    /// Allocate without aborting on exhaustion
    pub fn allocate(size: usize) -> Result<Self> {
        let mut recv = Vec::new();
        recv.try_reserve_exact(size)
            .map_err(|_| LifecycleError::Allocation)?;
        recv.resize(size, 0);

        let mut send = Vec::new();
        send.try_reserve_exact(size)
            .map_err(|_| LifecycleError::Allocation)?;

        Ok(Self { recv, send })
    }
}

/// Owner-to-worker traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Input(Vec<u8>),
    Resize { cols: u16, rows: u16 },
}

/// Worker-to-owner traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Data for the screen model
    Output(Vec<u8>),
    /// Status text for the screen model
    Status(String),
    Opened,
    Finished,
}

/// What a driver sees of its worker
pub struct WorkerContext<'a> {
    control: &'a SessionControl,
    events: &'a Sender<WorkerEvent>,
    buffers: &'a mut SessionBuffers,
}

impl<'a> WorkerContext<'a> {
    pub fn new(
        control: &'a SessionControl,
        events: &'a Sender<WorkerEvent>,
        buffers: &'a mut SessionBuffers,
    ) -> Self {
        Self {
            control,
            events,
            buffers,
        }
    }

    /// Print a status line unless the owner already asked us to exit
    pub fn status(&self, text: impl Into<String>) {
        if !self.control.exit_requested() {
            let _ = self.events.send(WorkerEvent::Status(text.into()));
        }
    }

    /// Print the last status line of a connect the owner cancelled
    pub fn cancelled_status(&self, text: impl Into<String>) {
        let _ = self.events.send(WorkerEvent::Status(text.into()));
    }

    pub fn output(&self, bytes: Vec<u8>) {
        let _ = self.events.send(WorkerEvent::Output(bytes));
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.control.cancel_token()
    }

    pub fn exit_requested(&self) -> bool {
        self.control.exit_requested()
    }

    pub fn recv_buf(&mut self) -> &mut [u8] {
        &mut self.buffers.recv
    }

    pub fn send_buf(&mut self) -> &mut Vec<u8> {
        &mut self.buffers.send
    }
}

/// Result of one driver poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Data moved; poll again right away
    Busy,
    /// Nothing to do; back off
    Idle,
    /// Remote end finished
    Eof,
}

/// Protocol-specific half of a session worker
pub trait SessionDriver: Send {
    /// Tab label
    fn label(&self) -> String;
    fn connect(&mut self, ctx: &mut WorkerContext<'_>) -> std::result::Result<(), DriverError>;
    fn poll(&mut self, ctx: &mut WorkerContext<'_>) -> std::result::Result<Poll, DriverError>;
    fn send(&mut self, ctx: &mut WorkerContext<'_>, bytes: &[u8])
        -> std::result::Result<(), DriverError>;
    fn resize(
        &mut self,
        ctx: &mut WorkerContext<'_>,
        cols: u16,
        rows: u16,
    ) -> std::result::Result<(), DriverError>;
    fn close(&mut self, ctx: &mut WorkerContext<'_>, orderly: bool);
}

/// Worker tuning
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub buffer_size: usize,
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Outcome of [`WorkerLink::request_stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Worker was already done
    NotRunning,
    /// Worker reached `Done` within the timeout
    Stopped,
    /// Worker is still running; its buffers stay with it
    Abandoned,
}

/// Owner-side handle to one worker
pub struct WorkerLink {
    label: String,
    control: Arc<SessionControl>,
    outbound: Sender<Outbound>,
    events: Receiver<WorkerEvent>,
    handback: Receiver<SessionBuffers>,
    handle: Option<JoinHandle<()>>,
    reclaimed: bool,
}

impl WorkerLink {
    /// Allocate buffers and spawn a worker for `driver`
    pub fn spawn(driver: Box<dyn SessionDriver>, options: WorkerOptions) -> Result<Self> {
        let buffers = SessionBuffers::allocate(options.buffer_size)?;
        let label = driver.label();

        let control = Arc::new(SessionControl::new());
        control.set_command(Command::Wait);
        control.set_state(LifecycleState::Waiting);

        let (outbound_tx, outbound_rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        let (handback_tx, handback_rx) = mpsc::channel();

        let worker_control = control.clone();
        let poll_interval = options.poll_interval;
        let handle = thread::Builder::new()
            .name(format!("session {}", label))
            .spawn(move || {
                run_worker(
                    driver,
                    &worker_control,
                    buffers,
                    outbound_rx,
                    events_tx,
                    handback_tx,
                    poll_interval,
                )
            })
            .map_err(LifecycleError::Spawn)?;

        control.set_command(Command::Read);
        info!("{}: worker started", label);

        Ok(Self {
            label,
            control,
            outbound: outbound_tx,
            events: events_rx,
            handback: handback_rx,
            handle: Some(handle),
            reclaimed: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> LifecycleState {
        self.control.state()
    }

    pub fn command(&self) -> Command {
        self.control.command()
    }

    pub fn is_done(&self) -> bool {
        self.state() == LifecycleState::Done
    }

    /// Whether the buffers came back and were freed
    pub fn buffers_reclaimed(&self) -> bool {
        self.reclaimed
    }

    /// Queue outbound traffic; false once the worker is gone
    pub fn send(&self, msg: Outbound) -> bool {
        self.outbound.send(msg).is_ok()
    }

    /// Take everything the worker produced so far, in order
    pub fn drain_events(&self) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    /// Signal Exit, then wait up to `timeout` for the worker to finish
    pub fn request_stop(&mut self, timeout: Duration) -> StopOutcome {
        if self.is_done() {
            self.reap();
            return StopOutcome::NotRunning;
        }
        self.signal_stop();
        self.wait_until(Instant::now() + timeout)
    }

    /// Set Exit and cancel in-flight transport calls without waiting
    pub fn signal_stop(&self) {
        if !self.is_done() {
            self.control.request_exit();
        }
    }

    /// Wait for a signalled worker until `deadline`. Callers stopping
    /// several workers signal them all first and share one deadline.
    pub fn wait_until(&mut self, deadline: Instant) -> StopOutcome {
        loop {
            if self.is_done() {
                self.reap();
                debug!("{}: worker stopped", self.label);
                return StopOutcome::Stopped;
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(STOP_POLL);
        }

        warn!(
            "{}: worker did not stop in time; leaving its buffers until it finishes",
            self.label
        );
        StopOutcome::Abandoned
    }

    /// Reclaim buffers and join the thread once the worker is done
    pub fn reap(&mut self) -> bool {
        if !self.is_done() {
            return false;
        }
        if let Ok(buffers) = self.handback.try_recv() {
            drop(buffers);
            self.reclaimed = true;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        true
    }
}

impl Drop for WorkerLink {
    fn drop(&mut self) {
        if !self.is_done() {
            self.control.request_exit();
        }
    }
}

/// A session's lifecycle slot: at most one worker, reusable only once done
#[derive(Default)]
pub struct SessionLifecycle {
    link: Option<WorkerLink>,
    failed: bool,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        match &self.link {
            Some(link) => link.state(),
            None if self.failed => LifecycleState::Done,
            None => LifecycleState::Uninitialized,
        }
    }

    /// Start a worker; rejected while a previous one has not reached `Done`
    pub fn start(&mut self, driver: Box<dyn SessionDriver>, options: WorkerOptions) -> Result<()> {
        if let Some(link) = self.link.as_mut() {
            if !link.reap() {
                return Err(LifecycleError::Busy);
            }
        }
        self.link = None;

        match WorkerLink::spawn(driver, options) {
            Ok(link) => {
                self.failed = false;
                self.link = Some(link);
                Ok(())
            }
            Err(e) => {
                warn!("failed to start worker: {}", e);
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Record a start that failed before any worker existed
    pub fn mark_failed(&mut self) {
        if self.link.is_none() {
            self.failed = true;
        }
    }

    pub fn request_stop(&mut self, timeout: Duration) -> StopOutcome {
        match self.link.as_mut() {
            Some(link) => link.request_stop(timeout),
            None => StopOutcome::NotRunning,
        }
    }

    pub fn signal_stop(&self) {
        if let Some(link) = &self.link {
            link.signal_stop();
        }
    }

    pub fn wait_until(&mut self, deadline: Instant) -> StopOutcome {
        match self.link.as_mut() {
            Some(link) => link.wait_until(deadline),
            None => StopOutcome::NotRunning,
        }
    }

    pub fn link(&self) -> Option<&WorkerLink> {
        self.link.as_ref()
    }

    pub fn link_mut(&mut self) -> Option<&mut WorkerLink> {
        self.link.as_mut()
    }

    /// Hand the worker link over (to park an abandoned worker)
    pub fn take_link(&mut self) -> Option<WorkerLink> {
        if self.link.is_some() {
            self.failed = true;
        }
        self.link.take()
    }

    pub fn send(&self, msg: Outbound) -> bool {
        match &self.link {
            Some(link) if link.state() == LifecycleState::Open => link.send(msg),
            _ => false,
        }
    }

    pub fn drain_events(&self) -> Vec<WorkerEvent> {
        self.link.as_ref().map(WorkerLink::drain_events).unwrap_or_default()
    }
}

fn run_worker(
    mut driver: Box<dyn SessionDriver>,
    control: &SessionControl,
    mut buffers: SessionBuffers,
    outbound: Receiver<Outbound>,
    events: Sender<WorkerEvent>,
    handback: Sender<SessionBuffers>,
    poll_interval: Duration,
) {
    let label = driver.label();

    while control.command() == Command::Wait {
        thread::sleep(GATE_PAUSE);
    }

    if control.exit_requested() {
        debug!("{}: exit before connect", label);
        finish(control, buffers, &events, &handback);
        return;
    }

    {
        let mut ctx = WorkerContext::new(control, &events, &mut buffers);

        if let Err(e) = driver.connect(&mut ctx) {
            info!("{}: connect failed: {}", label, e);
            driver.close(&mut ctx, false);
            drop(ctx);
            finish(control, buffers, &events, &handback);
            return;
        }

        if ctx.exit_requested() {
            debug!("{}: exit right after connect", label);
            control.set_state(LifecycleState::Cleanup);
            driver.close(&mut ctx, true);
            drop(ctx);
            finish(control, buffers, &events, &handback);
            return;
        }

        control.set_state(LifecycleState::Open);
        let _ = events.send(WorkerEvent::Opened);
        info!("{}: open", label);

        'session: while control.command() == Command::Read
            && control.state() == LifecycleState::Open
        {
            loop {
                let result = match outbound.try_recv() {
                    Ok(Outbound::Input(bytes)) => driver.send(&mut ctx, &bytes),
                    Ok(Outbound::Resize { cols, rows }) => driver.resize(&mut ctx, cols, rows),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        debug!("{}: owner went away", label);
                        break 'session;
                    }
                };
                if let Err(e) = result {
                    info!("{}: send failed: {}", label, e);
                    break 'session;
                }
            }

            match driver.poll(&mut ctx) {
                Ok(Poll::Busy) => thread::yield_now(),
                Ok(Poll::Idle) => thread::sleep(poll_interval),
                Ok(Poll::Eof) => {
                    info!("{}: remote closed", label);
                    break;
                }
                Err(e) => {
                    info!("{}: {}", label, e);
                    break;
                }
            }
        }

        control.set_state(LifecycleState::Cleanup);
        driver.close(&mut ctx, true);
    }

    finish(control, buffers, &events, &handback);
}

fn finish(
    control: &SessionControl,
    buffers: SessionBuffers,
    events: &Sender<WorkerEvent>,
    handback: &Sender<SessionBuffers>,
) {
    let _ = handback.send(buffers);
    control.set_state(LifecycleState::Done);
    let _ = events.send(WorkerEvent::Finished);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct StubDriver {
        connect_delay: Duration,
        fail_connect: bool,
        eof_after_polls: Option<usize>,
        polls: usize,
        sent: Arc<Mutex<Vec<u8>>>,
        resized: Arc<Mutex<Vec<(u16, u16)>>>,
        closed: Arc<AtomicBool>,
        entered: Arc<AtomicBool>,
    }

    impl SessionDriver for StubDriver {
        fn label(&self) -> String {
            "stub".into()
        }

        fn connect(&mut self, ctx: &mut WorkerContext<'_>) -> std::result::Result<(), DriverError> {
            ctx.status("Connecting... ");
            self.entered.store(true, Ordering::SeqCst);
            // Ignores the cancel token
            thread::sleep(self.connect_delay);
            if self.fail_connect {
                ctx.status("connection refused.\r\n");
                return Err(ConnectError::Refused.into());
            }
            ctx.status("done.\r\n");
            Ok(())
        }

        fn poll(&mut self, ctx: &mut WorkerContext<'_>) -> std::result::Result<Poll, DriverError> {
            self.polls += 1;
            if Some(self.polls) == self.eof_after_polls {
                ctx.output(b"bye".to_vec());
                return Ok(Poll::Eof);
            }
            Ok(Poll::Idle)
        }

        fn send(
            &mut self,
            _ctx: &mut WorkerContext<'_>,
            bytes: &[u8],
        ) -> std::result::Result<(), DriverError> {
            self.sent.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn resize(
            &mut self,
            _ctx: &mut WorkerContext<'_>,
            cols: u16,
            rows: u16,
        ) -> std::result::Result<(), DriverError> {
            self.resized.lock().unwrap().push((cols, rows));
            Ok(())
        }

        fn close(&mut self, _ctx: &mut WorkerContext<'_>, _orderly: bool) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn options() -> WorkerOptions {
        WorkerOptions {
            buffer_size: 256,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn wait_for(link: &WorkerLink, state: LifecycleState) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if link.state() == state {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_allocation_failure_spawns_nothing() {
        assert!(matches!(
            SessionBuffers::allocate(usize::MAX),
            Err(LifecycleError::Allocation)
        ));

        let mut lifecycle = SessionLifecycle::new();
        let opts = WorkerOptions {
            buffer_size: usize::MAX,
            ..options()
        };
        let err = lifecycle.start(Box::new(StubDriver::default()), opts).err();
        assert!(matches!(err, Some(LifecycleError::Allocation)));
        assert_eq!(lifecycle.state(), LifecycleState::Done);
        assert_eq!(
            LifecycleError::Allocation.to_string(),
            "Failed to allocate buffers."
        );
    }

    #[test]
    fn test_connect_failure_reaches_done() {
        let closed = Arc::new(AtomicBool::new(false));
        let driver = StubDriver {
            fail_connect: true,
            closed: closed.clone(),
            ..Default::default()
        };
        let mut link = WorkerLink::spawn(Box::new(driver), options()).unwrap();
        assert!(wait_for(&link, LifecycleState::Done));

        let events = link.drain_events();
        assert_eq!(
            events,
            vec![
                WorkerEvent::Status("Connecting... ".into()),
                WorkerEvent::Status("connection refused.\r\n".into()),
                WorkerEvent::Finished,
            ]
        );
        assert!(closed.load(Ordering::SeqCst));
        assert!(link.reap());
        assert!(link.buffers_reclaimed());
        assert_eq!(link.request_stop(WAIT), StopOutcome::NotRunning);
    }

    #[test]
    fn test_open_session_forwards_outbound_and_stops() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let resized = Arc::new(Mutex::new(Vec::new()));
        let driver = StubDriver {
            sent: sent.clone(),
            resized: resized.clone(),
            ..Default::default()
        };
        let mut link = WorkerLink::spawn(Box::new(driver), options()).unwrap();
        assert!(wait_for(&link, LifecycleState::Open));
        assert_eq!(link.command(), Command::Read);

        assert!(link.send(Outbound::Input(b"ls\r".to_vec())));
        assert!(link.send(Outbound::Resize { cols: 100, rows: 30 }));
        let deadline = Instant::now() + WAIT;
        while resized.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(sent.lock().unwrap().as_slice(), b"ls\r");
        assert_eq!(resized.lock().unwrap().as_slice(), &[(100, 30)]);

        assert_eq!(link.request_stop(WAIT), StopOutcome::Stopped);
        assert!(link.is_done());
        assert!(link.buffers_reclaimed());
        assert!(link.drain_events().contains(&WorkerEvent::Opened));
    }

    #[test]
    fn test_remote_eof_finishes_worker() {
        let driver = StubDriver {
            eof_after_polls: Some(3),
            ..Default::default()
        };
        let mut link = WorkerLink::spawn(Box::new(driver), options()).unwrap();
        assert!(wait_for(&link, LifecycleState::Done));
        let events = link.drain_events();
        assert!(events.contains(&WorkerEvent::Output(b"bye".to_vec())));
        assert_eq!(events.last(), Some(&WorkerEvent::Finished));
        assert!(link.reap());
    }

    #[test]
    fn test_exit_during_connect_suppresses_status() {
        let driver = StubDriver {
            connect_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let mut link = WorkerLink::spawn(Box::new(driver), options()).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(link.request_stop(WAIT), StopOutcome::Stopped);

        let events = link.drain_events();
        assert!(!events.contains(&WorkerEvent::Status("done.\r\n".into())));
        assert!(!events.contains(&WorkerEvent::Opened));
    }

    #[test]
    fn test_abandoned_worker_blocks_restart() {
        let entered = Arc::new(AtomicBool::new(false));
        let driver = StubDriver {
            connect_delay: Duration::from_millis(400),
            entered: entered.clone(),
            ..Default::default()
        };
        let mut lifecycle = SessionLifecycle::new();
        lifecycle.start(Box::new(driver), options()).unwrap();

        // Stop only once the worker is blocked inside connect
        let deadline = Instant::now() + WAIT;
        while !entered.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(entered.load(Ordering::SeqCst));

        assert_eq!(
            lifecycle.request_stop(Duration::from_millis(50)),
            StopOutcome::Abandoned
        );
        assert_ne!(lifecycle.state(), LifecycleState::Done);
        assert!(!lifecycle.link().map(WorkerLink::buffers_reclaimed).unwrap_or(true));

        let again = lifecycle.start(Box::new(StubDriver::default()), options());
        assert!(matches!(again, Err(LifecycleError::Busy)));

        let deadline = Instant::now() + WAIT;
        while lifecycle.state() != LifecycleState::Done && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(lifecycle.state(), LifecycleState::Done);
        let link = lifecycle.link_mut().unwrap();
        assert!(link.reap());
        assert!(link.buffers_reclaimed());
        assert!(lifecycle.start(Box::new(StubDriver::default()), options()).is_ok());
        assert_eq!(lifecycle.request_stop(WAIT), StopOutcome::Stopped);
    }

    #[test]
    fn test_send_only_while_open() {
        let lifecycle = SessionLifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
        assert!(!lifecycle.send(Outbound::Input(vec![1])));
        assert!(lifecycle.drain_events().is_empty());
    }
}
