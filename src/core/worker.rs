//! Session drivers
//!
//! Protocol halves run on the session worker: [`TelnetDriver`] covers both
//! Telnet and raw TCP (`nc`), and [`SshDriver`] runs an [`SshBackend`] over a
//! TCP transport.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::lifecycle::{DriverError, Poll, SessionDriver, WorkerContext};
use super::ssh::{
    ChannelRead, HostKeyStore, HostKeyVerdict, SshBackend, SshCredentials,
};
use super::telnet::{encode_input_into, CrlfNormalizer, ReplySink, TelnetNegotiator};
use super::transport::{
    send_all, CancelToken, ConnectError, RecvStatus, TcpTransport, Transport, TransportError,
};

/// Remote endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpTarget {
    pub host: String,
    pub port: u16,
}

impl TcpTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// How a TCP session treats the byte stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpMode {
    Telnet,
    Raw,
}

fn connect_tcp(
    ctx: &mut WorkerContext<'_>,
    target: &TcpTarget,
    timeout: Duration,
) -> Result<Box<dyn Transport>, DriverError> {
    ctx.status(format!("Connecting to \"{}:{}\"... ", target.host, target.port));
    match TcpTransport::connect(&target.host, target.port, timeout, ctx.cancel_token()) {
        Ok(transport) => {
            ctx.status("done.\r\n");
            info!("connected to {}:{}", target.host, target.port);
            Ok(Box::new(transport))
        }
        Err(ConnectError::Cancelled) => {
            ctx.cancelled_status(format!("{}\r\n", ConnectError::Cancelled));
            debug!("connect to {}:{} cancelled", target.host, target.port);
            Err(ConnectError::Cancelled.into())
        }
        Err(e) => {
            ctx.status(format!("{}\r\n", e));
            warn!("connect to {}:{}: {}", target.host, target.port, e);
            Err(e.into())
        }
    }
}

/// Status line for a transport failure on an open session
fn report_transport_error(ctx: &WorkerContext<'_>, err: &TransportError) {
    match err {
        TransportError::PeerReset => ctx.status("\r\nConnection reset by peer.\r\n"),
        _ => ctx.status("\r\nConnection reset.\r\n"),
    }
}

/// Writes negotiation replies straight to the transport
struct TransportSink<'a> {
    transport: &'a mut dyn Transport,
    cancel: &'a CancelToken,
    failed: bool,
}

impl ReplySink for TransportSink<'_> {
    fn send_reply(&mut self, bytes: &[u8]) {
        if self.failed {
            return;
        }
        match send_all(self.transport, bytes, self.cancel) {
            Ok(true) => {}
            Ok(false) => self.failed = true,
            Err(e) => {
                debug!("telnet reply failed: {}", e);
                self.failed = true;
            }
        }
    }
}

/// Telnet or raw TCP session
pub struct TelnetDriver {
    target: TcpTarget,
    mode: TcpMode,
    timeout: Duration,
    negotiator: TelnetNegotiator,
    crlf: CrlfNormalizer,
    transport: Option<Box<dyn Transport>>,
}

impl TelnetDriver {
    pub fn new(
        target: TcpTarget,
        mode: TcpMode,
        terminal_type: &str,
        cols: u16,
        rows: u16,
        timeout: Duration,
    ) -> Self {
        Self {
            target,
            mode,
            timeout,
            negotiator: TelnetNegotiator::new(terminal_type, cols, rows),
            crlf: CrlfNormalizer::new(),
            transport: None,
        }
    }

    fn send_failed(ctx: &WorkerContext<'_>) -> DriverError {
        ctx.status("\r\nTCP send error, closing.\r\n");
        DriverError::Rejected("send failed".into())
    }
}

impl SessionDriver for TelnetDriver {
    fn label(&self) -> String {
        match self.mode {
            TcpMode::Telnet => format!("telnet {}", self.target.host),
            TcpMode::Raw => format!("nc {}", self.target.host),
        }
    }

    fn connect(&mut self, ctx: &mut WorkerContext<'_>) -> Result<(), DriverError> {
        self.negotiator.reset();
        self.crlf.reset();
        self.transport = Some(connect_tcp(ctx, &self.target, self.timeout)?);
        Ok(())
    }

    fn poll(&mut self, ctx: &mut WorkerContext<'_>) -> Result<Poll, DriverError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(Poll::Eof);
        };

        let n = match transport.receive(ctx.recv_buf()) {
            Ok(RecvStatus::Data(n)) => n,
            Ok(RecvStatus::NoData) => return Ok(Poll::Idle),
            Ok(RecvStatus::Closed) => {
                ctx.status("\r\nConnection closed by peer.\r\n");
                return Ok(Poll::Eof);
            }
            Err(e) => {
                report_transport_error(ctx, &e);
                return Err(e.into());
            }
        };

        let data = ctx.recv_buf()[..n].to_vec();
        let clean = match self.mode {
            TcpMode::Telnet => {
                let mut sink = TransportSink {
                    transport: transport.as_mut(),
                    cancel: ctx.cancel_token(),
                    failed: false,
                };
                let clean = self.negotiator.process(&data, &mut sink);
                if sink.failed {
                    return Err(Self::send_failed(ctx));
                }
                clean
            }
            TcpMode::Raw => self.crlf.normalize(&data),
        };

        if !clean.is_empty() {
            ctx.output(clean);
        }
        Ok(Poll::Busy)
    }

    fn send(&mut self, ctx: &mut WorkerContext<'_>, bytes: &[u8]) -> Result<(), DriverError> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(Self::send_failed(ctx));
        };

        let mut staged = std::mem::take(ctx.send_buf());
        staged.clear();
        match self.mode {
            TcpMode::Telnet => encode_input_into(bytes, &mut staged),
            TcpMode::Raw => staged.extend_from_slice(bytes),
        }
        let result = send_all(transport.as_mut(), &staged, ctx.cancel_token());
        *ctx.send_buf() = staged;

        match result {
            Ok(true) => Ok(()),
            Ok(false) if ctx.exit_requested() => Ok(()),
            Ok(false) => Err(Self::send_failed(ctx)),
            Err(e) => {
                debug!("telnet send: {}", e);
                Err(Self::send_failed(ctx))
            }
        }
    }

    fn resize(&mut self, ctx: &mut WorkerContext<'_>, cols: u16, rows: u16) -> Result<(), DriverError> {
        if self.mode == TcpMode::Raw {
            return Ok(());
        }
        let Some(transport) = self.transport.as_mut() else {
            self.negotiator.set_grid(cols, rows);
            return Ok(());
        };
        let mut sink = TransportSink {
            transport: transport.as_mut(),
            cancel: ctx.cancel_token(),
            failed: false,
        };
        if self.negotiator.send_naws(cols, rows, &mut sink) {
            debug!("telnet: NAWS {}x{}", cols, rows);
        }
        if sink.failed {
            return Err(Self::send_failed(ctx));
        }
        Ok(())
    }

    fn close(&mut self, _ctx: &mut WorkerContext<'_>, orderly: bool) {
        if let Some(mut transport) = self.transport.take() {
            transport.close(orderly);
        }
    }
}

/// SSH session settings
#[derive(Clone, Debug)]
pub struct SshSettings {
    pub target: TcpTarget,
    pub credentials: SshCredentials,
    pub terminal_type: String,
    pub cols: u16,
    pub rows: u16,
    pub timeout: Duration,
    pub accept_new_host_keys: bool,
}

/// SSH session over the pluggable backend
pub struct SshDriver {
    settings: SshSettings,
    backend: Box<dyn SshBackend>,
    host_keys: Box<dyn HostKeyStore>,
    transport: Option<Box<dyn Transport>>,
}

impl SshDriver {
    pub fn new(
        settings: SshSettings,
        backend: Box<dyn SshBackend>,
        host_keys: Box<dyn HostKeyStore>,
    ) -> Self {
        Self {
            settings,
            backend,
            host_keys,
            transport: None,
        }
    }

    fn verify_host_key(&mut self, ctx: &mut WorkerContext<'_>, transport: &mut dyn Transport) -> Result<(), DriverError> {
        ctx.status("Beginning SSH session handshake... ");
        let key = match self.backend.handshake(transport) {
            Ok(key) => key,
            Err(e) => {
                ctx.status("failed!\r\n");
                return Err(e.into());
            }
        };
        ctx.status("done.\r\n");

        let host = self.settings.target.host.as_str();
        match self.host_keys.check(host, &key) {
            HostKeyVerdict::Known => Ok(()),
            HostKeyVerdict::Unknown => {
                ctx.status("No matching host found.\r\n");
                if !self.settings.accept_new_host_keys {
                    ctx.status("Rejected server public key!\r\n");
                    return Err(DriverError::Rejected("unknown host key".into()));
                }
                ctx.status("Saving host and key... ");
                match self.host_keys.add(host, &key) {
                    Ok(()) => ctx.status("done.\r\n"),
                    Err(e) => {
                        warn!("could not save host key for {}: {}", host, e);
                        ctx.status("failed.\r\n");
                    }
                }
                Ok(())
            }
            HostKeyVerdict::Mismatch => {
                ctx.status("WARNING! Host found in known hosts but key doesn't match!\r\n");
                ctx.status("Rejected server public key!\r\n");
                Err(DriverError::Rejected("host key mismatch".into()))
            }
        }
    }
}

impl SessionDriver for SshDriver {
    fn label(&self) -> String {
        format!("ssh {}", self.settings.target.host)
    }

    fn connect(&mut self, ctx: &mut WorkerContext<'_>) -> Result<(), DriverError> {
        let mut transport = connect_tcp(ctx, &self.settings.target, self.settings.timeout)?;
        let result = self.open_channel(ctx, transport.as_mut());
        self.transport = Some(transport);
        result
    }

    fn poll(&mut self, ctx: &mut WorkerContext<'_>) -> Result<Poll, DriverError> {
        let Some(transport) = self.transport.as_deref_mut() else {
            return Ok(Poll::Eof);
        };
        match self.backend.read(transport, ctx.recv_buf()) {
            Ok(ChannelRead::Data(n)) => {
                let data = ctx.recv_buf()[..n].to_vec();
                ctx.output(data);
                Ok(Poll::Busy)
            }
            Ok(ChannelRead::NoData) => Ok(Poll::Idle),
            Ok(ChannelRead::Eof) => {
                ctx.status("\r\n(disconnected by server)\r\n");
                Ok(Poll::Eof)
            }
            Err(e) => {
                ctx.status(format!("\r\nchannel read error: {}\r\n", e));
                Err(e.into())
            }
        }
    }

    fn send(&mut self, ctx: &mut WorkerContext<'_>, bytes: &[u8]) -> Result<(), DriverError> {
        let Some(transport) = self.transport.as_deref_mut() else {
            return Err(DriverError::Rejected("not connected".into()));
        };
        let mut written = 0;
        while written < bytes.len() {
            if ctx.exit_requested() {
                return Ok(());
            }
            match self.backend.write(transport, &bytes[written..]) {
                Ok(n) => written += n,
                Err(e) => {
                    ctx.status("\r\nFailed to write to channel, closing connection.\r\n");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn resize(&mut self, _ctx: &mut WorkerContext<'_>, cols: u16, rows: u16) -> Result<(), DriverError> {
        self.settings.cols = cols;
        self.settings.rows = rows;
        if let Some(transport) = self.transport.as_deref_mut() {
            self.backend.resize(transport, cols, rows)?;
        }
        Ok(())
    }

    fn close(&mut self, _ctx: &mut WorkerContext<'_>, orderly: bool) {
        if let Some(mut transport) = self.transport.take() {
            self.backend.disconnect(transport.as_mut());
            transport.close(orderly);
        }
    }
}

impl SshDriver {
    fn open_channel(&mut self, ctx: &mut WorkerContext<'_>, transport: &mut dyn Transport) -> Result<(), DriverError> {
        self.verify_host_key(ctx, transport)?;

        ctx.status("Authenticating... ");
        if let Err(e) = self.backend.authenticate(transport, &self.settings.credentials) {
            ctx.status("failed!\r\n");
            return Err(e.into());
        }
        ctx.status("done.\r\n");

        let SshSettings {
            terminal_type,
            cols,
            rows,
            ..
        } = &self.settings;
        if let Err(e) = self.backend.open_shell(transport, terminal_type, *cols, *rows) {
            ctx.status("Failed to open channel.\r\n");
            return Err(e.into());
        }
        Ok(())
    }
}
