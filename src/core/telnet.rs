//! Telnet option negotiation
//!
//! [`TelnetNegotiator`] strips negotiation sequences out of an inbound byte
//! stream and answers them through a [`ReplySink`]. Only data destined for
//! the screen model is returned from [`TelnetNegotiator::process`].

use tracing::{debug, trace};

/// Telnet command bytes
pub mod cmd {
    pub const SE: u8 = 240;
    pub const NOP: u8 = 241;
    pub const DM: u8 = 242;
    pub const BRK: u8 = 243;
    pub const IP: u8 = 244;
    pub const AO: u8 = 245;
    pub const AYT: u8 = 246;
    pub const EC: u8 = 247;
    pub const EL: u8 = 248;
    pub const GA: u8 = 249;
    pub const SB: u8 = 250;
    pub const WILL: u8 = 251;
    pub const WONT: u8 = 252;
    pub const DO: u8 = 253;
    pub const DONT: u8 = 254;
    pub const IAC: u8 = 255;
}

/// Telnet option codes
pub mod opt {
    pub const ECHO: u8 = 1;
    pub const SGA: u8 = 3;
    pub const TTYPE: u8 = 24;
    pub const NAWS: u8 = 31;
}

/// TERMINAL-TYPE sub-negotiation qualifiers
pub const TTYPE_IS: u8 = 0;
pub const TTYPE_SEND: u8 = 1;

/// Sub-negotiation payload bytes kept; the rest are dropped
pub const SB_BUFFER_LEN: usize = 64;
/// Longest terminal-type string sent
pub const TTYPE_MAX_LEN: usize = 56;

use cmd::*;

/// Destination for negotiation replies
pub trait ReplySink {
    fn send_reply(&mut self, bytes: &[u8]);
}

impl ReplySink for Vec<u8> {
    fn send_reply(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Parser state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NegotiationState {
    #[default]
    Data,
    Iac,
    Will,
    Wont,
    Do,
    Dont,
    Sb,
    SbIac,
}

/// Expands a bare LF into CR LF. State survives across calls.
#[derive(Clone, Debug, Default)]
pub struct CrlfNormalizer {
    prev_cr: bool,
}

impl CrlfNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, b: u8, out: &mut Vec<u8>) {
        if b == b'\n' && !self.prev_cr {
            out.push(b'\r');
        }
        out.push(b);
        self.prev_cr = b == b'\r';
    }

    pub fn normalize(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() + input.len() / 8);
        for &b in input {
            self.push(b, &mut out);
        }
        out
    }

    pub fn reset(&mut self) {
        self.prev_cr = false;
    }
}

/// Telnet client-side negotiator
pub struct TelnetNegotiator {
    state: NegotiationState,
    crlf: CrlfNormalizer,
    sb: Vec<u8>,
    terminal_type: Vec<u8>,
    cols: u16,
    rows: u16,
    naws_accepted: bool,
    remote_echo: bool,
}

impl TelnetNegotiator {
    pub fn new(terminal_type: &str, cols: u16, rows: u16) -> Self {
        let terminal_type = terminal_type
            .bytes()
            .filter(|b| b.is_ascii_graphic())
            .take(TTYPE_MAX_LEN)
            .collect();
        Self {
            state: NegotiationState::Data,
            crlf: CrlfNormalizer::new(),
            sb: Vec::with_capacity(SB_BUFFER_LEN),
            terminal_type,
            cols,
            rows,
            naws_accepted: false,
            remote_echo: false,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn naws_accepted(&self) -> bool {
        self.naws_accepted
    }

    /// Server agreed to echo for us
    pub fn remote_echo(&self) -> bool {
        self.remote_echo
    }

    pub fn terminal_type(&self) -> &[u8] {
        &self.terminal_type
    }

    pub fn grid(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    pub fn set_grid(&mut self, cols: u16, rows: u16) {
        self.cols = cols;
        self.rows = rows;
    }

    /// Forget option state for a new connection
    pub fn reset(&mut self) {
        self.state = NegotiationState::Data;
        self.crlf.reset();
        self.sb.clear();
        self.naws_accepted = false;
        self.remote_echo = false;
    }

    /// Strip negotiation from `input`, replying through `sink`
    pub fn process(&mut self, input: &[u8], sink: &mut dyn ReplySink) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len() + input.len() / 8);

        for &b in input {
            self.state = match self.state {
                NegotiationState::Data => {
                    if b == IAC {
                        NegotiationState::Iac
                    } else {
                        self.crlf.push(b, &mut out);
                        NegotiationState::Data
                    }
                }
                NegotiationState::Iac => match b {
                    IAC => {
                        self.crlf.push(IAC, &mut out);
                        NegotiationState::Data
                    }
                    WILL => NegotiationState::Will,
                    WONT => NegotiationState::Wont,
                    DO => NegotiationState::Do,
                    DONT => NegotiationState::Dont,
                    SB => {
                        self.sb.clear();
                        NegotiationState::Sb
                    }
                    _ => {
                        trace!("telnet: ignoring IAC {}", b);
                        NegotiationState::Data
                    }
                },
                NegotiationState::Will => {
                    self.handle_will(b, sink);
                    NegotiationState::Data
                }
                NegotiationState::Wont => {
                    self.handle_wont(b);
                    NegotiationState::Data
                }
                NegotiationState::Do => {
                    self.handle_do(b, sink);
                    NegotiationState::Data
                }
                NegotiationState::Dont => {
                    self.handle_dont(b);
                    NegotiationState::Data
                }
                NegotiationState::Sb => {
                    if b == IAC {
                        NegotiationState::SbIac
                    } else {
                        self.push_sb(b);
                        NegotiationState::Sb
                    }
                }
                NegotiationState::SbIac => {
                    if b == SE {
                        self.handle_subnegotiation(sink);
                        NegotiationState::Data
                    } else {
                        self.push_sb(b);
                        NegotiationState::Sb
                    }
                }
            };
        }

        out
    }

    /// Report a new window size if the server accepted NAWS
    pub fn send_naws(&mut self, cols: u16, rows: u16, sink: &mut dyn ReplySink) -> bool {
        self.set_grid(cols, rows);
        if !self.naws_accepted {
            return false;
        }
        sink.send_reply(&naws_frame(cols, rows));
        true
    }

    fn push_sb(&mut self, b: u8) {
        if self.sb.len() < SB_BUFFER_LEN {
            self.sb.push(b);
        }
    }

    fn handle_will(&mut self, option: u8, sink: &mut dyn ReplySink) {
        match option {
            opt::ECHO | opt::SGA => {
                if option == opt::ECHO {
                    self.remote_echo = true;
                }
                debug!("telnet: WILL {} -> DO", option);
                sink.send_reply(&[IAC, DO, option]);
            }
            _ => {
                debug!("telnet: WILL {} -> DONT", option);
                sink.send_reply(&[IAC, DONT, option]);
            }
        }
    }

    fn handle_wont(&mut self, option: u8) {
        if option == opt::ECHO {
            self.remote_echo = false;
        }
        debug!("telnet: WONT {}", option);
    }

    fn handle_do(&mut self, option: u8, sink: &mut dyn ReplySink) {
        match option {
            opt::TTYPE | opt::SGA => {
                debug!("telnet: DO {} -> WILL", option);
                sink.send_reply(&[IAC, WILL, option]);
            }
            opt::NAWS => {
                debug!("telnet: DO NAWS -> WILL, {}x{}", self.cols, self.rows);
                self.naws_accepted = true;
                sink.send_reply(&[IAC, WILL, opt::NAWS]);
                sink.send_reply(&naws_frame(self.cols, self.rows));
            }
            _ => {
                debug!("telnet: DO {} -> WONT", option);
                sink.send_reply(&[IAC, WONT, option]);
            }
        }
    }

    fn handle_dont(&mut self, option: u8) {
        if option == opt::NAWS {
            self.naws_accepted = false;
        }
        debug!("telnet: DONT {}", option);
    }

    fn handle_subnegotiation(&mut self, sink: &mut dyn ReplySink) {
        if let [opt::TTYPE, TTYPE_SEND, ..] = self.sb.as_slice() {
            debug!("telnet: TTYPE SEND -> {}", String::from_utf8_lossy(&self.terminal_type));
            sink.send_reply(&ttype_frame(&self.terminal_type));
        }
        self.sb.clear();
    }
}

/// `IAC SB NAWS w_hi w_lo h_hi h_lo IAC SE`, with 255 escaped
pub fn naws_frame(cols: u16, rows: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(13);
    frame.extend_from_slice(&[IAC, SB, opt::NAWS]);
    for b in cols.to_be_bytes().into_iter().chain(rows.to_be_bytes()) {
        frame.push(b);
        if b == IAC {
            frame.push(IAC);
        }
    }
    frame.extend_from_slice(&[IAC, SE]);
    frame
}

/// `IAC SB TTYPE IS <name> IAC SE`
pub fn ttype_frame(terminal_type: &[u8]) -> Vec<u8> {
    let name = &terminal_type[..terminal_type.len().min(TTYPE_MAX_LEN)];
    let mut frame = Vec::with_capacity(name.len() + 6);
    frame.extend_from_slice(&[IAC, SB, opt::TTYPE, TTYPE_IS]);
    frame.extend_from_slice(name);
    frame.extend_from_slice(&[IAC, SE]);
    frame
}

/// Prepare user input for the wire
pub fn encode_input(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + 2);
    encode_input_into(input, &mut out);
    out
}

/// Append the wire form of `input` to `out`
pub fn encode_input_into(input: &[u8], out: &mut Vec<u8>) {
    for (i, &b) in input.iter().enumerate() {
        match b {
            IAC => out.extend_from_slice(&[IAC, IAC]),
            b'\r' => {
                out.push(b'\r');
                if input.get(i + 1) != Some(&b'\n') {
                    out.push(b'\n');
                }
            }
            _ => out.push(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn negotiator() -> TelnetNegotiator {
        TelnetNegotiator::new("xterm-256color", 80, 24)
    }

    #[test]
    fn test_iac_iac_is_literal() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        let out = neg.process(&[b'a', IAC, IAC, b'b'], &mut sink);
        assert_eq!(out, vec![b'a', 0xFF, b'b']);
        assert!(sink.is_empty());
        assert_eq!(neg.state(), NegotiationState::Data);
    }

    #[test]
    fn test_do_naws_replies_will_and_size() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        let out = neg.process(&[IAC, DO, opt::NAWS], &mut sink);
        assert!(out.is_empty());
        assert_eq!(
            sink,
            vec![IAC, WILL, opt::NAWS, IAC, SB, opt::NAWS, 0, 80, 0, 24, IAC, SE]
        );
        assert!(neg.naws_accepted());
    }

    #[test]
    fn test_naws_frame_escapes_iac() {
        assert_eq!(
            naws_frame(255, 24),
            vec![IAC, SB, opt::NAWS, 0, 255, 255, 0, 24, IAC, SE]
        );
        assert_eq!(
            naws_frame(300, 50),
            vec![IAC, SB, opt::NAWS, 1, 44, 0, 50, IAC, SE]
        );
    }

    #[test]
    fn test_will_replies() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        neg.process(&[IAC, WILL, opt::ECHO], &mut sink);
        assert_eq!(sink, vec![IAC, DO, opt::ECHO]);
        assert!(neg.remote_echo());

        sink.clear();
        neg.process(&[IAC, WILL, opt::SGA, IAC, WILL, 99], &mut sink);
        assert_eq!(sink, vec![IAC, DO, opt::SGA, IAC, DONT, 99]);

        sink.clear();
        neg.process(&[IAC, WONT, opt::ECHO, IAC, DONT, opt::TTYPE], &mut sink);
        assert!(sink.is_empty());
        assert!(!neg.remote_echo());
    }

    #[test]
    fn test_do_unknown_option() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        neg.process(&[IAC, DO, 39, IAC, DO, opt::SGA], &mut sink);
        assert_eq!(sink, vec![IAC, WONT, 39, IAC, WILL, opt::SGA]);
    }

    #[test]
    fn test_dont_naws_stops_updates() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        neg.process(&[IAC, DO, opt::NAWS], &mut sink);
        sink.clear();

        assert!(neg.send_naws(100, 30, &mut sink));
        assert_eq!(sink, naws_frame(100, 30));

        neg.process(&[IAC, DONT, opt::NAWS], &mut sink);
        sink.clear();
        assert!(!neg.send_naws(120, 40, &mut sink));
        assert!(sink.is_empty());
        assert_eq!(neg.grid(), (120, 40));
    }

    #[test]
    fn test_terminal_type_exchange() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        neg.process(&[IAC, DO, opt::TTYPE], &mut sink);
        assert_eq!(sink, vec![IAC, WILL, opt::TTYPE]);

        sink.clear();
        let out = neg.process(&[IAC, SB, opt::TTYPE, TTYPE_SEND, IAC, SE, b'$'], &mut sink);
        assert_eq!(out, b"$".to_vec());

        let mut expected = vec![IAC, SB, opt::TTYPE, TTYPE_IS];
        expected.extend_from_slice(b"xterm-256color");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(sink, expected);
    }

    #[test]
    fn test_terminal_type_is_capped() {
        let long = "x".repeat(100);
        let neg = TelnetNegotiator::new(&long, 80, 24);
        assert_eq!(neg.terminal_type().len(), TTYPE_MAX_LEN);
        assert_eq!(ttype_frame(long.as_bytes()).len(), TTYPE_MAX_LEN + 6);
    }

    #[test]
    fn test_subnegotiation_overflow_and_payload() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        let mut input = vec![IAC, SB, opt::TTYPE];
        input.extend(std::iter::repeat(b'\n').take(200));
        input.extend_from_slice(&[IAC, IAC, IAC, SE, b'z']);
        let out = neg.process(&input, &mut sink);
        assert_eq!(out, b"z".to_vec());
        assert!(sink.is_empty());
        assert_eq!(neg.state(), NegotiationState::Data);
    }

    #[test]
    fn test_unknown_commands_ignored() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        let out = neg.process(&[IAC, NOP, b'x', IAC, BRK, IAC, GA, b'y'], &mut sink);
        assert_eq!(out, b"xy".to_vec());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_bare_lf_expanded() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        assert_eq!(neg.process(b"a\nb\r\nc", &mut sink), b"a\r\nb\r\nc".to_vec());
    }

    #[test]
    fn test_split_boundaries() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        let mut out = neg.process(b"line\r", &mut sink);
        out.extend(neg.process(b"\nnext", &mut sink));
        assert_eq!(out, b"line\r\nnext".to_vec());

        neg.process(&[IAC], &mut sink);
        assert_eq!(neg.state(), NegotiationState::Iac);
        neg.process(&[DO], &mut sink);
        neg.process(&[opt::SGA], &mut sink);
        assert_eq!(sink, vec![IAC, WILL, opt::SGA]);
    }

    #[test]
    fn test_encode_input() {
        assert_eq!(encode_input(b"ls\r"), b"ls\r\n".to_vec());
        assert_eq!(encode_input(b"a\r\nb"), b"a\r\nb".to_vec());
        assert_eq!(encode_input(&[1, IAC, 2]), vec![1, IAC, IAC, 2]);
    }

    #[test]
    fn test_reset_clears_options() {
        let mut neg = negotiator();
        let mut sink = Vec::new();
        neg.process(&[IAC, DO, opt::NAWS, IAC, WILL, opt::ECHO, IAC], &mut sink);
        neg.reset();
        assert!(!neg.naws_accepted());
        assert!(!neg.remote_echo());
        assert_eq!(neg.state(), NegotiationState::Data);
    }

    proptest! {
        #[test]
        fn prop_crlf_normalization_is_idempotent(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let once = CrlfNormalizer::new().normalize(&data);
            let twice = CrlfNormalizer::new().normalize(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_escaped_data_passes_through(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut escaped = Vec::new();
            for &b in &data {
                escaped.push(b);
                if b == IAC {
                    escaped.push(IAC);
                }
            }
            let mut neg = negotiator();
            let mut sink = Vec::new();
            let out = neg.process(&escaped, &mut sink);
            prop_assert_eq!(out, CrlfNormalizer::new().normalize(&data));
            prop_assert!(sink.is_empty());
        }
    }
}
