//! Simulated ESP-AT modem (host builds only).
//!
//! Speaks enough of the AT dialect for the link engine to run end to end:
//! command echo, `OK` replies, `AT+CIPSEND=<len>` with prompt and
//! `SEND OK`, transparent mode entered by a bare `AT+CIPSEND` and left by
//! `+++`.  Tests script exceptions with [`SimModem::on`], push unsolicited
//! traffic with [`SimModem::inject`] and inspect everything written.
//!
//! The handle is cheaply cloneable; [`SimModem::split`] hands out the two
//! UART halves while the test keeps a handle for scripting.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use core::convert::Infallible;

use crate::link::transport::{SerialRx, SerialTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimMode {
    Command,
    Payload { remaining: usize },
    Transparent,
}

struct Rule {
    pattern: String,
    prefix: bool,
    reply: String,
}

impl Rule {
    fn matches(&self, cmd: &str) -> bool {
        if self.prefix {
            cmd.starts_with(&self.pattern)
        } else {
            cmd == self.pattern
        }
    }
}

struct SimState {
    echo: bool,
    to_host: VecDeque<u8>,
    line: Vec<u8>,
    wire: Vec<u8>,
    commands: Vec<String>,
    rules: Vec<Rule>,
    mode: SimMode,
    payload: Vec<u8>,
    payloads: Vec<Vec<u8>>,
    streamed: Vec<u8>,
    escapes: u32,
    stalled: bool,
    send_fail: bool,
    read_chunk: usize,
}

impl SimState {
    fn reply(&mut self, text: &str) {
        if !self.stalled {
            self.to_host.extend(text.as_bytes());
        }
    }

    fn accept(&mut self, data: &[u8]) {
        self.wire.extend_from_slice(data);

        if data == b"+++" {
            self.escapes += 1;
            self.line.clear();
            if self.mode == SimMode::Transparent {
                self.mode = SimMode::Command;
            }
            return;
        }

        for &b in data {
            match self.mode {
                SimMode::Transparent => self.streamed.push(b),
                SimMode::Payload { remaining } => {
                    self.payload.push(b);
                    if remaining <= 1 {
                        self.finish_payload();
                    } else {
                        self.mode = SimMode::Payload {
                            remaining: remaining - 1,
                        };
                    }
                }
                SimMode::Command => {
                    self.line.push(b);
                    if self.line.ends_with(b"\r\n") {
                        let raw = core::mem::take(&mut self.line);
                        let cmd = String::from_utf8_lossy(&raw[..raw.len() - 2]).to_string();
                        self.handle(cmd);
                    }
                }
            }
        }
    }

    fn finish_payload(&mut self) {
        let payload = core::mem::take(&mut self.payload);
        let n = payload.len();
        self.payloads.push(payload);
        self.mode = SimMode::Command;
        let ack = if self.send_fail { "SEND FAIL" } else { "SEND OK" };
        self.reply(&format!("\r\nRecv {n} bytes\r\n\r\n{ack}\r\n"));
    }

    fn handle(&mut self, cmd: String) {
        self.commands.push(cmd.clone());
        if self.echo {
            self.reply(&format!("{cmd}\r\n"));
        }

        if let Some(rule) = self.rules.iter().find(|r| r.matches(&cmd)) {
            let reply = rule.reply.clone();
            self.reply(&reply);
            return;
        }

        if cmd == "AT+CIPSEND" {
            self.reply("\r\nOK\r\n\r\n>");
            if !self.stalled {
                self.mode = SimMode::Transparent;
            }
            return;
        }
        if let Some(args) = cmd.strip_prefix("AT+CIPSEND=") {
            match args.rsplit(',').next().and_then(|n| n.parse::<usize>().ok()) {
                Some(len) if len > 0 && !self.stalled => {
                    self.reply("\r\nOK\r\n> ");
                    self.mode = SimMode::Payload { remaining: len };
                }
                _ => self.reply("\r\nERROR\r\n"),
            }
            return;
        }
        if cmd.starts_with("AT+CIPSTART=") {
            self.reply("CONNECT\r\n\r\nOK\r\n");
            return;
        }
        self.reply("\r\nOK\r\n");
    }
}

/// Handle to a simulated modem.
#[derive(Clone)]
pub struct SimModem {
    state: Rc<RefCell<SimState>>,
}

impl SimModem {
    /// A modem with echo on (the ESP-AT power-up default).
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                echo: true,
                to_host: VecDeque::new(),
                line: Vec::new(),
                wire: Vec::new(),
                commands: Vec::new(),
                rules: Vec::new(),
                mode: SimMode::Command,
                payload: Vec::new(),
                payloads: Vec::new(),
                streamed: Vec::new(),
                escapes: 0,
                stalled: false,
                send_fail: false,
                read_chunk: usize::MAX,
            })),
        }
    }

    pub fn set_echo(&self, on: bool) {
        self.state.borrow_mut().echo = on;
    }

    /// Script the reply to a command.  A trailing `*` matches by prefix;
    /// an empty reply makes the modem stay silent.
    pub fn on(&self, command: &str, reply: &str) {
        let (pattern, prefix) = match command.strip_suffix('*') {
            Some(p) => (p, true),
            None => (command, false),
        };
        self.state.borrow_mut().rules.insert(
            0,
            Rule {
                pattern: pattern.to_string(),
                prefix,
                reply: reply.to_string(),
            },
        );
    }

    /// Queue unsolicited bytes towards the host.
    pub fn inject(&self, bytes: &[u8]) {
        self.state.borrow_mut().to_host.extend(bytes);
    }

    /// A stalled modem swallows everything and answers nothing.
    pub fn set_stalled(&self, on: bool) {
        self.state.borrow_mut().stalled = on;
    }

    /// Answer `SEND FAIL` instead of `SEND OK`.
    pub fn set_send_fail(&self, on: bool) {
        self.state.borrow_mut().send_fail = on;
    }

    /// Largest chunk returned by a single read.
    pub fn set_read_chunk(&self, n: usize) {
        self.state.borrow_mut().read_chunk = n.max(1);
    }

    /// Command lines received, in order, without CRLF.
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    /// Every byte the host wrote.
    pub fn wire(&self) -> Vec<u8> {
        self.state.borrow().wire.clone()
    }

    /// Payloads delivered through `AT+CIPSEND=<len>`.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.state.borrow().payloads.clone()
    }

    /// Bytes received while in transparent mode.
    pub fn streamed(&self) -> Vec<u8> {
        self.state.borrow().streamed.clone()
    }

    pub fn escapes(&self) -> u32 {
        self.state.borrow().escapes
    }

    pub fn in_transparent(&self) -> bool {
        self.state.borrow().mode == SimMode::Transparent
    }

    /// Bytes queued towards the host and not yet read.
    pub fn pending(&self) -> usize {
        self.state.borrow().to_host.len()
    }

    pub fn split(&self) -> (SimTx, SimRx) {
        (SimTx(self.clone()), SimRx(self.clone()))
    }
}

impl Default for SimModem {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTx for SimModem {
    type Error = Infallible;

    fn write(&mut self, data: &[u8]) -> Result<usize, Infallible> {
        self.state.borrow_mut().accept(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

impl SerialRx for SimModem {
    type Error = Infallible;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        let mut st = self.state.borrow_mut();
        let n = buf.len().min(st.read_chunk).min(st.to_host.len());
        for (dst, src) in buf.iter_mut().zip(st.to_host.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

/// Transmit half handed to the link context.
pub struct SimTx(SimModem);

/// Receive half handed to the reader task.
pub struct SimRx(SimModem);

impl SerialTx for SimTx {
    type Error = Infallible;

    fn write(&mut self, data: &[u8]) -> Result<usize, Infallible> {
        self.0.write(data)
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        self.0.flush()
    }
}

impl SerialRx for SimRx {
    type Error = Infallible;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        self.0.read(buf)
    }
}
