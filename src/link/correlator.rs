//! AT command / reply correlation.
//!
//! Two ways to wait for a reply:
//!
//! - **In-line scanning** ([`LinkContext::send_command`]): the command
//!   lock is held for the whole transaction and the reply lines captured
//!   by the reader are scanned in order against the expected tokens, with
//!   a deadline and a byte budget.
//! - **Registry waiting** ([`LinkContext::send_command_async`]): the write
//!   happens under the lock, then the caller waits on the waiter registry
//!   for any expected control token, so replies may interleave with
//!   unrelated traffic.
//!
//! A token containing any of `. ^ $ * + ? { } [ ] \ | ( )` is compiled as
//! a regular expression; anything else is a literal substring.

use std::time::Instant;

use core::time::Duration;
use embassy_sync::mutex::MutexGuard;
use log::{debug, warn};
use regex::Regex;

use super::channels::LinkMutex;
use super::context::LinkContext;
use super::demux::find;
use super::transport::SerialTx;
use super::with_timeout;
use crate::config::LineReaderBudget;
use crate::error::LinkError;

const PATTERN_CHARS: &str = ".^$*+?{}[]\\|()";

/// Partial-line tail kept between reads, at least this many bytes.
const MIN_TAIL: usize = 512;

/// How a reply scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// An expected token (or a default `OK` line) matched.
    Matched,
    /// No tokens were given and a non-`OK` terminal line arrived.
    Terminal,
    Timeout,
    ByteBudgetExceeded,
    /// The command never reached the wire.
    WriteFailed,
}

impl CommandOutcome {
    pub fn error(self) -> Option<LinkError> {
        match self {
            Self::Matched | Self::Terminal => None,
            Self::Timeout => Some(LinkError::CommandTimeout),
            Self::ByteBudgetExceeded => Some(LinkError::ByteBudgetExceeded),
            Self::WriteFailed => Some(LinkError::UartWrite),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub outcome: CommandOutcome,
    /// Last complete reply line seen.
    pub last_line: String,
    /// Index into the expected tokens of the one that matched.
    pub matched_index: Option<usize>,
}

impl CommandReply {
    fn new(outcome: CommandOutcome, last_line: String, matched_index: Option<usize>) -> Self {
        Self {
            outcome,
            last_line,
            matched_index,
        }
    }

    pub fn matched(&self) -> bool {
        self.outcome == CommandOutcome::Matched
    }
}

/// One AT transaction.
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest<'a> {
    pub text: &'a str,
    pub expect: &'a [&'a str],
    pub timeout: Duration,
    pub budget: LineReaderBudget,
}

// ---------------------------------------------------------------------------
// Token matching
// ---------------------------------------------------------------------------

enum TokenMatcher {
    Literal(String),
    Pattern(Regex),
}

impl TokenMatcher {
    fn compile(token: &str) -> Self {
        if !token.chars().any(|c| PATTERN_CHARS.contains(c)) {
            return Self::Literal(token.to_string());
        }
        match Regex::new(token) {
            Ok(re) => Self::Pattern(re),
            Err(e) => {
                warn!("AT: token {:?} is not a valid pattern ({}), matching literally", token, e);
                Self::Literal(token.to_string())
            }
        }
    }

    fn is_match(&self, line: &str) -> bool {
        match self {
            Self::Literal(s) => line.contains(s.as_str()),
            Self::Pattern(re) => re.is_match(line),
        }
    }
}

/// Terminal lines recognised when a command names no tokens.
fn is_default_terminal(line: &str) -> bool {
    line.starts_with("OK")
        || line.starts_with("ERROR")
        || line.contains("FAIL")
        || line.contains("SEND OK")
        || line.contains("ALREADY CONNECTED")
        || line.starts_with("link is not valid")
}

// ---------------------------------------------------------------------------
// Reply scanner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStep {
    Pending,
    Done(CommandOutcome, Option<usize>),
}

/// Incremental reply scanner: echo stripping, line splitting, token
/// matching and byte budget accounting.
pub struct ReplyScanner {
    echo: Vec<u8>,
    matchers: Vec<TokenMatcher>,
    budget: LineReaderBudget,
    buf: Vec<u8>,
    consumed: usize,
    last_line: String,
}

impl ReplyScanner {
    /// `echo` is the command text to strip once if the reply starts with it.
    pub fn new(echo: &str, expect: &[&str], budget: LineReaderBudget) -> Self {
        Self {
            echo: echo.as_bytes().to_vec(),
            matchers: expect.iter().map(|t| TokenMatcher::compile(t)).collect(),
            budget,
            buf: Vec::new(),
            consumed: 0,
            last_line: String::new(),
        }
    }

    pub fn last_line(&self) -> &str {
        &self.last_line
    }

    pub fn into_last_line(self) -> String {
        self.last_line
    }

    pub fn push(&mut self, chunk: &[u8]) -> ScanStep {
        self.consumed += chunk.len();
        self.buf.extend_from_slice(chunk);

        if !self.echo.is_empty() {
            if self.buf.starts_with(&self.echo) {
                self.buf.drain(..self.echo.len());
                self.echo.clear();
            } else if self.buf.len() >= self.echo.len() || !self.echo.starts_with(&self.buf) {
                self.echo.clear();
            } else {
                return self.over_budget();
            }
        }

        let max_line = self.budget.max_line_bytes;
        let mut consumed = 0;
        while let Some(end) = find(&self.buf[consumed..], b"\r\n") {
            let raw = &self.buf[consumed..consumed + end];
            consumed += end + 2;
            let raw = &raw[..raw.len().min(max_line)];
            let line = String::from_utf8_lossy(raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.last_line = line.to_string();
            if let Some(step) = self.check_line() {
                self.buf.drain(..consumed);
                return step;
            }
        }
        self.buf.drain(..consumed);

        let keep = MIN_TAIL.max(2 * max_line);
        if self.buf.len() > keep {
            let cut = self.buf.len() - keep;
            self.buf.drain(..cut);
        }
        self.over_budget()
    }

    fn check_line(&self) -> Option<ScanStep> {
        let line = self.last_line.as_str();
        if self.matchers.is_empty() {
            if is_default_terminal(line) {
                let outcome = if line.starts_with("OK") {
                    CommandOutcome::Matched
                } else {
                    CommandOutcome::Terminal
                };
                return Some(ScanStep::Done(outcome, None));
            }
            return None;
        }
        self.matchers
            .iter()
            .position(|m| m.is_match(line))
            .map(|i| ScanStep::Done(CommandOutcome::Matched, Some(i)))
    }

    fn over_budget(&self) -> ScanStep {
        if self.consumed > self.budget.max_bytes {
            ScanStep::Done(CommandOutcome::ByteBudgetExceeded, None)
        } else {
            ScanStep::Pending
        }
    }
}

// ---------------------------------------------------------------------------
// Command session
// ---------------------------------------------------------------------------

/// Exclusive use of the AT channel.
///
/// While a session is alive the reader copies every complete line into the
/// reply transcript; dropping it stops the capture and releases the lock.
pub struct CommandSession<'a, T: SerialTx> {
    ctx: &'a LinkContext<T>,
    last_cmd: MutexGuard<'a, LinkMutex, Option<Instant>>,
}

impl<'a, T: SerialTx> CommandSession<'a, T> {
    pub fn ctx(&self) -> &'a LinkContext<T> {
        self.ctx
    }

    /// Sleep out the remainder of the inter-command gap.
    async fn pace(&self) {
        let gap = Duration::from_millis(self.ctx.config.inter_cmd_gap_ms as u64);
        if let Some(last) = *self.last_cmd {
            let since = last.elapsed();
            if since < gap {
                async_io_mini::Timer::after(gap - since).await;
            }
        }
    }

    /// Write `text\r\n` and scan the reply.  Does not touch the rate limiter.
    pub async fn exchange(&mut self, req: &CommandRequest<'_>) -> CommandReply {
        self.pace().await;
        self.ctx.transcript.clear();
        debug!("AT>> {}", req.text);

        let mut line = Vec::with_capacity(req.text.len() + 2);
        line.extend_from_slice(req.text.as_bytes());
        line.extend_from_slice(b"\r\n");
        let written = self.ctx.write_raw(&line);
        *self.last_cmd = Some(Instant::now());
        if written.is_err() {
            return CommandReply::new(CommandOutcome::WriteFailed, String::new(), None);
        }

        let scanner = ReplyScanner::new(req.text, req.expect, req.budget);
        self.scan(scanner, req.timeout).await
    }

    /// Rate-limited [`exchange`](Self::exchange) with the configured budget.
    pub async fn command(&mut self, text: &str, expect: &[&str], timeout: Duration) -> CommandReply {
        self.ctx.msg_bucket.consume(1).await;
        let budget = self.ctx.config.line_reader;
        self.exchange(&CommandRequest {
            text,
            expect,
            timeout,
            budget,
        })
        .await
    }

    /// Write bytes that are not a command line (payloads, escapes).
    pub fn write_payload(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.ctx.write_raw(data)
    }

    /// Scan further reply lines without writing anything.
    pub async fn await_tokens(&mut self, expect: &[&str], timeout: Duration) -> CommandReply {
        let scanner = ReplyScanner::new("", expect, self.ctx.config.line_reader);
        self.scan(scanner, timeout).await
    }

    async fn scan(&mut self, mut scanner: ReplyScanner, timeout: Duration) -> CommandReply {
        let deadline = Instant::now() + timeout;
        let mut chunk = vec![0u8; scanner.budget.chunk_size.max(1)];

        let (outcome, index) = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break (CommandOutcome::Timeout, None);
            }
            let Some(n) = with_timeout(remaining, self.ctx.transcript.read(&mut chunk)).await
            else {
                break (CommandOutcome::Timeout, None);
            };
            if let ScanStep::Done(outcome, index) = scanner.push(&chunk[..n]) {
                break (outcome, index);
            }
        };

        match outcome {
            CommandOutcome::Matched | CommandOutcome::Terminal => {
                debug!("AT<< OK: {}", scanner.last_line());
            }
            CommandOutcome::Timeout => warn!("AT<< TIMEOUT last: {}", scanner.last_line()),
            CommandOutcome::ByteBudgetExceeded => {
                warn!("AT<< BYTE-BUDGET last: {}", scanner.last_line());
            }
            CommandOutcome::WriteFailed => {}
        }
        CommandReply::new(outcome, scanner.into_last_line(), index)
    }
}

impl<T: SerialTx> Drop for CommandSession<'_, T> {
    fn drop(&mut self) {
        self.ctx.set_capturing(false);
    }
}

// ---------------------------------------------------------------------------
// Public command API
// ---------------------------------------------------------------------------

impl<T: SerialTx> LinkContext<T> {
    /// Take the command lock and start capturing reply lines.
    pub async fn session(&self) -> CommandSession<'_, T> {
        let last_cmd = self.command_lock.lock().await;
        self.transcript.clear();
        self.set_capturing(true);
        CommandSession {
            ctx: self,
            last_cmd,
        }
    }

    /// Issue one AT command and scan its reply in-line.
    ///
    /// With no `expect` tokens the default terminal set applies and only a
    /// line beginning with `OK` counts as success.
    pub async fn send_command(&self, text: &str, expect: &[&str], timeout: Duration) -> CommandReply {
        self.msg_bucket.consume(1).await;
        let budget = self.config.line_reader;
        self.send_request(&CommandRequest {
            text,
            expect,
            timeout,
            budget,
        })
        .await
    }

    /// Like [`send_command`](Self::send_command) with an explicit byte budget.
    pub async fn send_request(&self, req: &CommandRequest<'_>) -> CommandReply {
        let mut session = self.session().await;
        session.exchange(req).await
    }

    /// Issue a command and wait for a control token through the registry.
    ///
    /// Only tokens the reader recognises (`OK`, `ERROR`, `FAIL`, `SEND OK`,
    /// `SEND FAIL`, `>`, `ALREADY CONNECTED`) can ever fire.  With no
    /// `expect` tokens, `OK` matches and `ERROR` is terminal.
    pub async fn send_command_async(
        &self,
        text: &str,
        expect: &[&str],
        timeout: Duration,
    ) -> CommandReply {
        const DEFAULT: &[&str] = &["OK", "ERROR"];
        let tokens = if expect.is_empty() { DEFAULT } else { expect };

        self.msg_bucket.consume(1).await;
        // Held until the reply token fires: one AT transaction at a time.
        let mut last_cmd = self.command_lock.lock().await;
        let gap = Duration::from_millis(self.config.inter_cmd_gap_ms as u64);
        if let Some(since) = (*last_cmd).map(|t| t.elapsed()) {
            if since < gap {
                async_io_mini::Timer::after(gap - since).await;
            }
        }

        let waiter = match self.waiters.arm(tokens) {
            Ok(w) => w,
            Err(e) => {
                warn!("AT: cannot wait for {:?}: {}", tokens, e);
                return CommandReply::new(CommandOutcome::WriteFailed, String::new(), None);
            }
        };

        debug!("AT>> {} (async)", text);
        let mut line = Vec::with_capacity(text.len() + 2);
        line.extend_from_slice(text.as_bytes());
        line.extend_from_slice(b"\r\n");
        let written = self.write_raw(&line);
        *last_cmd = Some(Instant::now());
        if written.is_err() {
            return CommandReply::new(CommandOutcome::WriteFailed, String::new(), None);
        }

        match waiter.wait_timeout(timeout).await {
            Some(token) => {
                let index = tokens.iter().position(|t| *t == token.as_str());
                let outcome = if expect.is_empty() && token.as_str() != "OK" {
                    CommandOutcome::Terminal
                } else {
                    CommandOutcome::Matched
                };
                debug!("AT<< {} ({})", token, text);
                CommandReply::new(outcome, token.to_string(), index)
            }
            None => {
                warn!("AT<< TIMEOUT waiting for {:?} ({})", tokens, text);
                CommandReply::new(CommandOutcome::Timeout, String::new(), None)
            }
        }
    }

    /// Wait for a control token without sending anything.
    pub async fn wait_token(&self, token: &str, timeout: Duration) -> bool {
        match self.waiters.arm(&[token]) {
            Ok(waiter) => waiter.wait_timeout(timeout).await.is_some(),
            Err(e) => {
                warn!("AT: cannot wait for {:?}: {}", token, e);
                false
            }
        }
    }
}
