//! Pending-reply registry: reply token → single-shot signal.
//!
//! The reader task resolves entries when a control token shows up in a
//! line; command issuers arm a [`Waiter`] for the tokens they expect and
//! await it.  At most one live waiter exists per token value.  A later
//! registration for the same token silently replaces an unresolved earlier
//! one (last registration wins); the replaced waiter simply never fires and
//! runs into its own timeout.

use std::rc::Rc;

use core::cell::RefCell;
use core::time::Duration;
use embassy_sync::signal::Signal;
use log::debug;

use super::channels::LinkMutex;
use super::with_timeout;
use crate::error::LinkError;

/// Longest token that fits a registry key.
pub const MAX_TOKEN_LEN: usize = 32;

/// Registry slots (distinct tokens awaited at once).
pub const MAX_WAITERS: usize = 16;

/// Tokens a single waiter can listen for.
pub const MAX_TOKENS_PER_WAITER: usize = 8;

pub type TokenKey = heapless::String<MAX_TOKEN_LEN>;

/// One-shot event carrying the token that fired it.
pub type WaiterSignal = Signal<LinkMutex, TokenKey>;

struct Slot {
    token: TokenKey,
    signal: Rc<WaiterSignal>,
}

pub struct WaiterRegistry {
    slots: RefCell<heapless::Vec<Slot, MAX_WAITERS>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(heapless::Vec::new()),
        }
    }

    /// Register `signal` for `token`, replacing any unresolved waiter.
    pub fn register(&self, token: &str, signal: &Rc<WaiterSignal>) -> Result<(), LinkError> {
        let key = TokenKey::try_from(token).map_err(|_| LinkError::TokenTooLong)?;
        let mut slots = self.slots.borrow_mut();
        if let Some(slot) = slots.iter_mut().find(|s| s.token == key) {
            if !Rc::ptr_eq(&slot.signal, signal) {
                debug!("WAIT: waiter for '{}' replaced", token);
            }
            slot.signal = Rc::clone(signal);
            return Ok(());
        }
        slots
            .push(Slot {
                token: key,
                signal: Rc::clone(signal),
            })
            .map_err(|_| LinkError::RegistryFull)
    }

    /// Fire and remove the waiter for `token`.  Returns `false` if none.
    pub fn resolve(&self, token: &str) -> bool {
        let mut slots = self.slots.borrow_mut();
        let Some(idx) = slots.iter().position(|s| s.token.as_str() == token) else {
            return false;
        };
        let slot = slots.swap_remove(idx);
        slot.signal.signal(slot.token);
        true
    }

    /// Remove the entry for `token` only if it still belongs to `signal`.
    pub fn withdraw(&self, token: &str, signal: &Rc<WaiterSignal>) {
        let mut slots = self.slots.borrow_mut();
        if let Some(idx) = slots
            .iter()
            .position(|s| s.token.as_str() == token && Rc::ptr_eq(&s.signal, signal))
        {
            slots.swap_remove(idx);
        }
    }

    pub fn is_pending(&self, token: &str) -> bool {
        self.slots.borrow().iter().any(|s| s.token.as_str() == token)
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Arm one shared signal for every token in `tokens`.
    ///
    /// The returned guard withdraws its registrations when dropped, so a
    /// timed-out wait leaves nothing behind.
    pub fn arm<'a>(&'a self, tokens: &[&str]) -> Result<Waiter<'a>, LinkError> {
        let mut waiter = Waiter {
            registry: self,
            signal: Rc::new(WaiterSignal::new()),
            tokens: heapless::Vec::new(),
        };
        for token in tokens {
            let key = TokenKey::try_from(*token).map_err(|_| LinkError::TokenTooLong)?;
            waiter
                .tokens
                .push(key)
                .map_err(|_| LinkError::RegistryFull)?;
            self.register(token, &waiter.signal)?;
        }
        Ok(waiter)
    }
}

impl Default for WaiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Armed registration for a set of tokens.
pub struct Waiter<'a> {
    registry: &'a WaiterRegistry,
    signal: Rc<WaiterSignal>,
    tokens: heapless::Vec<TokenKey, MAX_TOKENS_PER_WAITER>,
}

impl Waiter<'_> {
    /// Wait for any armed token; returns the one that fired.
    pub async fn wait(&self) -> TokenKey {
        self.signal.wait().await
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Option<TokenKey> {
        with_timeout(timeout, self.wait()).await
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        for token in &self.tokens {
            self.registry.withdraw(token, &self.signal);
        }
    }
}
