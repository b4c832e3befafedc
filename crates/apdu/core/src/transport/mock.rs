//! Scripted in-memory card for tests
//!
//! A [`MockCard`] holds a queue of canned replies and the log of commands it
//! received. It is cheaply cloneable; every [`MockTransport`] opened through a
//! [`MockConnector`] shares the same card, so a test can script the exchange
//! up front and inspect the command log after the code under test is done.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use super::{CardConnector, CardTransport, TransportError};

#[derive(Debug, Default)]
struct MockCardState {
    replies: VecDeque<Result<Bytes, TransportError>>,
    commands: Vec<Bytes>,
    removed: bool,
}

/// Scripted card shared between a test and the transports it hands out
#[derive(Debug, Clone, Default)]
pub struct MockCard {
    state: Arc<Mutex<MockCardState>>,
}

impl MockCard {
    /// Create a card with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockCardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply given as hex (payload followed by status word)
    ///
    /// # Panics
    /// Panics if `reply` is not valid hex; scripts are test fixtures.
    pub fn reply(&self, reply: &str) -> &Self {
        let bytes = hex::decode(reply).expect("mock reply must be valid hex");
        self.state().replies.push_back(Ok(Bytes::from(bytes)));
        self
    }

    /// Queue a transport failure
    pub fn fail(&self, error: TransportError) -> &Self {
        self.state().replies.push_back(Err(error));
        self
    }

    /// Take the card out of the field; later connects fail
    pub fn remove(&self) {
        self.state().removed = true;
    }

    /// Commands received so far
    pub fn commands(&self) -> Vec<Bytes> {
        self.state().commands.clone()
    }

    /// Commands received so far, as uppercase hex
    pub fn commands_hex(&self) -> Vec<String> {
        self.state()
            .commands
            .iter()
            .map(hex::encode_upper)
            .collect()
    }

    /// Number of scripted replies not yet consumed
    pub fn pending_replies(&self) -> usize {
        self.state().replies.len()
    }
}

/// Transport bound to a [`MockCard`]
#[derive(Debug, Clone)]
pub struct MockTransport {
    card: MockCard,
}

impl MockTransport {
    /// Open a transport onto `card`
    pub const fn new(card: MockCard) -> Self {
        Self { card }
    }
}

impl CardTransport for MockTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let mut state = self.card.state();
        if state.removed {
            return Err(TransportError::CardRemoved);
        }
        state.commands.push(Bytes::copy_from_slice(command));
        state
            .replies
            .pop_front()
            .unwrap_or(Err(TransportError::Transmission))
    }

    fn is_connected(&self) -> bool {
        !self.card.state().removed
    }
}

/// Connector that always reaches the same [`MockCard`]
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    card: MockCard,
}

impl MockConnector {
    /// Create a connector onto `card`
    pub const fn new(card: MockCard) -> Self {
        Self { card }
    }
}

impl CardConnector for MockConnector {
    type Transport = MockTransport;

    fn connect(&self, _reader: &str) -> Result<Self::Transport, TransportError> {
        if self.card.state().removed {
            return Err(TransportError::CardRemoved);
        }
        Ok(MockTransport::new(self.card.clone()))
    }
}
