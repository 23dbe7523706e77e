//! Interrupt to main-loop event queue.
//!
//! Interrupt handlers [`post`](EventQueue::post) events, the main loop takes
//! them out in FIFO order and [`invoke`](Event::invoke)s them. Posting never
//! blocks and never allocates: a full queue hands the event back.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};

use crate::cpu;

/// Source of an event, for filtering and diagnostics.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    Serial,
    Timer,
    ExternalInterrupt,
    Dma,
    User(u8),
}

/// Deferred work posted from interrupt context.
///
/// Not `Clone`: whoever holds the event is the only one who can run it.
#[derive(Debug)]
pub struct Event {
    component: Component,
    callback: fn(),
}

impl Event {
    pub const fn new(component: Component, callback: fn()) -> Self {
        Self { component, callback }
    }

    pub const fn component(&self) -> Component {
        self.component
    }

    /// Run the callback, consuming the event.
    pub fn invoke(self) {
        (self.callback)()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Event {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Event({})", self.component)
    }
}

/// Bounded FIFO of [`Event`]s shared between interrupt handlers and one consumer.
pub struct EventQueue<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, Event, N>,
}

impl<const N: usize> EventQueue<N> {
    pub const fn new() -> Self {
        Self { channel: Channel::new() }
    }

    /// Append `event`, or return it if the queue is full.
    pub fn post(&self, event: Event) -> Result<(), Event> {
        match self.channel.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!("event queue full, rejecting {:?} event", event.component());
                Err(event)
            }
        }
    }

    /// Take the oldest event, if any.
    pub fn try_event(&self) -> Option<Event> {
        self.channel.try_receive().ok()
    }

    /// Take the oldest event, sleeping until one is posted.
    pub fn wait(&self) -> Event {
        loop {
            if let Some(event) = self.try_event() {
                return event;
            }
            cpu::sleep_unless(|| !self.channel.is_empty());
        }
    }

    /// Take the oldest event, for async consumers.
    pub async fn next_event(&self) -> Event {
        self.channel.receive().await
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
