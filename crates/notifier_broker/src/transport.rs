//! The seam between the host side of the protocol and the message bus carrying it.
//!
//! [`HostClient`](crate::HostClient) only talks to the bus through [`Bus`], which makes it
//! possible to drive it from any event loop and to test it without a session bus.
//! [`ZbusBus`](crate::ZbusBus) is the implementation used in practice.

use std::os::fd::BorrowedFd;

use nix::poll::PollFlags;

use crate::{wire::Value, Result};

/// Arguments of the few method calls this protocol makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodArgs {
    Str(String),
    Point(i32, i32),
}

/// Outcome of asking the bus for a well-known name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameClaim {
    Acquired,
    Taken,
}

/// Selects incoming signals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalRule {
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
}

impl SignalRule {
    pub fn new(sender: &str, path: &str, interface: &str, member: &str) -> Self {
        Self { sender: sender.to_owned(), path: path.to_owned(), interface: interface.to_owned(), member: member.to_owned() }
    }

    /// Signals always carry the unique name of their sender, so a rule naming a well-known name
    /// can only be checked by the bus daemon and is not compared here.
    pub fn matches(&self, msg: &SignalMessage) -> bool {
        let sender_ok = !self.sender.starts_with(':') || self.sender == msg.sender;
        sender_ok && self.path == msg.path && self.interface == msg.interface && self.member == msg.member
    }
}

/// A received signal. Only the first string argument is kept, as that is all this protocol sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub arg: String,
}

/// Connection to a message bus, as seen from a single-threaded owner.
///
/// All calls block until the peer answered; there is no timeout beyond what the bus itself
/// enforces. Incoming signals are queued until [`Bus::take_pending`] collects them.
pub trait Bus {
    /// Try to become the primary owner of `name`, without queueing.
    fn request_name(&self, name: &str) -> Result<NameClaim>;

    /// Serve the host's own object at [`HOST_OBJECT`](crate::names::HOST_OBJECT).
    fn export_host(&self) -> Result<()>;

    fn get_property(&self, destination: &str, path: &str, interface: &str, property: &str) -> Result<Value>;

    fn call_method(&self, destination: &str, path: &str, interface: &str, method: &str, args: MethodArgs) -> Result<()>;

    /// Ask the bus to route matching signals to us.
    fn subscribe(&self, rule: &SignalRule) -> Result<()>;

    fn unsubscribe(&self, rule: &SignalRule) -> Result<()>;

    /// Descriptor that becomes readable when [`Bus::take_pending`] has something to return.
    fn as_fd(&self) -> BorrowedFd<'_>;

    fn poll_flags(&self) -> PollFlags {
        PollFlags::POLLIN
    }

    /// Make the descriptor readable, so the owner calls back in even without new messages.
    fn wake(&self);

    /// Every signal received so far, in arrival order.
    fn take_pending(&self) -> Result<Vec<SignalMessage>>;
}
