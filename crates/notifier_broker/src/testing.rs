//! A scripted [`Bus`] for tests: property replies and vanished peers are set up front, calls are
//! recorded, and signals are injected with [`FakeBus::emit`].

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet, VecDeque},
    os::fd::{AsFd, BorrowedFd},
    rc::Rc,
};

use nix::sys::eventfd::{EfdFlags, EventFd};

use crate::{
    names,
    transport::{Bus, MethodArgs, NameClaim, SignalMessage, SignalRule},
    wire::Value,
    Error, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub destination: String,
    pub path: String,
    pub method: String,
    pub args: MethodArgs,
}

struct State {
    properties: RefCell<HashMap<(String, String, String), Value>>,
    gone: RefCell<HashSet<String>>,
    taken_names: RefCell<HashSet<String>>,
    claimed: RefCell<Vec<String>>,
    exported: RefCell<bool>,
    calls: RefCell<Vec<Call>>,
    subscriptions: RefCell<Vec<SignalRule>>,
    pending: RefCell<VecDeque<SignalMessage>>,
    reads: RefCell<Vec<String>>,
    ready: EventFd,
}

/// Cloning shares the state, so a test keeps one handle while the code under test owns another.
#[derive(Clone)]
pub struct FakeBus(Rc<State>);

impl FakeBus {
    pub fn new() -> Self {
        let ready = EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK).unwrap();
        FakeBus(Rc::new(State {
            properties: RefCell::default(),
            gone: RefCell::default(),
            taken_names: RefCell::default(),
            claimed: RefCell::default(),
            exported: RefCell::new(false),
            calls: RefCell::default(),
            subscriptions: RefCell::default(),
            pending: RefCell::default(),
            reads: RefCell::default(),
            ready,
        }))
    }

    /// A bus with a running watcher that has no host yet and lists `items`.
    pub fn with_watcher(items: &[&str]) -> Self {
        let bus = FakeBus::new();
        bus.set_watcher_property(names::watcher::IS_HOST_REGISTERED, false);
        let items: Vec<String> = items.iter().map(|s| s.to_string()).collect();
        bus.set_watcher_property(names::watcher::REGISTERED_ITEMS, items);
        bus
    }

    pub fn set_property(&self, destination: &str, path: &str, property: &str, value: impl Into<Value>) {
        self.0.properties.borrow_mut().insert((destination.into(), path.into(), property.into()), value.into());
    }

    pub fn set_watcher_property(&self, property: &str, value: impl Into<Value>) {
        self.set_property(names::WATCHER_BUS, names::WATCHER_OBJECT, property, value);
    }

    pub fn set_gone(&self, peer: &str) {
        self.0.gone.borrow_mut().insert(peer.to_owned());
    }

    pub fn take_name(&self, name: &str) {
        self.0.taken_names.borrow_mut().insert(name.to_owned());
    }

    pub fn claimed(&self) -> Vec<String> {
        self.0.claimed.borrow().clone()
    }

    pub fn exported(&self) -> bool {
        *self.0.exported.borrow()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.calls.borrow().clone()
    }

    /// Properties read so far, as `destination path property`.
    pub fn reads(&self) -> Vec<String> {
        self.0.reads.borrow().clone()
    }

    pub fn subscriptions(&self) -> Vec<SignalRule> {
        self.0.subscriptions.borrow().clone()
    }

    pub fn emit(&self, sender: &str, path: &str, interface: &str, member: &str, arg: &str) {
        self.0.pending.borrow_mut().push_back(SignalMessage {
            sender: sender.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            arg: arg.into(),
        });
        self.wake();
    }

    pub fn emit_watcher(&self, member: &str, arg: &str) {
        self.emit(":1.1", names::WATCHER_OBJECT, names::WATCHER_INTERFACE, member, arg);
    }

    /// Whether the readiness descriptor would wake a poll right now. Consumes the readiness.
    pub fn is_ready(&self) -> bool {
        self.0.ready.read().is_ok()
    }

    fn check_peer(&self, destination: &str) -> Result<()> {
        if self.0.gone.borrow().contains(destination) {
            Err(Error::PeerGone(destination.to_owned()))
        } else {
            Ok(())
        }
    }
}

impl Bus for FakeBus {
    fn request_name(&self, name: &str) -> Result<NameClaim> {
        if self.0.taken_names.borrow().contains(name) {
            return Ok(NameClaim::Taken);
        }
        self.0.taken_names.borrow_mut().insert(name.to_owned());
        self.0.claimed.borrow_mut().push(name.to_owned());
        Ok(NameClaim::Acquired)
    }

    fn export_host(&self) -> Result<()> {
        *self.0.exported.borrow_mut() = true;
        Ok(())
    }

    fn get_property(&self, destination: &str, path: &str, _interface: &str, property: &str) -> Result<Value> {
        self.0.reads.borrow_mut().push(format!("{} {} {}", destination, path, property));
        self.check_peer(destination)?;
        let key = (destination.to_owned(), path.to_owned(), property.to_owned());
        self.0.properties.borrow().get(&key).cloned().ok_or_else(|| Error::Unsupported(property.to_owned()))
    }

    fn call_method(&self, destination: &str, path: &str, _interface: &str, method: &str, args: MethodArgs) -> Result<()> {
        self.check_peer(destination)?;
        self.0.calls.borrow_mut().push(Call {
            destination: destination.to_owned(),
            path: path.to_owned(),
            method: method.to_owned(),
            args,
        });
        Ok(())
    }

    fn subscribe(&self, rule: &SignalRule) -> Result<()> {
        self.0.subscriptions.borrow_mut().push(rule.clone());
        Ok(())
    }

    fn unsubscribe(&self, rule: &SignalRule) -> Result<()> {
        let mut subscriptions = self.0.subscriptions.borrow_mut();
        if let Some(i) = subscriptions.iter().position(|r| r == rule) {
            subscriptions.remove(i);
        }
        Ok(())
    }

    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.ready.as_fd()
    }

    fn wake(&self) {
        self.0.ready.write(1).unwrap();
    }

    fn take_pending(&self) -> Result<Vec<SignalMessage>> {
        let _ = self.0.ready.read();
        Ok(self.0.pending.borrow_mut().drain(..).collect())
    }
}
