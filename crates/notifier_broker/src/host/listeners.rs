use std::rc::Rc;

use crate::transport::{SignalMessage, SignalRule};

/// Handler for one signal. Receives the signal's string argument, which is empty for signals
/// that carry none.
pub type Handler = Rc<dyn Fn(&str)>;

struct Listener {
    owner: String,
    rule: SignalRule,
    handler: Handler,
}

/// Handlers registered per owner (usually an item id) and signal, kept in registration order.
#[derive(Default)]
pub struct ListenerTable {
    listeners: Vec<Listener>,
}

impl ListenerTable {
    /// Add a handler. Returns whether `rule` is new to the table, i.e. has to be subscribed.
    pub fn add(&mut self, owner: &str, rule: SignalRule, handler: Handler) -> bool {
        let is_new = !self.listeners.iter().any(|l| l.rule == rule);
        self.listeners.push(Listener { owner: owner.to_owned(), rule, handler });
        is_new
    }

    /// Remove every handler of `owner`. Returns the rules nobody listens to anymore.
    pub fn remove_owner(&mut self, owner: &str) -> Vec<SignalRule> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.listeners).into_iter().partition(|l| l.owner == owner);
        self.listeners = kept;

        let mut unused: Vec<SignalRule> = Vec::new();
        for listener in removed {
            if !unused.contains(&listener.rule) && !self.listeners.iter().any(|l| l.rule == listener.rule) {
                unused.push(listener.rule);
            }
        }
        unused
    }

    /// Handlers interested in `msg`, in the order they were added.
    ///
    /// The handlers are handed out rather than called here, so they are free to change the table.
    pub fn matching(&self, msg: &SignalMessage) -> Vec<Handler> {
        self.listeners.iter().filter(|l| l.rule.matches(msg)).map(|l| l.handler.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}
