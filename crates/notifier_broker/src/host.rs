use std::{
    cell::RefCell,
    collections::VecDeque,
    os::fd::BorrowedFd,
    rc::Rc,
};

use nix::poll::PollFlags;

use crate::{
    names,
    transport::{Bus, MethodArgs, NameClaim, SignalRule},
    wire::Value,
    *,
};

mod event;
pub use event::*;

mod listeners;
pub use listeners::Handler;
use listeners::ListenerTable;

type TrayCallback = Rc<dyn Fn(&str)>;

/// Where an item lives on the bus, decoded from its item id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemAddress {
    pub destination: String,
    pub path: String,
}

impl ItemAddress {
    /// The format of `id` is `{bus}{object_path}` (e.g.
    /// `:1.50/org/ayatana/NotificationItem/nm_applet`), which is the format that is used for
    /// StatusNotifierWatcher's [RegisteredStatusNotifierItems property][rsni]. Without an object
    /// path, the item is looked for at [`names::ITEM_OBJECT`].
    ///
    /// [rsni]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/#registeredstatusnotifieritems
    pub fn parse(id: &str) -> Result<ItemAddress> {
        let (destination, path) = match id.split_once('/') {
            Some((destination, path)) => (destination, format!("/{}", path)),
            None => (id, names::ITEM_OBJECT.to_owned()),
        };
        if destination.is_empty() {
            return Err(Error::DbusAddressError(id.to_owned()));
        }
        Ok(ItemAddress { destination: destination.to_owned(), path })
    }
}

/// The StatusNotifierHost side of the protocol, embedded in the application showing the tray.
///
/// Everything happens on the owner's thread: the owner polls [`HostClient::as_fd`] for
/// [`HostClient::poll_flags`] and calls [`HostClient::process_pending`] whenever it is ready.
/// Item queries block until the item answered.
///
/// An item whose peer turns out to be gone is dropped locally, and the owner is told through the
/// `remove_tray_icon` callback on the next [`HostClient::process_pending`].
pub struct HostClient {
    bus: Box<dyn Bus>,
    host_name: RefCell<Option<String>>,
    known: RefCell<Vec<String>>,
    listeners: RefCell<ListenerTable>,
    gone: RefCell<VecDeque<String>>,
    add_tray_icon: RefCell<Option<TrayCallback>>,
    remove_tray_icon: RefCell<Option<TrayCallback>>,
}

impl HostClient {
    pub fn new(bus: impl Bus + 'static) -> Self {
        HostClient {
            bus: Box::new(bus),
            host_name: RefCell::new(None),
            known: RefCell::default(),
            listeners: RefCell::default(),
            gone: RefCell::default(),
            add_tray_icon: RefCell::new(None),
            remove_tray_icon: RefCell::new(None),
        }
    }

    /// Called with the id of every item that appears, including those present at startup.
    pub fn set_add_tray_icon(&self, f: impl Fn(&str) + 'static) {
        *self.add_tray_icon.borrow_mut() = Some(Rc::new(f));
    }

    /// Called with the id of every item that goes away.
    pub fn set_remove_tray_icon(&self, f: impl Fn(&str) + 'static) {
        *self.remove_tray_icon.borrow_mut() = Some(Rc::new(f));
    }

    /// Become a StatusNotifierHost and announce the items that are already registered.
    ///
    /// Fails if there is no watcher or we can't get a name on the bus.
    pub fn start(&self) -> Result<()> {
        // From <https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierHost/>:
        //
        // Instances of this service are registered on the Dbus session bus, under a name on the
        // form org.freedesktop.StatusNotifierHost-id where id is an unique identifier, that keeps
        // the names unique on the bus, such as the process-id of the application or another type
        // of identifier if more that one StatusNotifierHost is registered by the same process.
        let pid = std::process::id();
        let mut i = 0;
        let host_name = loop {
            let host_name = format!("{}-{}-{}", names::HOST_NAME_PREFIX, pid, i);
            match self.bus.request_name(&host_name).map_err(fatal)? {
                NameClaim::Acquired => break host_name,
                NameClaim::Taken => {}
            }
            i += 1;
        };
        log::info!("acquired {}", host_name);
        *self.host_name.borrow_mut() = Some(host_name.clone());

        self.bus.export_host().map_err(fatal)?;

        // start listening before reading the list, so no registration falls in between
        for member in [
            names::watcher::ITEM_REGISTERED,
            names::watcher::ITEM_UNREGISTERED,
            names::watcher::HOST_REGISTERED,
            names::watcher::HOST_UNREGISTERED,
        ] {
            self.bus.subscribe(&watcher_rule(member)).map_err(fatal)?;
        }

        if self.is_host_registered()? {
            log::info!("a StatusNotifierHost is already registered, not registering {}", host_name);
        } else {
            self.register_host(&host_name)?;
        }

        self.discover()
    }

    fn is_host_registered(&self) -> Result<bool> {
        let value = self
            .bus
            .get_property(names::WATCHER_BUS, names::WATCHER_OBJECT, names::WATCHER_INTERFACE, names::watcher::IS_HOST_REGISTERED)
            .map_err(fatal)?;
        value.as_bool().ok_or_else(|| Error::MalformedReply {
            what: names::watcher::IS_HOST_REGISTERED,
            detail: format!("expected a boolean, got {:?}", value),
        })
    }

    fn register_host(&self, host_name: &str) -> Result<()> {
        let registered = self.bus.call_method(
            names::WATCHER_BUS,
            names::WATCHER_OBJECT,
            names::WATCHER_INTERFACE,
            names::watcher::REGISTER_HOST,
            MethodArgs::Str(host_name.to_owned()),
        );
        match registered {
            Ok(()) => {
                log::info!("registered {} as StatusNotifierHost", host_name);
                Ok(())
            }
            // another host won the race since we asked
            Err(e) if self.is_host_registered().unwrap_or(false) => {
                log::warn!("could not register as StatusNotifierHost, continuing with the existing one: {}", e);
                Ok(())
            }
            Err(e) => Err(fatal(e)),
        }
    }

    fn discover(&self) -> Result<()> {
        let items = self
            .bus
            .get_property(
                names::WATCHER_BUS,
                names::WATCHER_OBJECT,
                names::WATCHER_INTERFACE,
                names::watcher::REGISTERED_ITEMS,
            )
            .map_err(fatal)?;
        for id in items.to_string_list() {
            // only to show what was found; an item that doesn't answer is still announced
            for property in [names::item::TITLE, names::item::ICON_NAME] {
                match self.probe(&id, property) {
                    Ok(value) => log::debug!("{} {} = {:?}", id, property, value),
                    Err(e) => log::warn!("could not read {} of {}: {}", property, id, e),
                }
            }
            self.add_item(&id);
        }
        Ok(())
    }

    fn probe(&self, id: &str, property: &str) -> Result<Value> {
        let addr = ItemAddress::parse(id)?;
        self.bus.get_property(&addr.destination, &addr.path, names::ITEM_INTERFACE, property)
    }

    /// Our well-known name on the bus, once started.
    pub fn host_name(&self) -> Option<String> {
        self.host_name.borrow().clone()
    }

    /// Ids of the items currently known, in the order they appeared.
    pub fn registered_items(&self) -> Vec<String> {
        self.known.borrow().clone()
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.bus.as_fd()
    }

    pub fn poll_flags(&self) -> PollFlags {
        self.bus.poll_flags()
    }

    /// Handle everything that arrived since the last call, including removals of items found to
    /// be gone. Returns once nothing is left.
    pub fn process_pending(&self) -> Result<()> {
        loop {
            let messages = self.bus.take_pending()?;
            let gone: Vec<String> = self.gone.borrow_mut().drain(..).collect();
            if messages.is_empty() && gone.is_empty() {
                return Ok(());
            }

            for id in gone {
                self.remove_item(&id);
            }
            for msg in messages {
                match TrayEvent::classify(&msg) {
                    Some(TrayEvent::ItemRegistered(id)) => self.add_item(&id),
                    Some(TrayEvent::ItemUnregistered(id)) => self.remove_item(&id),
                    Some(TrayEvent::HostRegistered) => log::info!("a StatusNotifierHost was registered"),
                    Some(TrayEvent::HostUnregistered(host)) => log::info!("StatusNotifierHost {} went away", host),
                    Some(event) => log::trace!("{:?}", event),
                    None => {}
                }

                let handlers = self.listeners.borrow().matching(&msg);
                for handler in handlers {
                    handler(&msg.arg);
                }
            }
        }
    }

    /// Follow an item that was not announced by the watcher, as when talking to a single item
    /// without [`HostClient::start`]. No `add_tray_icon` callback is made, but `remove_tray_icon`
    /// fires if the item turns out to be gone.
    pub fn track_item(&self, id: &str) {
        let mut known = self.known.borrow_mut();
        if !known.iter().any(|known| known == id) {
            known.push(id.to_owned());
        }
    }

    fn add_item(&self, id: &str) {
        if self.known.borrow().iter().any(|known| known == id) {
            log::warn!("Got duplicate new item: {:?}", id);
            return;
        }
        log::info!("new item: {}", id);
        self.known.borrow_mut().push(id.to_owned());

        let callback = self.add_tray_icon.borrow().clone();
        if let Some(callback) = callback {
            callback(id);
        }
    }

    fn remove_item(&self, id: &str) {
        let removed = {
            let mut known = self.known.borrow_mut();
            let position = known.iter().position(|known| known == id);
            position.map(|i| known.remove(i)).is_some()
        };
        if !removed {
            return;
        }
        log::info!("gone item: {}", id);

        let callback = self.remove_tray_icon.borrow().clone();
        if let Some(callback) = callback {
            callback(id);
        }
        self.remove_listeners(id);
    }

    /// Drop `id` at the next [`HostClient::process_pending`], and make sure that comes soon.
    fn schedule_removal(&self, id: &str) {
        let mut gone = self.gone.borrow_mut();
        if !gone.iter().any(|g| g == id) {
            gone.push_back(id.to_owned());
        }
        self.bus.wake();
    }

    fn item_failed(&self, id: &str, what: &str, e: Error) {
        if e.is_peer_gone() {
            log::info!("{} is gone ({}), dropping it", id, e);
            self.schedule_removal(id);
        } else {
            log::debug!("could not get {} of {}: {}", what, id, e);
        }
    }

    fn item_property(&self, id: &str, property: &'static str) -> Option<Value> {
        let addr = match ItemAddress::parse(id) {
            Ok(addr) => addr,
            Err(e) => {
                log::warn!("{}", e);
                return None;
            }
        };
        match self.bus.get_property(&addr.destination, &addr.path, names::ITEM_INTERFACE, property) {
            Ok(value) => Some(value),
            Err(e) => {
                self.item_failed(id, property, e);
                None
            }
        }
    }

    fn item_string(&self, id: &str, property: &'static str) -> String {
        let Some(value) = self.item_property(id, property) else {
            return String::new();
        };
        match value.as_str() {
            Some(s) => s.to_owned(),
            None => {
                let e = Error::MalformedReply { what: property, detail: format!("expected a string, got {:?}", value) };
                log::warn!("{}: {}", id, e);
                String::new()
            }
        }
    }

    /// Themed icon name of the item, or empty if it has none (or didn't answer).
    pub fn get_icon_name(&self, id: &str) -> String {
        self.item_string(id, names::item::ICON_NAME)
    }

    pub fn get_icon_title(&self, id: &str) -> String {
        self.item_string(id, names::item::TITLE)
    }

    /// Get the current status of the item.
    pub fn get_status(&self, id: &str) -> Option<Status> {
        let status = self.item_string(id, names::item::STATUS);
        match status.parse() {
            Ok(s) => Some(s),
            Err(_) => {
                if !status.is_empty() {
                    log::warn!("{}: invalid status {:?}", id, status);
                }
                None
            }
        }
    }

    /// The item's tooltip, or `None` if it couldn't be read.
    pub fn get_tooltip(&self, id: &str) -> Option<ToolTip> {
        self.item_property(id, names::item::TOOL_TIP).map(|value| ToolTip::from_wire(&value))
    }

    /// The variant of the item's pixmap icon best suited for `preferred_size` pixels, see
    /// [`select_pixmap`].
    pub fn get_icon_pixmap(&self, id: &str, preferred_size: i32) -> Option<Pixmap> {
        let value = self.item_property(id, names::item::ICON_PIXMAP)?;
        select_pixmap(pixmaps_from_wire(&value), preferred_size)
    }

    /// Where the item's context menu is exported, if it has one.
    pub fn get_menu_path(&self, id: &str) -> Option<MenuRef> {
        let value = self.item_property(id, names::item::MENU)?;
        let path = value.as_str()?;
        // "/NO_DBUSMENU" is what libappindicator reports for items without a menu
        if path.is_empty() || path == "/" || path == "/NO_DBUSMENU" {
            return None;
        }
        let addr = ItemAddress::parse(id).ok()?;
        Some(MenuRef { destination: addr.destination, path: path.to_owned() })
    }

    /// Everything needed to show the item, read in one go.
    pub fn fetch_icon_state(&self, id: &str, preferred_size: i32) -> IconState {
        let icon_name = self.get_icon_name(id);
        let pixmaps = if icon_name.is_empty() {
            self.get_icon_pixmap(id, preferred_size).into_iter().collect()
        } else {
            Vec::new()
        };
        IconState {
            icon_name,
            pixmaps,
            tooltip: self.get_tooltip(id),
            menu: self.get_menu_path(id),
            title: self.get_icon_title(id),
        }
    }

    fn call_item(&self, id: &str, method: &'static str, x: i32, y: i32) {
        let addr = match ItemAddress::parse(id) {
            Ok(addr) => addr,
            Err(e) => {
                log::warn!("{}", e);
                return;
            }
        };
        let result = self.bus.call_method(&addr.destination, &addr.path, names::ITEM_INTERFACE, method, MethodArgs::Point(x, y));
        if let Err(e) = result {
            self.item_failed(id, method, e);
        }
    }

    /// Ask the item to do its primary action, as on a left click at `(x, y)`.
    pub fn icon_activate(&self, id: &str, x: i32, y: i32) {
        self.call_item(id, names::item::ACTIVATE, x, y)
    }

    /// Ask the item to show its own context menu at `(x, y)`.
    pub fn icon_context_menu(&self, id: &str, x: i32, y: i32) {
        self.call_item(id, names::item::CONTEXT_MENU, x, y)
    }

    /// Call `handler` for every `signal` the item `id` sends on [`names::ITEM_INTERFACE`].
    pub fn add_listener(&self, id: &str, signal: &str, handler: impl Fn(&str) + 'static) -> Result<()> {
        let addr = ItemAddress::parse(id)?;
        let rule = SignalRule::new(&addr.destination, &addr.path, names::ITEM_INTERFACE, signal);
        self.listen(id, rule, Rc::new(handler))
    }

    /// Call `handler` for every matching signal. The handler is removed with
    /// [`HostClient::remove_listeners`] given `{destination}{path}`.
    pub fn add_listener_full(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        signal: &str,
        handler: impl Fn(&str) + 'static,
    ) -> Result<()> {
        let owner = format!("{}{}", destination, path);
        self.listen(&owner, SignalRule::new(destination, path, interface, signal), Rc::new(handler))
    }

    fn listen(&self, owner: &str, rule: SignalRule, handler: Handler) -> Result<()> {
        let is_new = self.listeners.borrow_mut().add(owner, rule.clone(), handler);
        if is_new {
            if let Err(e) = self.bus.subscribe(&rule) {
                self.listeners.borrow_mut().remove_owner(owner);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Remove every handler added for `id`.
    pub fn remove_listeners(&self, id: &str) {
        let unused = self.listeners.borrow_mut().remove_owner(id);
        for rule in unused {
            if let Err(e) = self.bus.unsubscribe(&rule) {
                log::debug!("failed to unsubscribe from {:?}: {}", rule, e);
            }
        }
        log::trace!("{} listeners left", self.listeners.borrow().len());
    }
}

fn watcher_rule(member: &str) -> SignalRule {
    SignalRule::new(names::WATCHER_BUS, names::WATCHER_OBJECT, names::WATCHER_INTERFACE, member)
}

/// Failures during startup end the host.
fn fatal(e: Error) -> Error {
    match e {
        e @ (Error::Connection(_) | Error::MalformedReply { .. }) => e,
        e => Error::Connection(e.to_string()),
    }
}
