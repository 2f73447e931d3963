use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use zbus::{interface, Interface};

use crate::{names, Error};

pub mod registry;
use registry::{Registry, Removal};

/// An instance of [`org.kde.StatusNotifierWatcher`]. It only tracks which items and which host
/// exist, and doesn't have any logic for displaying items (for that, see
/// [`HostClient`][`crate::HostClient`]).
///
/// [`org.kde.StatusNotifierWatcher`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/
#[derive(Debug, Default)]
pub struct Watcher {
    tasks: tokio::task::JoinSet<()>,

    // Intentionally using std::sync::Mutex instead of tokio's async mutex, since we don't need to
    // hold the mutex across an await.
    registry: Arc<Mutex<Registry>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap() // unwrap: mutex poisoning is okay
}

/// Implementation of the `StatusNotifierWatcher` service.
///
/// Methods and properties correspond to methods and properties on the DBus service that can be
/// used by others, while signals are events that we generate that other services listen to.
#[interface(name = "org.kde.StatusNotifierWatcher")]
impl Watcher {
    /// RegisterStatusNotifierHost method
    async fn register_status_notifier_host(
        &self,
        service: &str,
        #[zbus(header)] hdr: zbus::message::Header<'_>,
        #[zbus(connection)] con: &zbus::Connection,
        #[zbus(signal_context)] ctxt: zbus::SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let sender = sender_of(&hdr)?;

        if let Err(e) = lock(&self.registry).register_host(service, &sender) {
            log::warn!("refusing host {} from {}: {}", service, sender, e);
            return Err(fdo_error(e));
        }
        log::info!("new host: {} ({})", service, sender);

        Watcher::is_status_notifier_host_registered_refresh(&ctxt).await?;
        Watcher::status_notifier_host_registered(&ctxt).await?;

        self.drop_if_gone(con, &ctxt, &sender).await;
        Ok(())
    }

    /// StatusNotifierHostRegistered signal.
    #[zbus(signal)]
    async fn status_notifier_host_registered(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()>;

    /// StatusNotifierHostUnregistered signal
    #[zbus(signal)]
    async fn status_notifier_host_unregistered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// IsStatusNotifierHostRegistered property
    #[zbus(property)]
    async fn is_status_notifier_host_registered(&self) -> bool {
        lock(&self.registry).is_host_registered()
    }

    // ------------------------------------------------------------------------

    /// RegisterStatusNotifierItem method
    async fn register_status_notifier_item(
        &self,
        service: &str,
        #[zbus(header)] hdr: zbus::message::Header<'_>,
        #[zbus(connection)] con: &zbus::Connection,
        #[zbus(signal_context)] ctxt: zbus::SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let sender = sender_of(&hdr)?;

        let registered = lock(&self.registry).register_item(service, &sender);
        let item = match registered {
            Ok(Some(item)) => item,
            Ok(None) => {
                log::info!("new item: {} from {} (duplicate)", service, sender);
                return Ok(());
            }
            Err(e) => {
                log::warn!("refusing item {:?} from {}: {}", service, sender, e);
                return Err(fdo_error(e));
            }
        };
        log::info!("new item: {}", item);

        Watcher::registered_status_notifier_items_refresh(&ctxt).await?;
        Watcher::status_notifier_item_registered(&ctxt, &item).await?;

        self.drop_if_gone(con, &ctxt, &sender).await;
        Ok(())
    }

    /// StatusNotifierItemRegistered signal
    #[zbus(signal)]
    async fn status_notifier_item_registered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// StatusNotifierItemUnregistered signal
    #[zbus(signal)]
    async fn status_notifier_item_unregistered(ctxt: &zbus::SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// RegisteredStatusNotifierItems property
    #[zbus(property)]
    async fn registered_status_notifier_items(&self) -> Vec<String> {
        lock(&self.registry).registered_items()
    }

    // ------------------------------------------------------------------------

    /// ProtocolVersion property
    #[zbus(property)]
    fn protocol_version(&self) -> u32 {
        names::PROTOCOL_VERSION
    }
}

impl Watcher {
    /// Create a new Watcher.
    pub fn new() -> Watcher {
        Default::default()
    }

    /// Attach and run the Watcher (in the background) on a connection.
    ///
    /// Returns whether this watcher became the primary owner of
    /// [`names::WATCHER_BUS`]. If another watcher already owns it, the object is still served but
    /// nobody will find it.
    pub async fn attach_to(mut self, con: &zbus::Connection) -> zbus::Result<bool> {
        // subscribe before anyone can register, so no disconnect goes unnoticed
        let dbus = zbus::fdo::DBusProxy::new(con).await?;
        let owner_changes = dbus.receive_name_owner_changed().await?;
        self.tasks.spawn(track_liveness(con.clone(), owner_changes, self.registry.clone()));

        if !con.object_server().at(names::WATCHER_OBJECT, self).await? {
            return Err(zbus::Error::Failure(format!(
                "Object already exists at {} on this connection -- is StatusNotifierWatcher already running?",
                names::WATCHER_OBJECT
            )));
        }

        let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];
        match con.request_name_with_flags(names::WATCHER_BUS, flags.into_iter().collect()).await {
            Ok(zbus::fdo::RequestNameReply::PrimaryOwner | zbus::fdo::RequestNameReply::AlreadyOwner) => Ok(true),
            Ok(_) | Err(zbus::Error::NameTaken) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// If `sender` left the bus before its registration was recorded, the disconnect was already
    /// seen by [`track_liveness`] and has to be replayed here.
    async fn drop_if_gone(&self, con: &zbus::Connection, ctxt: &zbus::SignalContext<'_>, sender: &str) {
        let still_there = has_owner(con, sender).await;
        let removals = removals_if_gone(&self.registry, sender, still_there);
        announce_removals(ctxt, removals).await;
    }

    /// Equivalent to `is_status_notifier_host_registered_invalidate`, but without requiring
    /// `self`.
    async fn is_status_notifier_host_registered_refresh(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()> {
        zbus::fdo::Properties::properties_changed(
            ctxt,
            Self::name(),
            &std::collections::HashMap::new(),
            &[names::watcher::IS_HOST_REGISTERED],
        )
        .await
    }

    /// Equivalent to `registered_status_notifier_items_invalidate`, but without requiring `self`.
    async fn registered_status_notifier_items_refresh(ctxt: &zbus::SignalContext<'_>) -> zbus::Result<()> {
        zbus::fdo::Properties::properties_changed(
            ctxt,
            Self::name(),
            &std::collections::HashMap::new(),
            &[names::watcher::REGISTERED_ITEMS],
        )
        .await
    }
}

fn sender_of(hdr: &zbus::message::Header<'_>) -> zbus::fdo::Result<String> {
    match hdr.sender() {
        Some(sender) => Ok(sender.to_string()),
        None => {
            log::warn!("unknown sender");
            Err(zbus::fdo::Error::InvalidArgs("Unknown bus address".into()))
        }
    }
}

fn fdo_error(e: Error) -> zbus::fdo::Error {
    match e {
        Error::AlreadyRegistered(_) => zbus::fdo::Error::Failed("Sorry, a host has already been registered.".into()),
        Error::InvalidArgs(msg) => zbus::fdo::Error::InvalidArgs(msg),
        e => zbus::fdo::Error::Failed(e.to_string()),
    }
}

async fn has_owner(con: &zbus::Connection, peer: &str) -> zbus::fdo::Result<bool> {
    let dbus = zbus::fdo::DBusProxy::new(con).await?;
    let name = zbus::names::BusName::try_from(peer).map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
    dbus.name_has_owner(name).await
}

/// Forget everything held by peers as they disconnect.
async fn track_liveness(
    con: zbus::Connection,
    mut owner_changes: zbus::fdo::NameOwnerChangedStream<'static>,
    registry: Arc<Mutex<Registry>>,
) {
    let ctxt = match zbus::SignalContext::new(&con, names::WATCHER_OBJECT) {
        Ok(ctxt) => ctxt,
        Err(e) => {
            log::error!("failed to create signal context: {}", e);
            return;
        }
    };

    while let Some(sig) = owner_changes.next().await {
        let args = match sig.args() {
            Ok(args) => args,
            Err(e) => {
                log::warn!("malformed NameOwnerChanged signal: {}", e);
                continue;
            }
        };
        if args.new_owner().is_some() {
            continue;
        }
        let removals = lock(&registry).peer_vanished(args.name().as_str());
        announce_removals(&ctxt, removals).await;
    }
    log::debug!("stopped tracking peer liveness");
}

fn removals_if_gone(registry: &Mutex<Registry>, sender: &str, still_there: zbus::fdo::Result<bool>) -> Vec<Removal> {
    match still_there {
        Ok(true) => Vec::new(),
        Ok(false) => {
            log::info!("{} left before its registration completed", sender);
            lock(registry).peer_vanished(sender)
        }
        Err(e) => {
            log::warn!("failed to check whether {} is still connected: {}", sender, e);
            Vec::new()
        }
    }
}

/// Receives one announcement per entry that went away.
trait RemovalSink {
    async fn item_unregistered(&self, item: &str) -> zbus::Result<()>;
    async fn host_unregistered(&self, host: &str) -> zbus::Result<()>;
}

impl RemovalSink for zbus::SignalContext<'_> {
    async fn item_unregistered(&self, item: &str) -> zbus::Result<()> {
        Watcher::registered_status_notifier_items_refresh(self).await?;
        Watcher::status_notifier_item_unregistered(self, item).await
    }

    async fn host_unregistered(&self, host: &str) -> zbus::Result<()> {
        Watcher::is_status_notifier_host_registered_refresh(self).await?;
        Watcher::status_notifier_host_unregistered(self, host).await
    }
}

async fn announce_removals(sink: &impl RemovalSink, removals: Vec<Removal>) {
    for removal in removals {
        let result = match &removal {
            Removal::Item(item) => {
                log::info!("gone item: {}", item);
                sink.item_unregistered(item).await
            }
            Removal::Host(host) => {
                log::info!("lost host: {}", host);
                sink.host_unregistered(host).await
            }
        };
        if let Err(e) = result {
            log::error!("failed to signal Watcher: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingSink {
        sent: RefCell<Vec<String>>,
    }

    impl RemovalSink for RecordingSink {
        async fn item_unregistered(&self, item: &str) -> zbus::Result<()> {
            self.sent.borrow_mut().push(format!("item {}", item));
            Ok(())
        }

        async fn host_unregistered(&self, host: &str) -> zbus::Result<()> {
            self.sent.borrow_mut().push(format!("host {}", host));
            Ok(())
        }
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
    }

    #[test]
    fn test_fdo_error_for_second_host() {
        let e = fdo_error(Error::AlreadyRegistered("A".into()));
        assert!(matches!(e, zbus::fdo::Error::Failed(msg) if msg.contains("already been registered")));
        let e = fdo_error(Error::InvalidArgs("empty".into()));
        assert!(matches!(e, zbus::fdo::Error::InvalidArgs(msg) if msg == "empty"));
    }

    #[test]
    fn test_one_signal_per_removal() {
        let sink = RecordingSink::default();
        let removals =
            vec![Removal::Item(":1.5/StatusNotifierItem".into()), Removal::Item(":1.5/other".into()), Removal::Host("org.test.Host".into())];
        block_on(announce_removals(&sink, removals));
        assert_eq!(
            *sink.sent.borrow(),
            vec![
                "item :1.5/StatusNotifierItem".to_string(),
                "item :1.5/other".to_string(),
                "host org.test.Host".to_string(),
            ]
        );
    }

    #[test]
    fn test_registration_from_vanished_peer_is_dropped_once() {
        let registry = Mutex::new(Registry::new());
        lock(&registry).register_item(":1.5", ":1.5").unwrap();
        lock(&registry).register_host("org.test.Host", ":1.6").unwrap();

        assert_eq!(removals_if_gone(&registry, ":1.5", Ok(true)), vec![]);
        assert_eq!(
            removals_if_gone(&registry, ":1.5", Err(zbus::fdo::Error::Failed("no bus".into()))),
            vec![]
        );
        assert_eq!(lock(&registry).registered_items(), vec![":1.5/StatusNotifierItem".to_string()]);

        let sink = RecordingSink::default();
        let removals = removals_if_gone(&registry, ":1.5", Ok(false));
        block_on(announce_removals(&sink, removals));
        assert_eq!(*sink.sent.borrow(), vec!["item :1.5/StatusNotifierItem".to_string()]);
        assert!(lock(&registry).registered_items().is_empty());
        assert!(lock(&registry).is_host_registered());

        // the disconnect was already handled, replaying it changes nothing
        assert_eq!(removals_if_gone(&registry, ":1.5", Ok(false)), vec![]);
    }
}
