//! An implementation of the [StatusNotifierItem] broker protocol.
//!
//! - [`Watcher`] is the registry service (`org.kde.StatusNotifierWatcher`) that items and the host
//!   register with. It runs on a tokio runtime and can be used standalone.
//! - [`HostClient`] is the single consumer of the registry, embedded in the application that
//!   displays the items. It is driven from the owner's event loop via [`HostClient::as_fd`] and
//!   [`HostClient::process_pending`].
//! - [`ItemProxy`] wraps one published item for the owner, pulling icon data from the
//!   [`HostClient`] on demand.
//!
//! [StatusNotifierItem]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/

pub mod names;

mod error;
pub use error::*;

pub mod wire;

mod icon;
pub use icon::*;

pub mod transport;
pub use transport::Bus;

mod zbus_bus;
pub use zbus_bus::ZbusBus;

mod watcher;
pub use watcher::*;

mod host;
pub use host::*;

mod item;
pub use item::*;

#[cfg(test)]
mod testing;
