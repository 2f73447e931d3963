use std::{cell::Cell, rc::Rc};

use crate::*;

/// Recognised values of [`org.freedesktop.StatusNotifierItem.Status`].
///
/// [`org.freedesktop.StatusNotifierItem.Status`]: https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/#org.freedesktop.statusnotifieritem.status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The item doesn't convey important information to the user, it can be considered an "idle"
    /// status and is likely that visualizations will chose to hide it.
    Passive,
    /// The item is active, is more important that the item will be shown in some way to the user.
    Active,
    /// The item carries really important information for the user, such as battery charge running
    /// out and is wants to incentive the direct user intervention. Visualizations should emphasize
    /// in some way the items with NeedsAttention status.
    NeedsAttention,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ParseStatusError;

impl std::str::FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, ParseStatusError> {
        match s {
            "Passive" => Ok(Status::Passive),
            "Active" => Ok(Status::Active),
            "NeedsAttention" => Ok(Status::NeedsAttention),
            _ => Err(ParseStatusError),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Map a Linux input event code (`BTN_LEFT` and friends).
    pub fn from_evdev(code: u32) -> Option<MouseButton> {
        match code {
            0x110 => Some(MouseButton::Left),
            0x111 => Some(MouseButton::Right),
            0x112 => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

/// Resolves themed icon names, e.g. through the freedesktop icon theme.
pub trait IconLookup {
    type Icon;

    fn lookup(&self, name: &str, size: i32) -> Option<Self::Icon>;
}

/// Where an item gets drawn.
pub trait Canvas {
    type Icon;

    fn draw_icon(&mut self, icon: &Self::Icon, size: i32);
    fn draw_surface(&mut self, surface: &PixelSurface, size: i32);
    /// Nothing to show.
    fn clear(&mut self);
}

/// Shows an item's exported menu.
pub trait MenuLauncher {
    fn launch(&self, menu: &MenuRef, x: i32, y: i32) -> std::io::Result<()>;
}

/// Runs an external program as `{program} {destination} {path}`, which renders the menu itself.
#[derive(Debug, Clone)]
pub struct CommandMenuLauncher {
    pub program: String,
}

impl MenuLauncher for CommandMenuLauncher {
    fn launch(&self, menu: &MenuRef, _x: i32, _y: i32) -> std::io::Result<()> {
        let mut child = std::process::Command::new(&self.program).arg(&menu.destination).arg(&menu.path).spawn()?;
        let program = self.program.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) if !status.success() => log::warn!("{} exited with {}", program, status),
            Ok(_) => {}
            Err(e) => log::warn!("failed to wait for {}: {}", program, e),
        });
        Ok(())
    }
}

/// One tray item, as seen by the owner that draws it.
///
/// The item's signals only mark the proxy dirty and ask the owner for a repaint; properties are
/// read again on the next [`ItemProxy::render`].
pub struct ItemProxy {
    id: String,
    host: Rc<HostClient>,
    size: i32,
    icon_name: String,
    surface: Option<PixelSurface>,
    dirty: Rc<Cell<bool>>,
}

impl ItemProxy {
    /// Start following the item `id`. `repaint` is called with the id whenever the item changed.
    pub fn new(host: Rc<HostClient>, id: &str, size: i32, repaint: impl Fn(&str) + 'static) -> Result<Self> {
        if id.is_empty() || id == "/" {
            return Err(Error::InvalidArgs(format!("not an item id: {:?}", id)));
        }

        let proxy = ItemProxy {
            id: id.to_owned(),
            host,
            size,
            icon_name: String::new(),
            surface: None,
            dirty: Rc::new(Cell::new(true)),
        };

        let repaint: Rc<dyn Fn(&str)> = Rc::new(repaint);
        for property in ItemProperty::ALL {
            let dirty = proxy.dirty.clone();
            let repaint = repaint.clone();
            let id = proxy.id.clone();
            let handler = move |_: &str| {
                log::debug!("{} changed its {:?}", id, property);
                dirty.set(true);
                repaint(&id);
            };
            // dropping the proxy removes whatever was added already
            proxy.host.add_listener(&proxy.id, property.signal_name(), handler)?;
        }
        Ok(proxy)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Size the item is drawn at, also used to pick among its pixmaps.
    pub fn set_size(&mut self, size: i32) {
        if size != self.size {
            self.size = size;
            self.dirty.set(true);
        }
    }

    /// Draw the item: its themed icon if it names one that `lookup` knows, its pixmap otherwise.
    pub fn render<C, L>(&mut self, canvas: &mut C, lookup: &L)
    where
        C: Canvas,
        L: IconLookup<Icon = C::Icon>,
    {
        if self.dirty.replace(false) {
            self.refresh();
        }

        if !self.icon_name.is_empty() {
            if let Some(icon) = lookup.lookup(&self.icon_name, self.size) {
                canvas.draw_icon(&icon, self.size);
                return;
            }
            log::debug!("icon {:?} of {} not found, trying its pixmap", self.icon_name, self.id);
            if self.surface.is_none() {
                self.load_pixmap();
            }
        }

        match &self.surface {
            Some(surface) => canvas.draw_surface(surface, self.size),
            None => canvas.clear(),
        }
    }

    fn refresh(&mut self) {
        self.icon_name = self.host.get_icon_name(&self.id);
        if self.icon_name.is_empty() {
            self.load_pixmap();
        } else {
            self.surface = None;
        }
    }

    fn load_pixmap(&mut self) {
        // release the old surface before the new one is decoded
        self.surface = None;
        self.surface = self.host.get_icon_pixmap(&self.id, self.size).map(PixelSurface::from);
    }

    /// Text to show while the pointer is over the item.
    pub fn on_hover(&self) -> String {
        match self.host.get_tooltip(&self.id) {
            Some(tooltip) if !tooltip.is_empty() => format!("{}\n{}", tooltip.title, tooltip.text),
            _ => self.host.get_icon_title(&self.id),
        }
    }

    /// React to a click at `(x, y)`. A right click opens the item's exported menu through
    /// `launcher`, or asks the item to show its own.
    pub fn on_click(&self, button: MouseButton, x: i32, y: i32, launcher: &dyn MenuLauncher) {
        match button {
            MouseButton::Left => self.host.icon_activate(&self.id, x, y),
            MouseButton::Right => match self.host.get_menu_path(&self.id) {
                Some(menu) => {
                    if let Err(e) = launcher.launch(&menu, x, y) {
                        log::warn!("failed to show the menu of {}: {}", self.id, e);
                        self.host.icon_context_menu(&self.id, x, y);
                    }
                }
                None => self.host.icon_context_menu(&self.id, x, y),
            },
            MouseButton::Middle => {}
        }
    }
}

impl Drop for ItemProxy {
    fn drop(&mut self) {
        self.host.remove_listeners(&self.id);
    }
}
