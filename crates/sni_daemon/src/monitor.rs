//! A headless tray: the owner side of [`HostClient`], which logs instead of drawing.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    path::PathBuf,
    rc::{Rc, Weak},
};

use anyhow::{bail, Context, Result};
use nix::poll::{poll, PollFd, PollTimeout};
use notifier_broker::{
    Canvas, CommandMenuLauncher, HostClient, IconLookup, ItemProxy, MouseButton, PixelSurface, ZbusBus,
};

type Items = Rc<RefCell<HashMap<String, ItemProxy>>>;
type RepaintQueue = Rc<RefCell<Vec<String>>>;

pub fn run(icon_size: i32) -> Result<()> {
    let bus = ZbusBus::session().context("Failed to connect to the session bus")?;
    let host = Rc::new(HostClient::new(bus));
    let items: Items = Rc::default();
    let repaint: RepaintQueue = Rc::default();

    host.set_add_tray_icon({
        let host = Rc::downgrade(&host);
        let items = items.clone();
        let repaint = repaint.clone();
        move |id| add_item(&host, &items, &repaint, id, icon_size)
    });
    host.set_remove_tray_icon({
        let items = items.clone();
        move |id| {
            let proxy = items.borrow_mut().remove(id);
            drop(proxy);
            log::info!("- {}", id);
        }
    });

    host.start().context("Failed to start the StatusNotifierHost")?;
    let lookup = ThemeLookup::from_env();

    loop {
        render_pending(&host, &items, &repaint, &lookup);

        let mut fds = [PollFd::new(host.as_fd(), host.poll_flags())];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) | Err(nix::errno::Errno::EINTR) => {}
            Err(e) => return Err(e).context("Failed to poll the bus"),
        }
        host.process_pending().context("Lost the bus connection")?;
    }
}

fn add_item(host: &Weak<HostClient>, items: &Items, repaint: &RepaintQueue, id: &str, icon_size: i32) {
    let Some(host) = host.upgrade() else {
        return;
    };
    let proxy = ItemProxy::new(host.clone(), id, icon_size, {
        let repaint = repaint.clone();
        move |id| repaint.borrow_mut().push(id.to_owned())
    });
    match proxy {
        Ok(proxy) => {
            let state = host.fetch_icon_state(id, icon_size);
            let menu = state.menu.map(|m| format!("{}{}", m.destination, m.path)).unwrap_or_else(|| "none".to_owned());
            log::info!("+ {} {:?} (menu: {})", id, state.title, menu);
            items.borrow_mut().insert(id.to_owned(), proxy);
            repaint.borrow_mut().push(id.to_owned());
        }
        Err(e) => log::warn!("ignoring item {:?}: {}", id, e),
    }
}

fn render_pending(host: &HostClient, items: &Items, repaint: &RepaintQueue, lookup: &ThemeLookup) {
    let mut pending: Vec<String> = repaint.borrow_mut().drain(..).collect();
    pending.dedup();
    for id in pending {
        let mut items = items.borrow_mut();
        let Some(proxy) = items.get_mut(&id) else {
            continue;
        };
        proxy.render(&mut LogCanvas { id: &id }, lookup);
        let status = host.get_status(&id).map(|s| format!("{:?}", s)).unwrap_or_default();
        log::info!("  {} [{}] {:?}", id, status, proxy.on_hover());
    }
}

/// Tell `item` about a click at `(x, y)`, as a tray would.
pub fn click(item: &str, button: MouseButton, menu_helper: String, x: i32, y: i32) -> Result<()> {
    let bus = ZbusBus::session().context("Failed to connect to the session bus")?;
    let host = Rc::new(HostClient::new(bus));
    let gone = Rc::new(Cell::new(false));
    host.set_remove_tray_icon({
        let gone = gone.clone();
        move |_| gone.set(true)
    });
    host.track_item(item);

    let proxy = ItemProxy::new(host.clone(), item, 0, |_| {})?;
    proxy.on_click(button, x, y, &CommandMenuLauncher { program: menu_helper });
    drop(proxy);

    host.process_pending()?;
    if gone.get() {
        bail!("{} is not on the bus anymore", item);
    }
    Ok(())
}

/// Finds themed icons in the usual freedesktop locations. Only looks for exact file names, which
/// is enough to tell whether the pixmap fallback is needed.
struct ThemeLookup {
    dirs: Vec<PathBuf>,
}

impl ThemeLookup {
    fn from_env() -> Self {
        let data_dirs = std::env::var("XDG_DATA_DIRS").unwrap_or_else(|_| "/usr/local/share:/usr/share".to_owned());
        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(home) = std::env::var_os("HOME") {
            dirs.push(PathBuf::from(home).join(".local/share/icons"));
        }
        dirs.extend(std::env::split_paths(&data_dirs).map(|dir| dir.join("icons")));
        dirs.push(PathBuf::from("/usr/share/pixmaps"));
        ThemeLookup { dirs }
    }
}

impl IconLookup for ThemeLookup {
    type Icon = PathBuf;

    fn lookup(&self, name: &str, size: i32) -> Option<PathBuf> {
        let sized = format!("hicolor/{size}x{size}/apps");
        let candidates = [sized.as_str(), "hicolor/scalable/apps", ""];
        self.dirs.iter().find_map(|dir| {
            candidates.iter().find_map(|sub| {
                ["png", "svg"].iter().map(|ext| dir.join(sub).join(format!("{}.{}", name, ext))).find(|path| path.is_file())
            })
        })
    }
}

struct LogCanvas<'a> {
    id: &'a str,
}

impl Canvas for LogCanvas<'_> {
    type Icon = PathBuf;

    fn draw_icon(&mut self, icon: &PathBuf, size: i32) {
        log::info!("  {} icon {} at {}px", self.id, icon.display(), size);
    }

    fn draw_surface(&mut self, surface: &PixelSurface, size: i32) {
        log::info!("  {} pixmap {}x{} at {}px", self.id, surface.width, surface.height, size);
    }

    fn clear(&mut self) {
        log::info!("  {} has no icon", self.id);
    }
}
