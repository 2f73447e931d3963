//! Well-known names, object paths and members of the StatusNotifier protocol.

pub const WATCHER_BUS: &str = "org.kde.StatusNotifierWatcher";
pub const WATCHER_OBJECT: &str = "/StatusNotifierWatcher";
pub const WATCHER_INTERFACE: &str = "org.kde.StatusNotifierWatcher";

pub const ITEM_OBJECT: &str = "/StatusNotifierItem";
pub const ITEM_INTERFACE: &str = "org.kde.StatusNotifierItem";

pub const HOST_OBJECT: &str = "/StatusNotifierHost";
pub const HOST_NAME_PREFIX: &str = "org.freedesktop.StatusNotifierHost";

pub const PROTOCOL_VERSION: u32 = 0;

/// Members of `org.kde.StatusNotifierWatcher`.
pub mod watcher {
    pub const REGISTER_ITEM: &str = "RegisterStatusNotifierItem";
    pub const REGISTER_HOST: &str = "RegisterStatusNotifierHost";

    pub const IS_HOST_REGISTERED: &str = "IsStatusNotifierHostRegistered";
    pub const REGISTERED_ITEMS: &str = "RegisteredStatusNotifierItems";

    pub const ITEM_REGISTERED: &str = "StatusNotifierItemRegistered";
    pub const ITEM_UNREGISTERED: &str = "StatusNotifierItemUnregistered";
    pub const HOST_REGISTERED: &str = "StatusNotifierHostRegistered";
    pub const HOST_UNREGISTERED: &str = "StatusNotifierHostUnregistered";
}

/// Members of `org.kde.StatusNotifierItem`.
pub mod item {
    pub const TITLE: &str = "Title";
    pub const STATUS: &str = "Status";
    pub const ICON_NAME: &str = "IconName";
    pub const ICON_PIXMAP: &str = "IconPixmap";
    pub const TOOL_TIP: &str = "ToolTip";
    pub const MENU: &str = "Menu";

    pub const ACTIVATE: &str = "Activate";
    pub const CONTEXT_MENU: &str = "ContextMenu";

    pub const NEW_ICON: &str = "NewIcon";
    pub const NEW_ATTENTION_ICON: &str = "NewAttentionIcon";
    pub const NEW_OVERLAY_ICON: &str = "NewOverlayIcon";
    pub const NEW_TOOL_TIP: &str = "NewToolTip";
    pub const NEW_STATUS: &str = "NewStatus";
    pub const NEW_TITLE: &str = "NewTitle";
}
