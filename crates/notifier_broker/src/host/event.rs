use crate::{names, transport::SignalMessage};

/// Which part of an item a `New*` signal announced a change of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemProperty {
    Icon,
    AttentionIcon,
    OverlayIcon,
    ToolTip,
    Status,
    Title,
}

impl ItemProperty {
    pub const ALL: [ItemProperty; 6] = [
        ItemProperty::Icon,
        ItemProperty::AttentionIcon,
        ItemProperty::OverlayIcon,
        ItemProperty::ToolTip,
        ItemProperty::Status,
        ItemProperty::Title,
    ];

    pub fn signal_name(self) -> &'static str {
        use names::item::*;
        match self {
            ItemProperty::Icon => NEW_ICON,
            ItemProperty::AttentionIcon => NEW_ATTENTION_ICON,
            ItemProperty::OverlayIcon => NEW_OVERLAY_ICON,
            ItemProperty::ToolTip => NEW_TOOL_TIP,
            ItemProperty::Status => NEW_STATUS,
            ItemProperty::Title => NEW_TITLE,
        }
    }

    pub fn from_signal_name(member: &str) -> Option<ItemProperty> {
        ItemProperty::ALL.into_iter().find(|p| p.signal_name() == member)
    }
}

/// A signal relevant to the tray, as received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayEvent {
    ItemRegistered(String),
    ItemUnregistered(String),
    HostRegistered,
    HostUnregistered(String),
    PropertyChanged { sender: String, path: String, property: ItemProperty },
}

impl TrayEvent {
    pub fn classify(msg: &SignalMessage) -> Option<TrayEvent> {
        use names::watcher::*;
        if msg.path == names::WATCHER_OBJECT && msg.interface == names::WATCHER_INTERFACE {
            return match msg.member.as_str() {
                ITEM_REGISTERED => Some(TrayEvent::ItemRegistered(msg.arg.clone())),
                ITEM_UNREGISTERED => Some(TrayEvent::ItemUnregistered(msg.arg.clone())),
                HOST_REGISTERED => Some(TrayEvent::HostRegistered),
                HOST_UNREGISTERED => Some(TrayEvent::HostUnregistered(msg.arg.clone())),
                _ => None,
            };
        }
        if msg.interface == names::ITEM_INTERFACE {
            let property = ItemProperty::from_signal_name(&msg.member)?;
            return Some(TrayEvent::PropertyChanged { sender: msg.sender.clone(), path: msg.path.clone(), property });
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(path: &str, interface: &str, member: &str, arg: &str) -> SignalMessage {
        SignalMessage { sender: ":1.1".into(), path: path.into(), interface: interface.into(), member: member.into(), arg: arg.into() }
    }

    #[test]
    fn test_classify_watcher_signals() {
        let msg = message(names::WATCHER_OBJECT, names::WATCHER_INTERFACE, "StatusNotifierItemRegistered", ":1.5/a");
        assert_eq!(TrayEvent::classify(&msg), Some(TrayEvent::ItemRegistered(":1.5/a".into())));
        let msg = message(names::WATCHER_OBJECT, names::WATCHER_INTERFACE, "StatusNotifierHostRegistered", "");
        assert_eq!(TrayEvent::classify(&msg), Some(TrayEvent::HostRegistered));
        let msg = message("/elsewhere", names::WATCHER_INTERFACE, "StatusNotifierItemRegistered", ":1.5/a");
        assert_eq!(TrayEvent::classify(&msg), None);
    }

    #[test]
    fn test_classify_item_signals() {
        let msg = message("/StatusNotifierItem", names::ITEM_INTERFACE, "NewToolTip", "");
        assert_eq!(
            TrayEvent::classify(&msg),
            Some(TrayEvent::PropertyChanged {
                sender: ":1.1".into(),
                path: "/StatusNotifierItem".into(),
                property: ItemProperty::ToolTip
            })
        );
        let msg = message("/StatusNotifierItem", names::ITEM_INTERFACE, "NewIconThemePath", "");
        assert_eq!(TrayEvent::classify(&msg), None);
    }
}
