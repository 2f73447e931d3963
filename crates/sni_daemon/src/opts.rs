use clap::{Parser, Subcommand, ValueEnum};
use notifier_broker::MouseButton;

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq, Eq)]
pub struct Opt {
    pub log_debug: bool,
    pub action: Action,
}

#[derive(Parser, Debug, PartialEq, Eq)]
#[command(author = "elkowar", version, about)]
pub(super) struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Action {
    /// Generate a shell completion script
    ShellCompletions {
        #[arg(short, long)]
        #[arg(value_enum)]
        shell: clap_complete::shells::Shell,
    },

    /// Run the StatusNotifierWatcher service until interrupted.
    #[command(name = "watcher")]
    Watcher {
        /// Send SIGCONT to the parent process once the watcher is reachable.
        #[arg(long)]
        notify_parent: bool,
    },

    /// Act as the StatusNotifierHost and log tray items as they come, change and go.
    #[command(name = "monitor")]
    Monitor {
        /// Size in pixels that icons would be drawn at, used to pick among pixmaps.
        #[arg(long, default_value_t = 24)]
        icon_size: i32,
    },

    /// Click on a tray item, as a tray would.
    #[command(name = "click")]
    Click {
        /// Id of the item, as listed by the watcher (e.g. `:1.50/StatusNotifierItem`).
        item: String,

        #[arg(long, value_enum, default_value_t = ClickButton::Left)]
        button: ClickButton,

        /// Program that shows an item's exported menu, called with the menu's bus name and path.
        #[arg(long, default_value = "dbusmenu-cmd")]
        menu_helper: String,

        #[arg(short, default_value_t = 0, allow_negative_numbers = true)]
        x: i32,

        #[arg(short, default_value_t = 0, allow_negative_numbers = true)]
        y: i32,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickButton {
    Left,
    Right,
    Middle,
}

impl From<ClickButton> for MouseButton {
    fn from(button: ClickButton) -> Self {
        match button {
            ClickButton::Left => MouseButton::Left,
            ClickButton::Right => MouseButton::Right,
            ClickButton::Middle => MouseButton::Middle,
        }
    }
}

impl Opt {
    pub fn from_env() -> Self {
        let raw: RawOpt = RawOpt::parse();
        raw.into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { action, log_debug } = other;
        Opt { action, log_debug }
    }
}
