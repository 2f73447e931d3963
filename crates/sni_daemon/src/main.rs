use clap::CommandFactory as _;

mod monitor;
mod opts;
mod watcher;

fn main() {
    let opts: opts::Opt = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("sni_daemon"), log_level_filter)
            .filter(Some("notifier_broker"), log_level_filter)
            .init();
    }

    let result = match opts.action {
        opts::Action::ShellCompletions { shell } => {
            clap_complete::generate(shell, &mut opts::RawOpt::command(), "sni-daemon", &mut std::io::stdout());
            return;
        }
        opts::Action::Watcher { notify_parent } => watcher::run(notify_parent),
        opts::Action::Monitor { icon_size } => monitor::run(icon_size),
        opts::Action::Click { item, button, menu_helper, x, y } => monitor::click(&item, button.into(), menu_helper, x, y),
    };

    if let Err(err) = result {
        log::error!("{:?}", err);
        std::process::exit(1);
    }
}
