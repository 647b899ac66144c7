use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use tracing::info;

use chatsync::backend::RestBackend;
use chatsync::config::Config;
use chatsync::conversations::{ConversationCache, UserId};
use chatsync::logging;
use chatsync::transport::WsTransport;
use chatsync::LiveBridge;

mod app;

use app::App;

fn cli() -> Command {
    Command::new("chatsync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Two-party chat client with a synchronized message cache")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Config file (default: <config dir>/chatsync/config.toml)"),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .value_name("URL")
                .help("REST API base URL"),
        )
        .arg(
            Arg::new("socket")
                .long("socket")
                .value_name("URL")
                .help("Push transport websocket URL"),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .value_name("USER_ID")
                .help("Your user id (author of sent messages)"),
        )
        .arg(
            Arg::new("conversation")
                .short('c')
                .long("conversation")
                .value_name("ID")
                .help("Open a conversation on startup"),
        )
        .arg(
            Arg::new("page-size")
                .long("page-size")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Messages per history page"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level for chatsync (RUST_LOG takes precedence)"),
        )
}

fn apply_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Some(url) = matches.get_one::<String>("backend") {
        config.backend_url = url.clone();
    }
    if let Some(url) = matches.get_one::<String>("socket") {
        config.socket_url = url.clone();
    }
    if let Some(user) = matches.get_one::<String>("user") {
        config.user_id = Some(user.clone());
    }
    if let Some(&page_size) = matches.get_one::<usize>("page-size") {
        if page_size > 0 {
            config.page_size = page_size;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    logging::init(matches.get_one::<String>("log-level").map(|s| s.as_str()));

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;
    apply_overrides(&mut config, &matches);
    info!(?config, path = %config_path.display(), "Loaded configuration");

    let user = config
        .user_id
        .clone()
        .map(UserId::new)
        .context("no user id: pass --user or set user_id in the config file")?;

    let backend = RestBackend::new(&config.backend_url, config.request_timeout())?;
    let (transport, events) = WsTransport::connect(&config.socket_url);

    let bridge = Arc::new(LiveBridge::new(
        Arc::new(backend),
        Arc::new(transport),
        ConversationCache::new(),
        config.page_size,
    ));

    let mut app = App::new(bridge, user);
    let auto_open = matches.get_one::<String>("conversation").map(|s| s.as_str());
    app.run(events, auto_open).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let matches = cli()
            .try_get_matches_from([
                "chatsync",
                "--backend",
                "http://api",
                "--user",
                "u7",
                "--page-size",
                "10",
            ])
            .unwrap();
        let mut config = Config::default();
        apply_overrides(&mut config, &matches);
        assert_eq!(config.backend_url, "http://api");
        assert_eq!(config.user_id.as_deref(), Some("u7"));
        assert_eq!(config.page_size, 10);
        assert_eq!(config.socket_url, Config::default().socket_url);
    }

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }
}
