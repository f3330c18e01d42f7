use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::hub::HubSettings;

pub const DATA_PATH: &str = "spirits/spirits.json";
pub const PUBLIC_DIR: &str = "public";
pub const DEFAULT_PORT: u16 = 3000;

/// How long each spirit stays on screen before the next one is pushed.
pub const SPIRIT_INTERVAL: Duration = Duration::from_millis(20_000);

/// Grace period after the last browser leaves, so a quick reload does not
/// stop and restart the rotation.
pub const DISCONNECT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub data_path: PathBuf,
    pub public_dir: PathBuf,
    pub hub: HubSettings,
}

impl Config {
    /// `SHRINE_BIND` (full address) wins over `PORT`.
    pub fn from_env() -> anyhow::Result<Self> {
        let addr = resolve_addr(std::env::var("SHRINE_BIND").ok(), std::env::var("PORT").ok())?;
        Ok(Self {
            addr,
            data_path: PathBuf::from(DATA_PATH),
            public_dir: PathBuf::from(PUBLIC_DIR),
            hub: HubSettings {
                interval: SPIRIT_INTERVAL,
                debounce: DISCONNECT_DEBOUNCE,
            },
        })
    }
}

fn resolve_addr(bind: Option<String>, port: Option<String>) -> anyhow::Result<SocketAddr> {
    if let Some(bind) = bind {
        return bind
            .parse()
            .with_context(|| format!("SHRINE_BIND is not a socket address: {bind}"));
    }
    let port = match port {
        Some(p) => p
            .trim()
            .parse::<u16>()
            .with_context(|| format!("PORT is not a valid port: {p}"))?,
        None => DEFAULT_PORT,
    };
    Ok(SocketAddr::from(([0, 0, 0, 0], port)))
}
