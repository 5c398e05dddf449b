use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::ServerArgs;
use crate::exec::ExecConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub exec: ExecConfig,
    /// Rooms added to the directory on top of the default ones.
    pub extra_rooms: Vec<String>,
    pub shutdown_grace: Duration,
}

impl TryFrom<ServerArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        if args.exec_timeout_secs == 0 {
            bail!("exec timeout must be greater than zero");
        }
        let scratch_dir = args
            .scratch_dir
            .unwrap_or_else(|| std::env::temp_dir().join("synckode"));

        Ok(Config {
            listen_addr,
            exec: ExecConfig {
                scratch_dir,
                timeout: Duration::from_secs(args.exec_timeout_secs),
            },
            extra_rooms: args
                .rooms
                .into_iter()
                .map(|room| room.trim().to_string())
                .filter(|room| !room.is_empty())
                .collect(),
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            exec: ExecConfig::default(),
            extra_rooms: Vec::new(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn scratch_dir(&self) -> &PathBuf {
        &self.exec.scratch_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use crate::cli::Cli;

    fn parse(args: &[&str]) -> anyhow::Result<Config> {
        let cli = Cli::try_parse_from(std::iter::once("synckode-relay").chain(args.iter().copied()))?;
        Config::try_from(cli.server)
    }

    #[test_timeout::timeout]
    fn defaults_match_the_documented_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.exec.timeout, Duration::from_secs(30));
        assert!(config.scratch_dir().ends_with("synckode"));
        assert!(config.extra_rooms.is_empty());
    }

    #[test_timeout::timeout]
    fn rooms_and_timeouts_are_parsed() {
        let config = parse(&[
            "--listen-addr",
            "127.0.0.1:4000",
            "--exec-timeout-secs",
            "5",
            "--room",
            "algo-club",
            "--room",
            " ",
            "--scratch-dir",
            "/tmp/sk",
        ])
        .unwrap();
        assert_eq!(config.listen_addr.port(), 4000);
        assert_eq!(config.exec.timeout, Duration::from_secs(5));
        assert_eq!(config.extra_rooms, vec!["algo-club"]);
        assert_eq!(config.scratch_dir(), &PathBuf::from("/tmp/sk"));
    }

    #[test_timeout::timeout]
    fn invalid_values_are_rejected() {
        assert!(parse(&["--listen-addr", "not-an-address"]).is_err());
        assert!(parse(&["--exec-timeout-secs", "0"]).is_err());
    }
}
