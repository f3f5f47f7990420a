//! Command-line switches and the flat key/value configuration file.
//!
//! The file format deliberately is not TOML: it is the same
//! `key = value`, one setting per line, `#`-comment style the daemon has
//! always read its configuration in, and every option name below is a
//! literal wire contract with the deployment tooling that writes these
//! files - not an ambient concern that a generic config crate should own.

use clap::Parser;
use dbproxy_core::error::{ProxyError, ProxyResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "dbproxyd", about = "Cluster database proxy daemon", version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/etc/dbproxy/dbproxy.conf")]
    pub config: PathBuf,

    /// Run with debug-level logging regardless of the configured level.
    #[arg(long)]
    pub debug: bool,

    /// Write logs to this file instead of the configured log_config.
    #[arg(short, long)]
    pub logfile: Option<PathBuf>,

    /// Log to the console only; ignore log_config and --logfile.
    #[arg(short, long)]
    pub nolog: bool,
}

/// The daemon's fully resolved configuration: file settings merged with
/// command-line overrides.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_name: String,
    pub listen: String,
    pub bus: String,
    pub cassandra_hosts: Vec<String>,
    pub cassandra_port: u16,
    pub max_pending_connections: u32,
    pub log_config: Option<PathBuf>,
    pub debug: bool,
    pub logfile: Option<PathBuf>,
    pub nolog: bool,
}

impl Config {
    pub fn load(cli: &Cli) -> ProxyResult<Self> {
        let raw = read_key_value_file(&cli.config)?;

        let server_name = required(&raw, "server-name")?;
        let listen = required(&raw, "snapdbproxy")?;
        let bus = required(&raw, "snapcommunicator")?;

        let cassandra_hosts: Vec<String> = required(&raw, "cassandra_host_list")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if cassandra_hosts.is_empty() {
            return Err(ProxyError::parameter("cassandra_host_list cannot be empty"));
        }

        let cassandra_port = match raw.get("cassandra_port") {
            Some(v) => parse_port(v)?,
            None => 9042,
        };

        let max_pending_connections = match raw.get("max_pending_connections") {
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or_else(|| ProxyError::parameter(format!("invalid max_pending_connections: {v}")))?,
            None => 128,
        };

        Ok(Self {
            server_name,
            listen,
            bus,
            cassandra_hosts,
            cassandra_port,
            max_pending_connections,
            log_config: raw.get("log_config").map(PathBuf::from),
            debug: cli.debug,
            logfile: cli.logfile.clone(),
            nolog: cli.nolog,
        })
    }
}

fn required(raw: &HashMap<String, String>, key: &str) -> ProxyResult<String> {
    raw.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ProxyError::parameter(format!("missing required configuration option: {key}")))
}

fn parse_port(raw: &str) -> ProxyResult<u16> {
    raw.parse::<u16>()
        .map_err(|_| ProxyError::parameter(format!("cassandra_port out of range: {raw}")))
}

fn read_key_value_file(path: &Path) -> ProxyResult<HashMap<String, String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ProxyError::parameter(format!("cannot read configuration file {path:?}: {e}")))?;

    let mut map = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| ProxyError::parameter(format!("{path:?}:{}: expected key = value", lineno + 1)))?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_with_config(path: PathBuf) -> Cli {
        Cli {
            config: path,
            debug: false,
            logfile: None,
            nolog: false,
        }
    }

    #[test]
    fn loads_a_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# comment\nserver-name = proxy1\nsnapdbproxy = 127.0.0.1:4042\nsnapcommunicator = 127.0.0.1:4040\ncassandra_host_list = 10.0.0.1,10.0.0.2\n"
        )
        .unwrap();

        let config = Config::load(&cli_with_config(file.path().to_path_buf())).unwrap();
        assert_eq!(config.server_name, "proxy1");
        assert_eq!(config.cassandra_hosts, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(config.cassandra_port, 9042);
        assert_eq!(config.max_pending_connections, 128);
    }

    #[test]
    fn rejects_missing_required_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server-name = proxy1\n").unwrap();
        let err = Config::load(&cli_with_config(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ProxyError::Parameter(_)));
    }

    #[test]
    fn rejects_empty_host_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server-name = proxy1\nsnapdbproxy = 127.0.0.1:4042\nsnapcommunicator = 127.0.0.1:4040\ncassandra_host_list =\n"
        )
        .unwrap();
        assert!(Config::load(&cli_with_config(file.path().to_path_buf())).is_err());
    }
}
