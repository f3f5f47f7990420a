//! Message bus client (C5).
//!
//! A long-lived line-oriented connection to the local broker. Each line
//! is a command name followed by space-separated `key=value` parameters.
//! The daemon processes messages strictly serially, in the order the
//! broker delivers them.

use crate::error::{ProxyError, ProxyResult};
use crate::transport::{self, Stream, TlsMode};
use std::io::Write;
use std::net::ToSocketAddrs;

/// The commands this daemon recognizes or produces, per the core bus
/// vocabulary. `Other` carries anything outside that vocabulary so the
/// daemon can still reply `UNKNOWN` without losing the original text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BusCommand {
    Register,
    Ready,
    Help,
    Commands,
    Unknown,
    Log,
    Stop,
    Quitting,
    CassandraStatus,
    CassandraReady,
    NoCassandra,
    ModifySettings,
    ManagerStatus,
    Unregister,
    Other(String),
}

impl BusCommand {
    fn as_str(&self) -> &str {
        match self {
            Self::Register => "REGISTER",
            Self::Ready => "READY",
            Self::Help => "HELP",
            Self::Commands => "COMMANDS",
            Self::Unknown => "UNKNOWN",
            Self::Log => "LOG",
            Self::Stop => "STOP",
            Self::Quitting => "QUITTING",
            Self::CassandraStatus => "CASSANDRASTATUS",
            Self::CassandraReady => "CASSANDRAREADY",
            Self::NoCassandra => "NOCASSANDRA",
            Self::ModifySettings => "MODIFYSETTINGS",
            Self::ManagerStatus => "MANAGERSTATUS",
            Self::Unregister => "UNREGISTER",
            Self::Other(s) => s,
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "REGISTER" => Self::Register,
            "READY" => Self::Ready,
            "HELP" => Self::Help,
            "COMMANDS" => Self::Commands,
            "UNKNOWN" => Self::Unknown,
            "LOG" => Self::Log,
            "STOP" => Self::Stop,
            "QUITTING" => Self::Quitting,
            "CASSANDRASTATUS" => Self::CassandraStatus,
            "CASSANDRAREADY" => Self::CassandraReady,
            "NOCASSANDRA" => Self::NoCassandra,
            "MODIFYSETTINGS" => Self::ModifySettings,
            "MANAGERSTATUS" => Self::ManagerStatus,
            "UNREGISTER" => Self::Unregister,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Every command the daemon can reply `COMMANDS` with.
pub const SUPPORTED_COMMANDS: &str =
    "CASSANDRASTATUS,HELP,LOG,MANAGERSTATUS,MODIFYSETTINGS,QUITTING,READY,STOP,UNKNOWN";

/// A single line of the bus protocol: a command plus its named parameters.
#[derive(Clone, Debug)]
pub struct BusMessage {
    pub command: BusCommand,
    params: Vec<(String, String)>,
}

impl BusMessage {
    pub fn new(command: BusCommand) -> Self {
        Self { command, params: Vec::new() }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn encode(&self) -> String {
        let mut line = self.command.as_str().to_string();
        for (k, v) in &self.params {
            line.push(' ');
            line.push_str(k);
            line.push('=');
            line.push_str(v);
        }
        line
    }

    fn parse(line: &str) -> ProxyResult<Self> {
        let mut parts = line.split(' ').filter(|p| !p.is_empty());
        let command = parts
            .next()
            .ok_or_else(|| ProxyError::protocol("empty bus message"))?;
        let mut params = Vec::new();
        for part in parts {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| ProxyError::protocol(format!("malformed bus parameter {part:?}")))?;
            params.push((k.to_string(), v.to_string()));
        }
        Ok(Self {
            command: BusCommand::from_str(command),
            params,
        })
    }
}

/// A connection to the broker.
#[derive(Debug)]
pub struct BusClient {
    stream: Stream,
}

impl BusClient {
    pub fn connect(host: &str, addr: impl ToSocketAddrs, mode: TlsMode) -> ProxyResult<Self> {
        Ok(Self {
            stream: Stream::connect(host, addr, &mode)?,
        })
    }

    pub fn send(&mut self, message: &BusMessage) -> ProxyResult<()> {
        let mut line = message.encode();
        line.push('\n');
        self.stream.write_all(line.as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    /// Blocks for the next line. Returns `None` when the broker closed
    /// the connection.
    pub fn recv(&mut self) -> ProxyResult<Option<BusMessage>> {
        match transport::read_line(&mut self.stream)? {
            None => Ok(None),
            Some(line) if line.is_empty() => Ok(Some(BusMessage::new(BusCommand::Other(String::new())))),
            Some(line) => Ok(Some(BusMessage::parse(&line)?)),
        }
    }

    pub fn register(&mut self, server_name: &str, service: &str) -> ProxyResult<()> {
        self.send(
            &BusMessage::new(BusCommand::Register)
                .with_param("service", service)
                .with_param("server_name", server_name),
        )
    }

    pub fn unregister(&mut self) -> ProxyResult<()> {
        self.send(&BusMessage::new(BusCommand::Unregister))
    }

    pub fn reply_commands(&mut self) -> ProxyResult<()> {
        self.send(&BusMessage::new(BusCommand::Commands).with_param("list", SUPPORTED_COMMANDS))
    }

    pub fn reply_unknown(&mut self, command: &str) -> ProxyResult<()> {
        self.send(&BusMessage::new(BusCommand::Unknown).with_param("command", command))
    }

    /// Broadcasts `NOCASSANDRA`. The caller is responsible for only
    /// calling this once per outage.
    pub fn send_no_cassandra(&mut self) -> ProxyResult<()> {
        self.send(&BusMessage::new(BusCommand::NoCassandra).with_param("service", "."))
    }

    /// Broadcasts `CASSANDRAREADY`. The caller is responsible for only
    /// calling this after registration has completed.
    pub fn send_cassandra_ready(&mut self) -> ProxyResult<()> {
        self.send(&BusMessage::new(BusCommand::CassandraReady).with_param("service", "."))
    }

    pub fn reply_cassandra_status(&mut self, connected: bool) -> ProxyResult<()> {
        let command = if connected { BusCommand::CassandraReady } else { BusCommand::NoCassandra };
        self.send(&BusMessage::new(command).with_param("service", "."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_text() {
        let msg = BusMessage::new(BusCommand::ModifySettings)
            .with_param("plugin_name", "content")
            .with_param("field_name", "max_pending_connections")
            .with_param("button_name", "save_everywhere");
        let encoded = msg.encode();
        let decoded = BusMessage::parse(&encoded).unwrap();
        assert_eq!(decoded.command, BusCommand::ModifySettings);
        assert_eq!(decoded.param("plugin_name"), Some("content"));
        assert_eq!(decoded.param("button_name"), Some("save_everywhere"));
    }

    #[test]
    fn unrecognized_command_survives_as_other() {
        let decoded = BusMessage::parse("WHATEVER foo=bar").unwrap();
        assert_eq!(decoded.command, BusCommand::Other("WHATEVER".to_string()));
        assert_eq!(decoded.param("foo"), Some("bar"));
    }

    #[test]
    fn malformed_parameter_is_a_protocol_error() {
        assert!(BusMessage::parse("STOP nope").is_err());
    }

    #[test]
    fn bare_command_has_no_parameters() {
        let decoded = BusMessage::parse("READY").unwrap();
        assert_eq!(decoded.command, BusCommand::Ready);
        assert_eq!(decoded.param("anything"), None);
    }
}
