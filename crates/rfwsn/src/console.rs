// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! AT command console
//!
//! Lines have the form `AT+<CMD>[:<arg>[,<arg>...]]`, case-insensitive.
//! Every command produces exactly one reply line:
//!
//! ```text
//! AT+CONFIG             -> +CONFIG:OK,FREQ=868000000,POW=10
//! AT+CONFIG:FREQ=915000000
//! AT+START:0x21         -> +START:OK
//! AT+SLEEP:33           -> +SLEEP:ERR,argument
//! ```
//!
//! Node addresses are decimal or `0x` hex; address 0 is the concentrator
//! itself and is refused.

use crate::packet::CONCENTRATOR_ADDRESS;
use crate::radio::BROADCAST_ADDRESS;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start(u8),
    Stop(u8),
    ConfigGet,
    ConfigSet {
        frequency_hz: Option<u32>,
        power_dbm: Option<i8>,
    },
    Status(u8),
    Nodes,
    Stats,
    FwVersion(u8),
    Update(u8),
    Image,
    Abort,
    Downlink(u8, Vec<u8>),
    Sleep(u8, Duration),
    Count(u8),
}

impl ConsoleCommand {
    /// Reply tag
    pub fn name(&self) -> &'static str {
        match self {
            ConsoleCommand::Start(_) => "START",
            ConsoleCommand::Stop(_) => "STOP",
            ConsoleCommand::ConfigGet | ConsoleCommand::ConfigSet { .. } => "CONFIG",
            ConsoleCommand::Status(_) => "STATUS",
            ConsoleCommand::Nodes => "NODES",
            ConsoleCommand::Stats => "STATS",
            ConsoleCommand::FwVersion(_) => "FWVER",
            ConsoleCommand::Update(_) => "UPDATE",
            ConsoleCommand::Image => "IMAGE",
            ConsoleCommand::Abort => "ABORT",
            ConsoleCommand::Downlink(..) => "DOWNLINK",
            ConsoleCommand::Sleep(..) => "SLEEP",
            ConsoleCommand::Count(_) => "COUNT",
        }
    }
}

/// Why a line could not be turned into a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("syntax")]
    Syntax,

    #[error("unknown")]
    UnknownCommand(String),

    #[error("argument")]
    BadArgument(String),
}

impl ConsoleError {
    /// Reply line for the failure
    pub fn reply(&self) -> ConsoleReply {
        match self {
            ConsoleError::Syntax => ConsoleReply::err("AT", "syntax"),
            ConsoleError::UnknownCommand(cmd) => ConsoleReply::err(cmd.clone(), "unknown"),
            ConsoleError::BadArgument(cmd) => ConsoleReply::err(cmd.clone(), "argument"),
        }
    }
}

/// Parse one console line
pub fn parse(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let line = line.trim();
    let rest = line
        .get(..3)
        .filter(|prefix| prefix.eq_ignore_ascii_case("AT+"))
        .map(|_| &line[3..])
        .ok_or(ConsoleError::Syntax)?;

    let (cmd, args) = match rest.split_once(':') {
        Some((cmd, args)) => (cmd.trim().to_ascii_uppercase(), Some(args.trim())),
        None => (rest.trim().to_ascii_uppercase(), None),
    };
    if cmd.is_empty() {
        return Err(ConsoleError::Syntax);
    }
    let args: Vec<&str> = args
        .filter(|a| !a.is_empty())
        .map(|a| a.split(',').map(str::trim).collect())
        .unwrap_or_default();

    let bad = || ConsoleError::BadArgument(cmd.clone());
    let node_arg = |args: &[&str]| -> Result<u8, ConsoleError> {
        match args {
            [addr] => parse_node_address(addr).ok_or_else(bad),
            _ => Err(bad()),
        }
    };

    let command = match cmd.as_str() {
        "START" => ConsoleCommand::Start(node_arg(&args)?),
        "STOP" => ConsoleCommand::Stop(node_arg(&args)?),
        "STATUS" => ConsoleCommand::Status(node_arg(&args)?),
        "FWVER" => ConsoleCommand::FwVersion(node_arg(&args)?),
        "UPDATE" => ConsoleCommand::Update(node_arg(&args)?),
        "COUNT" => ConsoleCommand::Count(node_arg(&args)?),
        "NODES" if args.is_empty() => ConsoleCommand::Nodes,
        "STATS" if args.is_empty() => ConsoleCommand::Stats,
        "IMAGE" if args.is_empty() => ConsoleCommand::Image,
        "ABORT" if args.is_empty() => ConsoleCommand::Abort,
        "CONFIG" if args.is_empty() => ConsoleCommand::ConfigGet,
        "CONFIG" => {
            let mut frequency_hz = None;
            let mut power_dbm = None;
            for arg in &args {
                let (key, value) = arg.split_once('=').ok_or_else(bad)?;
                match key.trim().to_ascii_uppercase().as_str() {
                    "FREQ" => frequency_hz = Some(value.trim().parse().map_err(|_| bad())?),
                    "POW" => power_dbm = Some(value.trim().parse().map_err(|_| bad())?),
                    _ => return Err(bad()),
                }
            }
            ConsoleCommand::ConfigSet {
                frequency_hz,
                power_dbm,
            }
        }
        "DOWNLINK" => match args.as_slice() {
            [addr, hex] => ConsoleCommand::Downlink(
                parse_node_address(addr).ok_or_else(bad)?,
                parse_hex(hex).ok_or_else(bad)?,
            ),
            _ => return Err(bad()),
        },
        "SLEEP" => match args.as_slice() {
            [addr, ms] => ConsoleCommand::Sleep(
                parse_node_address(addr).ok_or_else(bad)?,
                Duration::from_millis(ms.parse().map_err(|_| bad())?),
            ),
            _ => return Err(bad()),
        },
        "NODES" | "STATS" | "IMAGE" | "ABORT" => return Err(bad()),
        _ => return Err(ConsoleError::UnknownCommand(cmd.clone())),
    };
    Ok(command)
}

/// Node address in decimal or `0x` hex, excluding the reserved ones
pub fn parse_node_address(text: &str) -> Option<u8> {
    let text = text.trim();
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok()?,
        None => text.parse().ok()?,
    };
    (value != CONCENTRATOR_ADDRESS && value != BROADCAST_ADDRESS).then_some(value)
}

/// Even-length hex string to bytes
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.trim();
    if text.is_empty() || text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

/// Uppercase hex, no separators
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// One reply line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleReply {
    name: String,
    outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Ok(Vec<(String, String)>),
    Err(String),
}

impl ConsoleReply {
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Ok(Vec::new()),
        }
    }

    pub fn err(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Outcome::Err(reason.into()),
        }
    }

    /// Append `KEY=value`; ignored on an error reply
    pub fn field(mut self, key: &str, value: impl fmt::Display) -> Self {
        if let Outcome::Ok(fields) = &mut self.outcome {
            fields.push((key.to_string(), value.to_string()));
        }
        self
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Ok(_))
    }
}

impl fmt::Display for ConsoleReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}:", self.name)?;
        match &self.outcome {
            Outcome::Ok(fields) => {
                f.write_str("OK")?;
                for (key, value) in fields {
                    write!(f, ",{}={}", key, value)?;
                }
                Ok(())
            }
            Outcome::Err(reason) => write!(f, "ERR,{}", reason),
        }
    }
}

/// `+DATA:<sec>.<ms>,<addr>,<len>,<HEX>` notification for a raw payload
pub fn data_notification(uptime: Duration, source: u8, payload: &[u8]) -> String {
    format!(
        "+DATA:{}.{:03},{},{},{}",
        uptime.as_secs(),
        uptime.subsec_millis(),
        source,
        payload.len(),
        to_hex(payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_commands() {
        assert_eq!(parse("AT+START:33"), Ok(ConsoleCommand::Start(33)));
        assert_eq!(parse("at+stop:0x21"), Ok(ConsoleCommand::Stop(0x21)));
        assert_eq!(parse("AT+FwVer:0X10\r\n"), Ok(ConsoleCommand::FwVersion(0x10)));
        assert_eq!(parse("AT+COUNT: 7"), Ok(ConsoleCommand::Count(7)));
        assert_eq!(
            parse("AT+SLEEP:5,2500"),
            Ok(ConsoleCommand::Sleep(5, Duration::from_millis(2500)))
        );
        assert_eq!(
            parse("AT+DOWNLINK:5,01a0FF"),
            Ok(ConsoleCommand::Downlink(5, vec![0x01, 0xA0, 0xFF]))
        );
    }

    #[test]
    fn test_parse_config() {
        assert_eq!(parse("AT+CONFIG"), Ok(ConsoleCommand::ConfigGet));
        assert_eq!(
            parse("AT+CONFIG:FREQ=915000000,POW=-5"),
            Ok(ConsoleCommand::ConfigSet {
                frequency_hz: Some(915_000_000),
                power_dbm: Some(-5),
            })
        );
        assert_eq!(
            parse("AT+CONFIG:pow=3"),
            Ok(ConsoleCommand::ConfigSet {
                frequency_hz: None,
                power_dbm: Some(3),
            })
        );
        assert!(parse("AT+CONFIG:GAIN=3").is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("HELLO"), Err(ConsoleError::Syntax));
        assert_eq!(parse("AT+"), Err(ConsoleError::Syntax));
        assert_eq!(
            parse("AT+REBOOT"),
            Err(ConsoleError::UnknownCommand("REBOOT".into()))
        );
        assert_eq!(
            parse("AT+START:0"),
            Err(ConsoleError::BadArgument("START".into()))
        );
        assert!(parse("AT+START:256").is_err());
        assert!(parse("AT+START").is_err());
        assert!(parse("AT+DOWNLINK:5,abc").is_err());
        assert!(parse("AT+NODES:1").is_err());
        assert_eq!(parse("AT+SLEEP:33").unwrap_err().reply().to_string(), "+SLEEP:ERR,argument");
        assert_eq!(ConsoleError::Syntax.reply().to_string(), "+AT:ERR,syntax");
    }

    #[test]
    fn test_reply_rendering() {
        let reply = ConsoleReply::ok("CONFIG")
            .field("FREQ", 868_000_000)
            .field("POW", 10);
        assert_eq!(reply.to_string(), "+CONFIG:OK,FREQ=868000000,POW=10");
        assert_eq!(ConsoleReply::ok("START").to_string(), "+START:OK");
        let err = ConsoleReply::err("UPDATE", "busy").field("X", 1);
        assert_eq!(err.to_string(), "+UPDATE:ERR,busy");
        assert!(!err.is_ok());
    }

    #[test]
    fn test_data_notification() {
        let line = data_notification(Duration::from_millis(12_045), 0x21, &[0x01, 0xAB]);
        assert_eq!(line, "+DATA:12.045,33,2,01AB");
    }
}
