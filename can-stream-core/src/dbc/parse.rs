//! Line-oriented DBC reader
//!
//! Reads `BO_` (message) and `SG_` (signal) clauses into `Message`
//! structures. Other clause types (VERSION, BU_, CM_, VAL_, ...) carry no
//! layout information and are skipped. A malformed or contradictory clause
//! aborts the parse of that file only, reporting the line number and the
//! offending content.

use super::message::Message;
use super::signal::{Signal, SignalType};
use crate::types::{Result, StreamError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static MSG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^BO_ (\d+) (\w+) *: (\d+) (\w+)").unwrap());

static SIG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^SG_ (\w+) (M|m\d+)? *: (\d+)\|(\d+)@(\d)([+-]) \(([0-9.+\-eE]+),([0-9.+\-eE]+)\) \[([0-9.+\-eE]+)\|([0-9.+\-eE]+)\] "([^"]*)"\s*(.*)"#,
    )
    .unwrap()
});

/// Extended-address flag bit used in DBC address encoding
const EXT_FLAG: u32 = 0x8000_0000;

/// Parse a DBC file from disk
pub fn parse_dbc_file(path: &Path) -> Result<Vec<Message>> {
    log::info!("Parsing DBC file: {:?}", path);
    let content = std::fs::read_to_string(path)?;
    let messages = parse_dbc(&content)?;
    log::info!("Parsed {} messages from {:?}", messages.len(), path);
    Ok(messages)
}

/// Parse DBC text into message definitions
///
/// Each returned message has already had `update()` applied, so masks,
/// ordering and multiplexor links are valid.
pub fn parse_dbc(content: &str) -> Result<Vec<Message>> {
    let mut messages: Vec<Message> = Vec::new();
    let mut current: Option<Message> = None;

    for (idx, raw_line) in content.lines().enumerate() {
        let line_num = idx + 1;
        let line = raw_line.trim();

        if let Some(caps) = MSG_RE.captures(line) {
            // Close out the previous message before starting a new one
            if let Some(mut done) = current.take() {
                done.update();
                messages.push(done);
            }

            let address = caps[1]
                .parse::<u32>()
                .map_err(|_| StreamError::parse(line_num, line, "invalid message address"))?
                & !EXT_FLAG;
            if messages.iter().any(|m| m.address == address) {
                return Err(StreamError::parse(
                    line_num,
                    line,
                    format!("duplicate message address 0x{:X}", address),
                ));
            }
            let size = caps[3]
                .parse::<usize>()
                .map_err(|_| StreamError::parse(line_num, line, "invalid message size"))?;

            let mut msg = Message::new(address, &caps[2], size);
            msg.transmitter = caps[4].to_string();
            current = Some(msg);
        } else if line.starts_with("SG_ ") {
            let caps = SIG_RE.captures(line).ok_or_else(|| {
                StreamError::parse(line_num, line, "malformed signal clause")
            })?;
            let msg = current.as_mut().ok_or_else(|| {
                StreamError::parse(line_num, line, "signal defined before its message")
            })?;

            let sig = parse_signal(&caps, line_num, line)?;
            if msg.signals.iter().any(|s| s.name == sig.name) {
                return Err(StreamError::parse(
                    line_num,
                    line,
                    format!("duplicate signal name '{}'", sig.name),
                ));
            }
            if sig.signal_type == SignalType::Multiplexor
                && msg
                    .signals
                    .iter()
                    .any(|s| s.signal_type == SignalType::Multiplexor)
            {
                return Err(StreamError::parse(
                    line_num,
                    line,
                    "message already has a multiplexor signal",
                ));
            }

            let end_byte = sig.byte_range().1;
            if end_byte >= msg.size {
                log::warn!(
                    "Signal '{}' extends to byte {} but message '{}' is {} bytes",
                    sig.name,
                    end_byte,
                    msg.name,
                    msg.size
                );
            }
            msg.signals.push(sig);
        }
        // Any other clause type is skipped
    }

    if let Some(mut done) = current.take() {
        done.update();
        messages.push(done);
    }
    Ok(messages)
}

fn parse_signal(caps: &regex::Captures<'_>, line_num: usize, line: &str) -> Result<Signal> {
    let start_bit = parse_num(caps, 3, line_num, line)?;
    let size = parse_num(caps, 4, line_num, line)?;
    if size == 0 {
        return Err(StreamError::parse(line_num, line, "signal size is zero"));
    }
    let mut sig = Signal::new(&caps[1], start_bit, size);

    match caps.get(2).map(|m| m.as_str()) {
        Some("M") => sig.signal_type = SignalType::Multiplexor,
        Some(m) => {
            sig.signal_type = SignalType::Multiplexed;
            sig.multiplex_value = m[1..]
                .parse()
                .map_err(|_| StreamError::parse(line_num, line, "invalid multiplex value"))?;
        }
        None => {}
    }

    sig.is_little_endian = &caps[5] == "1";
    sig.is_signed = &caps[6] == "-";
    sig.factor = parse_float(caps, 7, line_num, line)?;
    sig.offset = parse_float(caps, 8, line_num, line)?;
    sig.min = parse_float(caps, 9, line_num, line)?;
    sig.max = parse_float(caps, 10, line_num, line)?;
    sig.unit = caps[11].to_string();
    sig.receiver = caps[12].trim().to_string();
    if sig.factor == 0.0 {
        return Err(StreamError::parse(line_num, line, "signal factor is zero"));
    }
    sig.update_derived(0);
    Ok(sig)
}

fn parse_num(caps: &regex::Captures<'_>, group: usize, line_num: usize, line: &str) -> Result<u32> {
    caps[group]
        .parse()
        .map_err(|_| StreamError::parse(line_num, line, "invalid numeric field"))
}

fn parse_float(
    caps: &regex::Captures<'_>,
    group: usize,
    line_num: usize,
    line: &str,
) -> Result<f64> {
    caps[group]
        .parse()
        .map_err(|_| StreamError::parse(line_num, line, "invalid numeric field"))
}
