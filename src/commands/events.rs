//! post / publish / dispatch / init - inject events into the target

use bytes::{BufMut, Bytes, BytesMut};

use super::num;
use crate::dictionary::parse_number;
use crate::engine::{Cmd, CmdResult, CmdUsage};
use crate::error::{ErrorKind, HarnessError};
use crate::session::Session;

/// Encode typed event parameters (`u8:N`, `u16:N`, `u32:N`, `i8:N`,
/// `i16:N`, `i32:N`, `hex:BYTES`) into the little-endian payload the target
/// copies into the event after its header.
pub fn parse_event_params<S: AsRef<str>>(items: &[S]) -> Result<Bytes, String> {
    let mut buf = BytesMut::new();
    for item in items {
        let item = item.as_ref();
        let (ty, value) = item
            .split_once(':')
            .ok_or_else(|| format!("event parameter {:?} needs a type prefix (u8:, u16:, ...)", item))?;
        let bad = || format!("invalid {} value {:?}", ty, value);
        match ty {
            "u8" => buf.put_u8(unsigned(value).ok_or_else(bad)?),
            "u16" => buf.put_u16_le(unsigned(value).ok_or_else(bad)?),
            "u32" => buf.put_u32_le(unsigned(value).ok_or_else(bad)?),
            "i8" => buf.put_i8(signed(value).ok_or_else(bad)?),
            "i16" => buf.put_i16_le(signed(value).ok_or_else(bad)?),
            "i32" => buf.put_i32_le(signed(value).ok_or_else(bad)?),
            "hex" => buf.put_slice(&hex(value).ok_or_else(bad)?),
            _ => return Err(format!("unknown event parameter type {:?}", ty)),
        }
    }
    Ok(buf.freeze())
}

fn unsigned<T: TryFrom<u64>>(s: &str) -> Option<T> {
    parse_number(s).and_then(|n| T::try_from(n).ok())
}

fn signed<T: TryFrom<i64>>(s: &str) -> Option<T> {
    let n = match s.strip_prefix('-') {
        Some(rest) => -i64::try_from(parse_number(rest)?).ok()?,
        None => i64::try_from(parse_number(s)?).ok()?,
    };
    T::try_from(n).ok()
}

fn hex(s: &str) -> Option<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}

fn params(cmd: &str, items: &[String]) -> Result<Bytes, HarnessError> {
    parse_event_params(items)
        .map_err(|msg| HarnessError::new(ErrorKind::Usage, format!("{}: {}", cmd, msg)))
}

// ──────────────────────────────────────────────────────────
// post - post to the current active object (or a priority)
// ──────────────────────────────────────────────────────────

pub(super) struct PostCmd;

impl Cmd for PostCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let (prio, rest) = match args.split_first() {
            Some((first, rest)) if first.starts_with("-prio=") => {
                let prio: u8 = num("post", "priority", &first["-prio=".len()..])?;
                (Some(prio), rest)
            }
            _ => (None, args),
        };
        let [signal, items @ ..] = rest else {
            return Err(HarnessError::usage("post", "[-prio=N] signal [param...]"));
        };
        let payload = params("post", items)?;
        match prio {
            Some(prio) => session.post_to(prio, signal, payload)?,
            None => session.post(signal, payload)?,
        }
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Post an event to the current active object, or to the one at -prio=N".into(),
            args: "[-prio=N] signal [param...]".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// publish - multicast to subscribers
// ──────────────────────────────────────────────────────────

pub(super) struct PublishCmd;

impl Cmd for PublishCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let [signal, items @ ..] = args else {
            return Err(HarnessError::usage("publish", "signal [param...]"));
        };
        session.publish(signal, params("publish", items)?)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Publish an event to all subscribers".into(),
            args: "signal [param...]".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// dispatch - synchronous dispatch to the current SM
// ──────────────────────────────────────────────────────────

pub(super) struct DispatchCmd;

impl Cmd for DispatchCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        let [signal, items @ ..] = args else {
            return Err(HarnessError::usage("dispatch", "signal [param...]"));
        };
        session.dispatch(signal, params("dispatch", items)?)?;
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Dispatch an event to the current state machine".into(),
            args: "signal [param...]".into(),
        }
    }
}

// ──────────────────────────────────────────────────────────
// init - initial transition of the current SM
// ──────────────────────────────────────────────────────────

pub(super) struct InitCmd;

impl Cmd for InitCmd {
    fn run(&self, session: &mut Session, args: &[String]) -> Result<CmdResult, HarnessError> {
        match args {
            [] => session.init(None, Bytes::new())?,
            [signal, items @ ..] => session.init(Some(signal.as_str()), params("init", items)?)?,
        }
        Ok(CmdResult::Ok)
    }

    fn usage(&self) -> CmdUsage {
        CmdUsage {
            summary: "Take the initial transition of the current state machine".into(),
            args: "[signal [param...]]".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_little_endian() {
        let payload = parse_event_params(&["u8:2", "u16:0x1234", "u32:1"]).unwrap();
        assert_eq!(&payload[..], &[2, 0x34, 0x12, 1, 0, 0, 0]);
    }

    #[test]
    fn test_params_signed_and_hex() {
        let payload = parse_event_params(&["i8:-1", "i16:-2", "hex:DEADbeef"]).unwrap();
        assert_eq!(&payload[..], &[0xFF, 0xFE, 0xFF, 0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_params_empty() {
        let empty: [&str; 0] = [];
        assert!(parse_event_params(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_params_errors() {
        assert!(parse_event_params(&["7"]).unwrap_err().contains("type prefix"));
        assert!(parse_event_params(&["u8:256"]).unwrap_err().contains("invalid u8"));
        assert!(parse_event_params(&["i8:-129"]).is_err());
        assert!(parse_event_params(&["hex:ABC"]).is_err());
        assert!(parse_event_params(&["f32:1.0"]).unwrap_err().contains("unknown"));
    }
}
