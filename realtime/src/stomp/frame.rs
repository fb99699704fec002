//! STOMP 1.2 text frames.

use std::fmt;
use std::time::Duration;

use auth_gateway::bearer::bearer_value;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{bus_error, BusErrorKind, Error};

const NUL: char = '\0';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(line: &str) -> Result<Self, Error> {
        let command = match line {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => {
                return Err(bus_error(
                    BusErrorKind::Protocol,
                    &format!("Unknown STOMP command: {other}"),
                ))
            }
        };
        Ok(command)
    }

    /// CONNECT and CONNECTED headers are sent without escaping.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: String) -> Self {
        self.body = body;
        self
    }

    /// First value for `name`; repeated headers keep the earliest.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(host: &str, token: &SecretString, heartbeat: Duration) -> Self {
        let millis = heartbeat.as_millis();
        Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("Authorization", bearer_value(token.expose_secret()))
            .header("heart-beat", format!("{millis},{millis}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, body: String) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    /// Decode every frame in one WebSocket text message. Bare end-of-line
    /// heart-beats yield no frames.
    pub fn decode_all(input: &str) -> Result<Vec<Frame>, Error> {
        let mut frames = Vec::new();
        let mut rest = input;

        loop {
            rest = rest.trim_start_matches(['\r', '\n']);
            if rest.is_empty() {
                return Ok(frames);
            }
            let (frame, remaining) = decode_one(rest)?;
            frames.push(frame);
            rest = remaining;
        }
    }
}

fn decode_one(input: &str) -> Result<(Frame, &str), Error> {
    let (command_line, mut rest) = split_line(input)?;
    let command = Command::parse(command_line)?;
    let unescape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, remaining) = split_line(rest)?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            bus_error(
                BusErrorKind::Protocol,
                &format!("Malformed STOMP header: {line}"),
            )
        })?;
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value.trim().parse::<usize>().map_err(|_| {
                bus_error(
                    BusErrorKind::Protocol,
                    &format!("Invalid content-length: {value}"),
                )
            })
        })
        .transpose()?;

    let body_end = match content_length {
        Some(length) => length,
        None => rest.find(NUL).ok_or_else(|| {
            bus_error(BusErrorKind::Protocol, "STOMP frame is missing its NUL terminator")
        })?,
    };
    let body = rest
        .get(..body_end)
        .ok_or_else(|| bus_error(BusErrorKind::Protocol, "STOMP body is truncated"))?;
    let remaining = rest
        .get(body_end..)
        .and_then(|tail| tail.strip_prefix(NUL))
        .ok_or_else(|| {
            bus_error(BusErrorKind::Protocol, "STOMP frame is missing its NUL terminator")
        })?;

    Ok((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        remaining,
    ))
}

fn split_line(input: &str) -> Result<(&str, &str), Error> {
    let (line, rest) = input
        .split_once('\n')
        .ok_or_else(|| bus_error(BusErrorKind::Protocol, "Truncated STOMP frame"))?;
    Ok((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, Error> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(bus_error(
                    BusErrorKind::Protocol,
                    &format!("Invalid STOMP header escape: \\{}", other.unwrap_or(' ')),
                ))
            }
        }
    }
    Ok(out)
}

/// Negotiated heart-beat periods: how often we must send, and how long the
/// server may stay silent. `None` disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}

impl HeartBeat {
    /// Combine our requested period with the server's `heart-beat` header.
    pub fn negotiate(ours: Duration, server: Option<&str>) -> Self {
        let (server_send, server_receive) = server
            .and_then(|header| header.split_once(','))
            .and_then(|(sx, sy)| {
                let sx = sx.trim().parse::<u64>().ok()?;
                let sy = sy.trim().parse::<u64>().ok()?;
                Some((sx, sy))
            })
            .unwrap_or((0, 0));
        let ours = ours.as_millis() as u64;

        let pick = |a: u64, b: u64| {
            if a == 0 || b == 0 {
                None
            } else {
                Some(Duration::from_millis(a.max(b)))
            }
        };

        Self {
            outgoing: pick(ours, server_receive),
            incoming: pick(ours, server_send),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_frame_carries_bearer_and_heartbeat() {
        let token = SecretString::new("abc".to_string());
        let encoded = Frame::connect("chat.example.com", &token, Duration::from_secs(10)).encode();

        assert_eq!(
            encoded,
            "CONNECT\naccept-version:1.2\nhost:chat.example.com\nAuthorization:Bearer abc\nheart-beat:10000,10000\n\n\0"
        );
    }

    #[test]
    fn test_send_frame_escapes_headers_and_sets_content_length() {
        let encoded = Frame::send("/topic/a:b", r#"{"text":"hé"}"#.to_string()).encode();

        assert_eq!(
            encoded,
            "SEND\ndestination:/topic/a\\cb\ncontent-type:application/json\ncontent-length:14\n\n{\"text\":\"hé\"}\0"
        );
    }

    #[test]
    fn test_decode_message_frame() {
        let raw = "MESSAGE\r\nsubscription:sub-1\nmessage-id:7\ndestination:/topic/room\\c1\n\n{\"text\":\"hi\"}\0\n";
        let frames = Frame::decode_all(raw).unwrap();

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("destination"), Some("/topic/room:1"));
        assert_eq!(frame.get("subscription"), Some("sub-1"));
        assert_eq!(frame.body, "{\"text\":\"hi\"}");
    }

    #[test]
    fn test_decode_honours_content_length() {
        let raw = "MESSAGE\ndestination:d\ncontent-length:3\n\na\0b\0";
        let frames = Frame::decode_all(raw).unwrap();
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn test_heartbeat_only_message_has_no_frames() {
        assert!(Frame::decode_all("\n").unwrap().is_empty());
        assert!(Frame::decode_all("\r\n\r\n").unwrap().is_empty());
    }

    #[test]
    fn test_decode_multiple_frames() {
        let raw = "RECEIPT\nreceipt-id:1\n\n\0\nERROR\nmessage:bad\n\noops\0";
        let frames = Frame::decode_all(raw).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Receipt);
        assert_eq!(frames[1].command, Command::Error);
        assert_eq!(frames[1].body, "oops");
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        let unknown = Frame::decode_all("BOGUS\n\n\0").unwrap_err();
        assert_eq!(unknown.error_kind, BusErrorKind::Protocol);

        let unterminated = Frame::decode_all("MESSAGE\ndestination:d\n\nbody").unwrap_err();
        assert_eq!(unterminated.error_kind, BusErrorKind::Protocol);

        let bad_escape = Frame::decode_all("MESSAGE\ndestination:\\t\n\n\0").unwrap_err();
        assert_eq!(bad_escape.error_kind, BusErrorKind::Protocol);
    }

    #[test]
    fn test_connected_headers_are_not_unescaped() {
        let frames = Frame::decode_all("CONNECTED\nversion:1.2\nserver:a\\b\n\n\0").unwrap();
        assert_eq!(frames[0].get("server"), Some("a\\b"));
    }

    #[test]
    fn test_heartbeat_negotiation() {
        let ours = Duration::from_millis(10_000);

        let negotiated = HeartBeat::negotiate(ours, Some("5000,20000"));
        assert_eq!(negotiated.outgoing, Some(Duration::from_millis(20_000)));
        assert_eq!(negotiated.incoming, Some(Duration::from_millis(10_000)));

        let disabled = HeartBeat::negotiate(ours, Some("0,0"));
        assert_eq!(disabled.outgoing, None);
        assert_eq!(disabled.incoming, None);

        assert_eq!(HeartBeat::negotiate(ours, None), disabled);
        assert_eq!(
            HeartBeat::negotiate(Duration::ZERO, Some("5000,5000")),
            disabled
        );
    }
}
