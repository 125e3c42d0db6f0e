//! Line-oriented text protocol shared by the server and the terminal client.
//!
//! Every frame is a verb token, optionally followed by a space and a payload,
//! terminated on the wire by `\n`. Verbs are matched as whole tokens, so a
//! frame is never mistaken for a longer verb that happens to share its prefix.

use std::{fmt, io};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, UsernameError};

pub const MAX_USERNAME_LEN: usize = 16;
pub const MAX_MESSAGE_LEN: usize = 256;
pub const MAX_CONCURRENT_USERS: usize = 10;
pub const MAX_FRAME_LEN: usize = 1024 + MAX_USERNAME_LEN * MAX_CONCURRENT_USERS;

/// Names that would read as an addressing keyword in a chat window.
pub const RESERVED_USERNAMES: [&str; 3] = ["everyone", "everybody", "all"];

/// Frames sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Join { username: String },
    Shout { message: String },
    Whisper { recipient: String, message: String },
}

impl ClientCommand {
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let (verb, payload) = split_verb(frame)?;
        match verb {
            // The username is validated at admission, so an empty one still parses.
            "join" => Ok(Self::Join {
                username: payload.unwrap_or_default().to_string(),
            }),
            "shout" => Ok(Self::Shout {
                message: within_limit(required(verb, "message", payload)?)?.to_string(),
            }),
            "whisper" => {
                let (recipient, message) = split_target(verb, "recipient", payload)?;
                Ok(Self::Whisper {
                    recipient: recipient.to_string(),
                    message: within_limit(message)?.to_string(),
                })
            }
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }
}

/// Relayed frames add a verb and a username to the message, so only a
/// bounded message keeps them under `MAX_FRAME_LEN`.
fn within_limit(message: &str) -> Result<&str, ProtocolError> {
    let len = message.chars().count();
    if len > MAX_MESSAGE_LEN {
        return Err(ProtocolError::MessageTooLong {
            len,
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok(message)
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join { username } => write!(f, "join {username}"),
            Self::Shout { message } => write!(f, "shout {message}"),
            Self::Whisper { recipient, message } => write!(f, "whisper {recipient} {message}"),
        }
    }
}

/// Outcome of a join handshake, carried by `joinresponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinResponse {
    Ok,
    UsernameInvalid,
    UsernameTaken,
    ServerFull,
}

impl JoinResponse {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::UsernameInvalid => "username_invalid",
            Self::UsernameTaken => "username_taken",
            Self::ServerFull => "server_full",
        }
    }

    fn from_reason(reason: &str) -> Option<Self> {
        match reason {
            "ok" => Some(Self::Ok),
            "username_invalid" => Some(Self::UsernameInvalid),
            "username_taken" => Some(Self::UsernameTaken),
            "server_full" => Some(Self::ServerFull),
            _ => None,
        }
    }
}

/// Frames sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    JoinResponse(JoinResponse),
    UserList { usernames: Vec<String> },
    Shouted { sender: String, message: String },
    ShoutedCc { message: String },
    Whispered { sender: String, message: String },
    WhisperedCc { recipient: String, message: String },
}

impl ServerFrame {
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let (verb, payload) = split_verb(frame)?;
        match verb {
            "joinresponse" => {
                let reason = required(verb, "reason", payload)?;
                JoinResponse::from_reason(reason)
                    .map(Self::JoinResponse)
                    .ok_or_else(|| ProtocolError::UnknownJoinResponse(reason.to_string()))
            }
            "userlist" => Ok(Self::UserList {
                usernames: payload
                    .unwrap_or_default()
                    .split(' ')
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            "shouted" => {
                let (sender, message) = split_target(verb, "sender", payload)?;
                Ok(Self::Shouted {
                    sender: sender.to_string(),
                    message: message.to_string(),
                })
            }
            "shoutedcc" => Ok(Self::ShoutedCc {
                message: required(verb, "message", payload)?.to_string(),
            }),
            "whispered" => {
                let (sender, message) = split_target(verb, "sender", payload)?;
                Ok(Self::Whispered {
                    sender: sender.to_string(),
                    message: message.to_string(),
                })
            }
            "whisperedcc" => {
                let (recipient, message) = split_target(verb, "recipient", payload)?;
                Ok(Self::WhisperedCc {
                    recipient: recipient.to_string(),
                    message: message.to_string(),
                })
            }
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }
}

impl fmt::Display for ServerFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JoinResponse(response) => write!(f, "joinresponse {}", response.as_str()),
            Self::UserList { usernames } => {
                f.write_str("userlist")?;
                for name in usernames {
                    write!(f, " {name}")?;
                }
                Ok(())
            }
            Self::Shouted { sender, message } => write!(f, "shouted {sender} {message}"),
            Self::ShoutedCc { message } => write!(f, "shoutedcc {message}"),
            Self::Whispered { sender, message } => write!(f, "whispered {sender} {message}"),
            Self::WhisperedCc { recipient, message } => {
                write!(f, "whisperedcc {recipient} {message}")
            }
        }
    }
}

fn split_verb(frame: &str) -> Result<(&str, Option<&str>), ProtocolError> {
    // Clients of the original wire format prefix every verb with a slash.
    let frame = frame.strip_prefix('/').unwrap_or(frame);
    if frame.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(match frame.split_once(' ') {
        Some((verb, payload)) => (verb, Some(payload)),
        None => (frame, None),
    })
}

fn required<'a>(
    verb: &str,
    argument: &'static str,
    payload: Option<&'a str>,
) -> Result<&'a str, ProtocolError> {
    payload
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ProtocolError::MissingArgument {
            verb: verb.to_string(),
            argument,
        })
}

/// Splits `<name> <message>` payloads; both halves must be non-empty.
fn split_target<'a>(
    verb: &str,
    argument: &'static str,
    payload: Option<&'a str>,
) -> Result<(&'a str, &'a str), ProtocolError> {
    let payload = required(verb, argument, payload)?;
    let (name, message) = payload.split_once(' ').unwrap_or((payload, ""));
    let name = required(verb, argument, Some(name))?;
    let message = required(verb, "message", Some(message))?;
    Ok((name, message))
}

pub fn validate_username(username: &str) -> Result<(), UsernameError> {
    if username.is_empty() {
        return Err(UsernameError::Empty);
    }
    let len = username.chars().count();
    if len > MAX_USERNAME_LEN {
        return Err(UsernameError::TooLong {
            len,
            max: MAX_USERNAME_LEN,
        });
    }
    if username.chars().any(char::is_whitespace) {
        return Err(UsernameError::ContainsWhitespace);
    }
    if RESERVED_USERNAMES
        .iter()
        .any(|reserved| username.eq_ignore_ascii_case(reserved))
    {
        return Err(UsernameError::Reserved(username.to_string()));
    }
    Ok(())
}

/// Splits a byte stream into `\n`-terminated frames.
///
/// Partial frames stay buffered inside the reader, so `next_frame` is safe to
/// use as a `tokio::select!` branch: dropping the future loses no bytes.
pub struct FrameReader<R> {
    reader: R,
    pending: Vec<u8>,
    max_len: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            max_len,
        }
    }

    /// Returns the next non-empty frame, or `None` once the peer has closed
    /// the stream.
    pub async fn next_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            let (consumed, complete) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    if self.pending.is_empty() {
                        return Ok(None);
                    }
                    // Peer closed mid-frame; hand over what arrived.
                    let frame = decode(std::mem::take(&mut self.pending))?;
                    return Ok((!frame.is_empty()).then_some(frame));
                }
                match available.iter().position(|&byte| byte == b'\n') {
                    Some(end) => {
                        self.pending.extend_from_slice(&available[..end]);
                        (end + 1, true)
                    }
                    None => {
                        self.pending.extend_from_slice(available);
                        (available.len(), false)
                    }
                }
            };
            self.reader.consume(consumed);

            // A trailing `\r` may still be stripped once the `\n` arrives.
            let limit = match self.pending.last() {
                Some(b'\r') => self.max_len + 1,
                _ => self.max_len,
            };
            if self.pending.len() > limit {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame exceeds {} bytes", self.max_len),
                ));
            }

            if complete {
                let frame = decode(std::mem::take(&mut self.pending))?;
                if !frame.is_empty() {
                    return Ok(Some(frame));
                }
            }
        }
    }
}

fn decode(mut bytes: Vec<u8>) -> io::Result<String> {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

pub async fn write_frame<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One write per frame so a frame never interleaves with another.
    let mut encoded = Vec::with_capacity(frame.len() + 1);
    encoded.extend_from_slice(frame.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
