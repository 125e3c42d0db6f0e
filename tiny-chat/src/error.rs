use thiserror::Error;

use crate::protocol::JoinResponse;

/// A frame that could not be decoded into a command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("unknown verb '{0}'")]
    UnknownVerb(String),

    #[error("'{verb}' is missing its {argument}")]
    MissingArgument { verb: String, argument: &'static str },

    #[error("unknown join response '{0}'")]
    UnknownJoinResponse(String),

    #[error("message is {len} characters long, the limit is {max}")]
    MessageTooLong { len: usize, max: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsernameError {
    #[error("username cannot be empty")]
    Empty,

    #[error("username is {len} characters long, the limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("username cannot contain spaces")]
    ContainsWhitespace,

    #[error("'{0}' is a reserved name")]
    Reserved(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("every session slot is occupied")]
    Full,
}

/// Why a join handshake was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinRejection {
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    #[error("username is already in use")]
    UsernameTaken,

    #[error("server is full")]
    ServerFull,
}

impl JoinRejection {
    pub fn response(&self) -> JoinResponse {
        match self {
            Self::InvalidUsername(_) => JoinResponse::UsernameInvalid,
            Self::UsernameTaken => JoinResponse::UsernameTaken,
            Self::ServerFull => JoinResponse::ServerFull,
        }
    }
}

impl From<RegistryError> for JoinRejection {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Full => Self::ServerFull,
        }
    }
}
