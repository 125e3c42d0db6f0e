//! A small multi-user chat relay.
//!
//! Clients connect over TCP, register a unique display name, and exchange
//! broadcasts ("shouts") and directed messages ("whispers") through a
//! central server that also republishes the live roster. The wire protocol
//! is one text command per `\n`-terminated line.
//!
//! - [`server`] accepts connections, runs join handshakes, and drives the
//!   dispatch loop.
//! - [`dispatch`] owns the session registry and routes every client command.
//! - [`session`] holds per-connection state and the fixed-capacity registry.
//! - [`worker`] relays raw frames between one socket and its session.
//! - [`protocol`] defines the commands, username rules and line framing.
//! - [`client`] is a terminal client for the same protocol.
//! - [`cli`], [`config`] and [`error`] are the surrounding plumbing.
//!
//! Only the dispatch loop touches the registry, so none of the shared state
//! needs a lock: workers talk to it exclusively through their session's
//! channel pair.

pub mod cli;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod worker;
