use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server on every local interface.
    Server(ServerArgs),
    /// Join a chat server from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// TCP port to listen on (1024-65535).
    #[arg(value_parser = clap::value_parser!(u16).range(1024..))]
    pub port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name; at most 16 characters, without spaces.
    #[arg(long)]
    pub username: String,

    /// Address of the server, as host:port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: String,
}
