use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    dispatch::Dispatcher,
    protocol::{ClientCommand, FrameReader, JoinResponse, ServerFrame, write_frame},
    worker::RelayWorker,
};

type ClientFrames = FrameReader<BufReader<OwnedReadHalf>>;

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

/// A connection that sent `join` and is waiting for the dispatcher's verdict.
struct PendingJoin {
    username: String,
    frames: ClientFrames,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl Server {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self { listener, config }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the dispatch loop until `shutdown` resolves.
    ///
    /// Each pass accepts a connection or admits one finished handshake, then
    /// routes at most one inbound frame, so arrivals never hold up traffic.
    /// With nothing to do the loop parks until a worker reports traffic.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, config } = self;
        let mut dispatcher = Dispatcher::new(&config);
        let wakeup = dispatcher.wakeup();
        let (join_tx, mut join_rx) = mpsc::channel::<PendingJoin>(config.capacity.max(1));
        tokio::pin!(shutdown);

        let mut idle = true;
        loop {
            select! {
                biased;
                _ = &mut shutdown => {
                    info!(online = dispatcher.registry().len(), "server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &config, &join_tx);
                }
                Some(pending) = join_rx.recv() => {
                    admit(&mut dispatcher, pending);
                }
                _ = wakeup.notified(), if idle => {}
                _ = std::future::ready(()), if !idle => {}
            }
            idle = !dispatcher.relay_one();
        }

        // Dropping the dispatcher closes every session; workers hang up on their own.
        drop(dispatcher);
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    config: &ServerConfig,
    joins: &mpsc::Sender<PendingJoin>,
) {
    match result {
        Ok((stream, peer)) => spawn_handshake(stream, peer, config, joins.clone()),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

/// Reads the `join` frame off the dispatch loop so a silent client cannot
/// hold it up.
fn spawn_handshake(
    stream: TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
    joins: mpsc::Sender<PendingJoin>,
) {
    let max_frame_len = config.max_frame_len;
    let limit = config.handshake_timeout;
    tokio::spawn(async move {
        match perform_handshake(stream, peer, max_frame_len, limit).await {
            Ok(pending) => {
                if joins.send(pending).await.is_err() {
                    debug!(%peer, "server stopped before the join was admitted");
                }
            }
            Err(err) => warn!(%peer, error = %err, "handshake failed"),
        }
    });
}

async fn perform_handshake(
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_len: usize,
    limit: Duration,
) -> Result<PendingJoin> {
    let (reader, writer) = stream.into_split();
    let mut frames = FrameReader::new(BufReader::new(reader), max_frame_len);

    let frame = timeout(limit, frames.next_frame())
        .await
        .context("timed out waiting for join")??
        .context("connection closed before handshake")?;

    let username = match ClientCommand::parse(&frame) {
        Ok(ClientCommand::Join { username }) => username,
        _ => anyhow::bail!("expected join, got '{frame}'"),
    };

    Ok(PendingJoin {
        username,
        frames,
        writer,
        peer,
    })
}

fn admit(dispatcher: &mut Dispatcher, pending: PendingJoin) {
    let PendingJoin {
        username,
        frames,
        writer,
        peer,
    } = pending;

    match dispatcher.join(&username) {
        Ok((slot, link)) => {
            debug!(%peer, %username, slot, "starting relay worker");
            RelayWorker::new(frames, writer, link, Some(peer)).spawn();
        }
        Err(rejection) => {
            info!(%peer, %username, reason = %rejection, "join rejected");
            spawn_rejection(frames, writer, peer, rejection.response());
        }
    }
}

fn spawn_rejection(
    frames: ClientFrames,
    mut writer: OwnedWriteHalf,
    peer: SocketAddr,
    response: JoinResponse,
) {
    tokio::spawn(async move {
        let frame = ServerFrame::JoinResponse(response).to_string();
        if let Err(err) = write_frame(&mut writer, &frame).await {
            warn!(%peer, error = ?err, "failed to send join response");
        }
        if let Err(err) = writer.shutdown().await {
            debug!(%peer, error = ?err, "failed to close rejected connection");
        }
        drop(frames);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handshake_requires_join_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.expect("connect");
            stream.write_all(b"shout hello\n").await.expect("write");
            stream
        });
        let (stream, peer) = listener.accept().await.expect("accept");
        let result = perform_handshake(stream, peer, 64, Duration::from_secs(1)).await;
        assert!(result.is_err());
        drop(client.await.expect("client task"));
    }

    #[tokio::test]
    async fn handshake_extracts_username() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.expect("connect");
            stream.write_all(b"join alice\n").await.expect("write");
            stream
        });
        let (stream, peer) = listener.accept().await.expect("accept");
        let pending = perform_handshake(stream, peer, 64, Duration::from_secs(1))
            .await
            .expect("handshake");
        assert_eq!(pending.username, "alice");
        drop(client.await.expect("client task"));
    }

    #[tokio::test]
    async fn silent_connection_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let _client = TcpStream::connect(addr).await.expect("connect");
        let (stream, peer) = listener.accept().await.expect("accept");
        let result = perform_handshake(stream, peer, 64, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
