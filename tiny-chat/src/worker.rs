//! Relay worker: one task per joined connection, shuttling frames between the
//! socket and the session's channel pair without interpreting them.

use std::net::SocketAddr;

use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt},
    select,
};
use tracing::{debug, warn};

use crate::{
    protocol::{FrameReader, write_frame},
    session::SessionLink,
};

/// Why a worker stopped relaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The client closed its end of the connection.
    PeerClosed,
    /// Reading from or writing to the client failed.
    TransportError,
    /// The dispatcher dropped the session.
    SessionClosed,
}

pub struct RelayWorker<R, W> {
    frames: FrameReader<R>,
    writer: W,
    link: SessionLink,
    peer: Option<SocketAddr>,
}

impl<R, W> RelayWorker<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        frames: FrameReader<R>,
        writer: W,
        link: SessionLink,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            frames,
            writer,
            link,
            peer,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<WorkerExit> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> WorkerExit {
        let RelayWorker {
            mut frames,
            mut writer,
            link,
            peer,
        } = self;
        let SessionLink {
            inbound,
            mut outbound,
            wakeup,
        } = link;

        let exit = loop {
            select! {
                frame = frames.next_frame() => match frame {
                    Ok(Some(frame)) => {
                        // Waiting here stalls only this client when the dispatcher is behind.
                        if inbound.send(frame).await.is_err() {
                            break WorkerExit::SessionClosed;
                        }
                        wakeup.notify_one();
                    }
                    Ok(None) => break WorkerExit::PeerClosed,
                    Err(err) => {
                        warn!(?peer, error = ?err, "failed to read from client");
                        break WorkerExit::TransportError;
                    }
                },
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(err) = write_frame(&mut writer, &frame).await {
                            warn!(?peer, error = ?err, "failed to write to client");
                            break WorkerExit::TransportError;
                        }
                    }
                    None => break WorkerExit::SessionClosed,
                },
            }
        };

        // The dispatcher reads a closed inbound channel as the disconnect.
        drop(inbound);
        wakeup.notify_one();

        if let Err(err) = writer.shutdown().await {
            debug!(?peer, error = ?err, "failed to shut down client socket");
        }
        debug!(?peer, ?exit, "relay worker stopped");
        exit
    }
}
