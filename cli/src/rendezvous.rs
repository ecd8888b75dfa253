//! One-shot start handshake between the two ends of the link
//!
//! The receiver binds first and waits for a single line of text; the sender
//! connects, sends it and reads the echo. After that neither side talks to
//! the other again.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("Rendezvous I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Expected {expected:?} from peer, got {got:?}")]
    Unexpected { expected: String, got: String },

    #[error("Peer closed the connection before the handshake finished")]
    Closed,

    #[error("No peer within {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, RendezvousError>;

async fn bounded<T, F>(limit: Option<Duration>, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| RendezvousError::Timeout(limit))?,
        None => work.await,
    }
}

async fn read_line(stream: &mut BufReader<TcpStream>) -> Result<String> {
    let mut line = String::new();
    if stream.read_line(&mut line).await? == 0 {
        return Err(RendezvousError::Closed);
    }
    Ok(line.trim_end().to_string())
}

/// Receiving end, bound before the sender is started.
pub struct ReadyListener {
    listener: TcpListener,
}

impl ReadyListener {
    pub async fn bind(address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        log::info!("Waiting for sender on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<String> {
        Ok(self.listener.local_addr()?.to_string())
    }

    /// Accept one peer, check its message and echo it back.
    pub async fn wait_for_ready(self, expected: &str, limit: Option<Duration>) -> Result<()> {
        bounded(limit, async {
            let (stream, peer) = self.listener.accept().await?;
            let mut stream = BufReader::new(stream);
            let got = read_line(&mut stream).await?;
            if got != expected {
                return Err(RendezvousError::Unexpected {
                    expected: expected.to_string(),
                    got,
                });
            }
            stream.get_mut().write_all(format!("{}\n", got).as_bytes()).await?;
            log::info!("Sender {} ready", peer);
            Ok(())
        })
        .await
    }
}

/// Sending end: announce readiness and wait for the echo.
pub async fn send_ready(address: &str, message: &str, limit: Option<Duration>) -> Result<()> {
    bounded(limit, async {
        let stream = TcpStream::connect(address).await?;
        let mut stream = BufReader::new(stream);
        stream
            .get_mut()
            .write_all(format!("{}\n", message).as_bytes())
            .await?;
        let reply = read_line(&mut stream).await?;
        if reply != message {
            return Err(RendezvousError::Unexpected {
                expected: message.to_string(),
                got: reply,
            });
        }
        log::info!("Receiver at {} acknowledged", address);
        Ok(())
    })
    .await
}
