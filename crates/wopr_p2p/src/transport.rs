//! The opaque transport seam.
//!
//! The engine does not know how peers find each other; it asks a `Transport`
//! to join a 32-byte topic (here always SHA-256 of the listener's signing
//! key) and receives bidirectional line-oriented byte streams. Discovery,
//! NAT traversal, and relaying all live behind this trait.
//!
//! The `memory` submodule is an in-process implementation over
//! `tokio::io::duplex`, used by the integration tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

pub type Topic = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listen for inbound connections on the topic.
    Server,
    /// Dial whoever serves the topic.
    Client,
}

/// One bidirectional, newline-framed byte stream.
#[async_trait]
pub trait Connection: Send {
    /// Next line without its terminator; `None` on clean EOF.
    async fn read_line(&mut self) -> std::io::Result<Option<String>>;

    /// Write one line; the terminator is appended here.
    async fn write_line(&mut self, line: &str) -> std::io::Result<()>;

    async fn close(&mut self);
}

pub type BoxedConnection = Box<dyn Connection>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Join `topic`. Servers receive a stream of inbound connections;
    /// clients receive exactly one connection (or an error if nobody
    /// serves the topic).
    async fn join(&self, topic: Topic, role: Role) -> std::io::Result<mpsc::Receiver<BoxedConnection>>;

    /// Release all transport resources.
    async fn destroy(&self);
}

pub mod memory {
    //! Topic-keyed in-process transport.

    use std::collections::HashMap;
    use std::io::ErrorKind;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
    use tokio::sync::mpsc;

    use super::{BoxedConnection, Connection, Role, Topic, Transport};

    const STREAM_CAPACITY: usize = 64 * 1024;

    /// Shared hub; clone the `Arc` into every node under test.
    #[derive(Default)]
    pub struct MemoryTransport {
        topics: Mutex<HashMap<Topic, mpsc::Sender<BoxedConnection>>>,
    }

    impl MemoryTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn join(&self, topic: Topic, role: Role) -> std::io::Result<mpsc::Receiver<BoxedConnection>> {
            match role {
                Role::Server => {
                    let (tx, rx) = mpsc::channel(16);
                    self.topics.lock().insert(topic, tx);
                    Ok(rx)
                }
                Role::Client => {
                    let server = self
                        .topics
                        .lock()
                        .get(&topic)
                        .cloned()
                        .ok_or_else(|| std::io::Error::new(ErrorKind::NotConnected, "no peer on topic"))?;

                    let (near, far) = tokio::io::duplex(STREAM_CAPACITY);
                    server
                        .send(Box::new(DuplexConnection::new(far)))
                        .await
                        .map_err(|_| std::io::Error::new(ErrorKind::BrokenPipe, "listener gone"))?;

                    let (tx, rx) = mpsc::channel(1);
                    tx.send(Box::new(DuplexConnection::new(near)) as BoxedConnection)
                        .await
                        .map_err(|_| std::io::Error::new(ErrorKind::BrokenPipe, "dial channel closed"))?;
                    Ok(rx)
                }
            }
        }

        async fn destroy(&self) {
            self.topics.lock().clear();
        }
    }

    struct DuplexConnection {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl DuplexConnection {
        fn new(stream: DuplexStream) -> Self {
            let (read, write) = tokio::io::split(stream);
            Self {
                reader: BufReader::new(read),
                writer: write,
            }
        }
    }

    #[async_trait]
    impl Connection for DuplexConnection {
        async fn read_line(&mut self) -> std::io::Result<Option<String>> {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Ok(Some(line))
        }

        async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await
        }

        async fn close(&mut self) {
            let _ = self.writer.shutdown().await;
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn client_reaches_server_on_same_topic() {
            let hub = MemoryTransport::new();
            let topic = [7u8; 32];
            let mut server_rx = hub.join(topic, Role::Server).await.unwrap();
            let mut client_rx = hub.join(topic, Role::Client).await.unwrap();

            let mut client = client_rx.recv().await.unwrap();
            let mut server = server_rx.recv().await.unwrap();

            client.write_line("ping").await.unwrap();
            assert_eq!(server.read_line().await.unwrap().as_deref(), Some("ping"));
            server.write_line("pong").await.unwrap();
            assert_eq!(client.read_line().await.unwrap().as_deref(), Some("pong"));

            client.close().await;
            assert_eq!(server.read_line().await.unwrap(), None);
        }

        #[tokio::test]
        async fn client_without_server_fails() {
            let hub = MemoryTransport::new();
            assert!(hub.join([9u8; 32], Role::Client).await.is_err());
        }
    }
}
