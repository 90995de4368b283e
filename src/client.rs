use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use roleplay_realtime_types::audio::Base64EncodedAudioBytes;
use roleplay_realtime_types::{ClientMessage, InboundEvent, ServerMessage, Setup};

pub(crate) mod consts;
mod config;
mod utils;

pub use config::{Config, ConfigBuilder};

pub type ClientTx = tokio::sync::mpsc::Sender<ClientMessage>;
type ServerTx = tokio::sync::broadcast::Sender<InboundEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<InboundEvent>;

pub struct Connection {
    send_handle: tokio::task::JoinHandle<()>,
    recv_handle: tokio::task::JoinHandle<()>,
}

/// A live WebSocket connection to the conversational endpoint. Outbound
/// messages go through an mpsc channel to a writer task; inbound frames are
/// decoded and fanned out as [`InboundEvent`]s on a broadcast channel.
pub struct Client {
    capacity: usize,
    config: Config,
    c_tx: Option<ClientTx>,
    s_tx: Option<ServerTx>,
    conn: Option<Connection>,
}

impl Client {
    fn new(capacity: usize, config: Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_tx: None,
            conn: None,
        }
    }

    async fn connect(&mut self, setup: Setup) -> Result<()> {
        if self.c_tx.is_some() {
            anyhow::bail!("already connected");
        }

        let request = utils::build_request(&self.config).context("failed to build request")?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("failed to connect to live endpoint")?;

        let (mut write, mut read) = ws_stream.split();

        // The setup message must be the first frame on the wire.
        let setup = serde_json::to_string(&ClientMessage::Setup(setup))
            .context("failed to serialize setup message")?;
        write
            .send(Message::Text(setup))
            .await
            .context("failed to send setup message")?;

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel(self.capacity);
        let (s_tx, _) = tokio::sync::broadcast::channel(self.capacity);

        self.c_tx = Some(c_tx);
        self.s_tx = Some(s_tx.clone());

        let send_handle = tokio::spawn(async move {
            while let Some(message) = c_rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize message: {}", e);
                    }
                }
            }
            // Every sender is gone; tell the endpoint we are done. Best effort.
            if let Err(e) = write.send(Message::Close(None)).await {
                tracing::debug!("close frame not delivered: {}", e);
            }
        });

        let recv_handle = tokio::spawn(async move {
            let mut reason = None;
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        let _ = s_tx.send(InboundEvent::Error {
                            detail: e.to_string(),
                        });
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_message) => {
                            for event in server_message.into_events() {
                                if s_tx.send(event).is_err() {
                                    tracing::debug!("no subscribers for inbound event");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                "failed to deserialize server message: {}, text=> {:?}",
                                e,
                                text
                            );
                        }
                    },
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message: {} bytes", bin.len());
                    }
                    Message::Close(frame) => {
                        tracing::info!("connection closed: {:?}", frame);
                        reason = frame.map(|f| f.reason.to_string());
                        break;
                    }
                    _ => {}
                }
            }
            let _ = s_tx.send(InboundEvent::Closed { reason });
        });

        self.conn = Some(Connection {
            send_handle,
            recv_handle,
        });
        Ok(())
    }

    /// Subscribes to the inbound event stream.
    pub fn server_events(&self) -> Result<ServerRx> {
        match self.s_tx {
            Some(ref tx) => Ok(tx.subscribe()),
            None => anyhow::bail!("not connected yet"),
        }
    }

    /// A clone of the outbound message sender. The writer task stays alive
    /// until every clone (and this client) is dropped.
    pub fn sender(&self) -> Result<ClientTx> {
        match self.c_tx {
            Some(ref tx) => Ok(tx.clone()),
            None => anyhow::bail!("not connected yet"),
        }
    }

    /// Sends one transport-encoded audio frame.
    pub async fn send_realtime_audio(&self, frame: Base64EncodedAudioBytes) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(ClientMessage::audio_frame(frame))
                    .await
                    .context("writer task is gone")?;
                Ok(())
            }
            None => anyhow::bail!("not connected yet"),
        }
    }

    /// Closes the connection: drops the outbound sender so the writer drains
    /// and sends a close frame, then reaps both tasks. Any outstanding sender
    /// clones must be dropped first or this will wait on them.
    pub async fn close(&mut self) {
        self.c_tx = None;
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.send_handle.await {
                tracing::debug!("writer task ended abnormally: {}", e);
            }
            conn.recv_handle.abort();
        }
    }
}

pub async fn connect_with_config(capacity: usize, config: Config, setup: Setup) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect(setup).await?;
    Ok(client)
}

pub async fn connect(setup: Setup) -> Result<Client> {
    connect_with_config(1024, Config::new(), setup).await
}
