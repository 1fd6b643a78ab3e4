//! [`Transport`] over a byte stream, framed with the `irc` crate's line codec.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use irc::proto::{IrcCodec, Message};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use super::Transport;
use crate::error::{TransportError, TransportResult};

type Frames<S> = Framed<S, IrcCodec>;

/// Line-framed IRC transport over any async stream (usually a `TcpStream`).
///
/// The read and write halves sit behind separate locks so a reader parked in
/// `receive` never holds up writers.
pub struct NetTransport<S> {
    writer: Mutex<SplitSink<Frames<S>, Message>>,
    reader: Mutex<SplitStream<Frames<S>>>,
}

impl<S> NetTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S) -> TransportResult<Self> {
        let codec = IrcCodec::new("utf-8")?;
        let (writer, reader) = Framed::new(stream, codec).split();
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }
}

#[async_trait]
impl<S> Transport for NetTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&self, message: &Message) -> TransportResult<()> {
        let mut writer = self.writer.lock().await;
        writer.send(message.clone()).await?;
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Message> {
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            Some(frame) => Ok(frame?),
            None => Err(TransportError::Closed),
        }
    }
}
