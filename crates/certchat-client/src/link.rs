//! Framed TCP connection shared by the CA and chat clients.

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use certchat_core::wire::{read_message, write_message};
use certchat_core::Message;

use crate::error::{ClientError, ClientResult};

#[derive(Debug)]
pub(crate) struct Link {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    max_frame_bytes: usize,
}

impl Link {
    pub(crate) async fn connect(addr: impl ToSocketAddrs, max_frame_bytes: usize) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(certchat_core::CertChatError::from)?;
        stream
            .set_nodelay(true)
            .map_err(certchat_core::CertChatError::from)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            max_frame_bytes,
        })
    }

    pub(crate) async fn send(&mut self, message: &Message) -> ClientResult<()> {
        write_message(&mut self.writer, message, self.max_frame_bytes).await?;
        Ok(())
    }

    /// Next message; `None` once the server has closed the connection.
    pub(crate) async fn next(&mut self) -> ClientResult<Option<Message>> {
        Ok(read_message(&mut self.reader, self.max_frame_bytes).await?)
    }

    pub(crate) async fn recv(&mut self) -> ClientResult<Message> {
        self.next().await?.ok_or(ClientError::Closed)
    }

    pub(crate) async fn shutdown(&mut self) -> ClientResult<()> {
        self.writer
            .shutdown()
            .await
            .map_err(certchat_core::CertChatError::from)?;
        Ok(())
    }
}
