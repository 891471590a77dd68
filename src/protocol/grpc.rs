//! Adapters between tonic streams and the assist transport traits.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use super::{ActReply, ActReq, ReplySink, RequestSource};

pub type ReplyStream = ReceiverStream<std::result::Result<ActReply, Status>>;

/// Requests read from an inbound gRPC stream such as `tonic::Streaming<ActReq>`.
pub struct TonicRequests<S> {
    inner: S,
}

impl<S> TonicRequests<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> RequestSource for TonicRequests<S>
where
    S: Stream<Item = std::result::Result<ActReq, Status>> + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<ActReq>> {
        match self.inner.next().await {
            Some(Ok(req)) => Ok(Some(req)),
            Some(Err(status)) => Err(anyhow!("{}: {}", status.code(), status.message())),
            None => Ok(None),
        }
    }
}

pub struct TonicReplies {
    tx: mpsc::Sender<std::result::Result<ActReply, Status>>,
}

#[async_trait]
impl ReplySink for TonicReplies {
    async fn send(&mut self, reply: ActReply) -> Result<()> {
        self.tx
            .send(Ok(reply))
            .await
            .map_err(|_| anyhow!("reply stream closed"))
    }
}

/// Wraps a bidirectional call: the returned stream is what the service
/// method hands back to tonic.
pub fn split<S>(requests: S, buffer: usize) -> (TonicRequests<S>, TonicReplies, ReplyStream)
where
    S: Stream<Item = std::result::Result<ActReq, Status>> + Unpin + Send,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        TonicRequests::new(requests),
        TonicReplies { tx },
        ReceiverStream::new(rx),
    )
}
