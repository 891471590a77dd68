use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ActReply, ActReq};

/// Incoming half of an assist stream.
#[async_trait]
pub trait RequestSource: Send {
    /// `Ok(None)` once the client has closed its side.
    async fn recv(&mut self) -> Result<Option<ActReq>>;
}

/// Outgoing half of an assist stream.
#[async_trait]
pub trait ReplySink: Send {
    async fn send(&mut self, reply: ActReply) -> Result<()>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecvError {
    #[error("stream closed by client")]
    Eof,

    #[error("stream Recv: {0}")]
    Stream(String),
}

pub type RecvReq = std::result::Result<ActReq, RecvError>;

/// Requests pumped off the stream by a background task.
///
/// The task delivers requests in order and finishes after one end-of-stream
/// or error marker. Dropping the `Inbound` stops it.
pub struct Inbound {
    rx: mpsc::Receiver<RecvReq>,
    task: JoinHandle<()>,
}

impl Inbound {
    pub async fn recv(&mut self) -> RecvReq {
        self.rx.recv().await.unwrap_or(Err(RecvError::Eof))
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn spawn_receiver(mut source: Box<dyn RequestSource>) -> Inbound {
    let (tx, rx) = mpsc::channel(1);

    let task = tokio::spawn(async move {
        loop {
            let item = match source.recv().await {
                Ok(Some(req)) => Ok(req),
                Ok(None) => Err(RecvError::Eof),
                Err(e) => Err(RecvError::Stream(format!("{:#}", e))),
            };

            let last = item.is_err();
            if tx.send(item).await.is_err() {
                debug!("request receiver dropped");
                break;
            }
            if last {
                break;
            }
        }
    });

    Inbound { rx, task }
}

/// Shared sender; one reply goes out at a time.
#[derive(Clone)]
pub struct Outbound {
    sink: Arc<Mutex<Box<dyn ReplySink>>>,
}

impl Outbound {
    pub fn new(sink: Box<dyn ReplySink>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    pub async fn send(&self, reply: ActReply) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(reply).await.context("stream Send")
    }
}

pub struct ChannelRequests {
    rx: mpsc::UnboundedReceiver<Result<ActReq>>,
}

#[async_trait]
impl RequestSource for ChannelRequests {
    async fn recv(&mut self) -> Result<Option<ActReq>> {
        self.rx.recv().await.transpose()
    }
}

pub struct ChannelReplies {
    tx: mpsc::UnboundedSender<ActReply>,
}

#[async_trait]
impl ReplySink for ChannelReplies {
    async fn send(&mut self, reply: ActReply) -> Result<()> {
        self.tx
            .send(reply)
            .map_err(|_| anyhow!("reply channel closed"))
    }
}

/// The client side of an in-memory transport.
pub struct ClientEnd {
    pub requests: mpsc::UnboundedSender<Result<ActReq>>,
    pub replies: mpsc::UnboundedReceiver<ActReply>,
}

impl ClientEnd {
    pub fn send(&self, req: ActReq) -> Result<()> {
        self.requests
            .send(Ok(req))
            .map_err(|_| anyhow!("request channel closed"))
    }

    pub async fn next_reply(&mut self) -> Option<ActReply> {
        self.replies.recv().await
    }
}

/// In-memory stream pair for embedding the pipeline without a network layer.
pub fn channel_transport() -> (ClientEnd, ChannelRequests, ChannelReplies) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();

    (
        ClientEnd {
            requests: req_tx,
            replies: reply_rx,
        },
        ChannelRequests { rx: req_rx },
        ChannelReplies { tx: reply_tx },
    )
}
