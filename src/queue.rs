use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::session::{MessageContent, Messenger};

struct Job {
    destination: String,
    content: MessageContent,
    reply: oneshot::Sender<anyhow::Result<()>>,
}

/// Handle to the single worker that owns the messenger. Every send from
/// every request goes through it, so the transport only ever sees one call
/// at a time.
#[derive(Clone)]
pub struct SendQueue {
    tx: mpsc::Sender<Job>,
}

impl SendQueue {
    /// The worker exits once every handle has been dropped.
    pub fn spawn(messenger: Arc<dyn Messenger>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(messenger, rx));
        (Self { tx }, worker)
    }
}

async fn run_worker(messenger: Arc<dyn Messenger>, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.recv().await {
        let result = messenger.send_message(&job.destination, &job.content).await;
        if job.reply.send(result).is_err() {
            debug!("Caller for {} went away before the send finished", job.destination);
        }
    }
    debug!("Send queue worker stopped");
}

#[async_trait]
impl Messenger for SendQueue {
    async fn send_message(&self, destination: &str, content: &MessageContent) -> anyhow::Result<()> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Job {
                destination: destination.to_string(),
                content: content.clone(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("send queue is closed"))?;
        response
            .await
            .map_err(|_| anyhow!("send queue dropped the message"))?
    }
}
