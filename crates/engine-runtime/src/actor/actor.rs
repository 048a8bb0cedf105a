use crate::error::ActorError;
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub struct ActorContext {
    name: Arc<str>,
}

impl ActorContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A task owning its state and fed through a single mailbox.
///
/// The runtime calls `on_start` once, then `handle` for every message, and
/// `on_stop` after the last sender is dropped.
#[async_trait]
pub trait Actor<M>: Send + 'static
where
    M: Send + Debug + 'static,
{
    async fn on_start(&mut self, _ctx: &ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    async fn handle(&mut self, msg: M, ctx: &ActorContext) -> Result<(), ActorError>;

    async fn on_stop(&mut self, _ctx: &ActorContext) -> Result<(), ActorError> {
        Ok(())
    }
}

/// Handle used by other components to send messages to an actor.
#[derive(Debug)]
pub struct ActorRef<M>
where
    M: Send + Debug + 'static,
{
    name: Arc<str>,
    tx: mpsc::Sender<M>,
}

impl<M> Clone for ActorRef<M>
where
    M: Send + Debug + 'static,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M> ActorRef<M>
where
    M: Send + Debug + 'static,
{
    pub fn new(name: impl Into<String>, tx: mpsc::Sender<M>) -> Self {
        Self {
            name: Arc::from(name.into()),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ActorError::MailboxClosed)
    }

    /// Sends a message carrying a reply channel and waits for the answer.
    pub async fn ask<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> M) -> Result<R, ActorError> {
        let (reply, answer) = oneshot::channel();
        self.send(make(reply)).await?;
        answer.await.map_err(|_| ActorError::NoReply)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
