use crate::actor::{Actor, ActorContext, ActorRef};
use std::fmt::Debug;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error};

/// Runs the actor's event loop on its own task.
pub fn spawn_actor<M, A>(
    name: impl Into<String>,
    mailbox_capacity: usize,
    mut actor: A,
) -> (ActorRef<M>, JoinHandle<()>)
where
    A: Actor<M>,
    M: Send + Debug + 'static,
{
    let name = name.into();
    let ctx = ActorContext::new(name.clone());
    let (tx, mut rx) = mpsc::channel::<M>(mailbox_capacity.max(1));
    let actor_ref = ActorRef::new(name, tx);

    let handle = tokio::spawn(async move {
        if let Err(e) = actor.on_start(&ctx).await {
            error!(actor = %ctx.name(), error = %e, "actor on_start failed");
            return;
        }

        while let Some(msg) = rx.recv().await {
            debug!(actor = %ctx.name(), ?msg, "message received");
            if let Err(e) = actor.handle(msg, &ctx).await {
                error!(actor = %ctx.name(), error = %e, "actor handle failed");
            }
        }

        if let Err(e) = actor.on_stop(&ctx).await {
            error!(actor = %ctx.name(), error = %e, "actor on_stop failed");
        }
    });

    (actor_ref, handle)
}
