use crate::{
    actor::{Actor, ActorContext, spawn_actor},
    error::ActorError,
};
use async_trait::async_trait;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::oneshot;

#[derive(Debug)]
enum CounterMsg {
    Add(u64),
    Total(oneshot::Sender<u64>),
    Forget(oneshot::Sender<u64>),
}

struct Counter {
    total: u64,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Actor<CounterMsg> for Counter {
    async fn handle(&mut self, msg: CounterMsg, _ctx: &ActorContext) -> Result<(), ActorError> {
        match msg {
            CounterMsg::Add(n) => self.total += n,
            CounterMsg::Total(reply) => {
                let _ = reply.send(self.total);
            }
            CounterMsg::Forget(reply) => drop(reply),
        }
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ActorContext) -> Result<(), ActorError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn processes_messages_in_order_and_replies() {
    let stopped = Arc::new(AtomicBool::new(false));
    let (actor, handle) = spawn_actor(
        "counter",
        4,
        Counter {
            total: 0,
            stopped: stopped.clone(),
        },
    );
    assert_eq!(actor.name(), "counter");

    for n in 1..=10 {
        actor.send(CounterMsg::Add(n)).await.unwrap();
    }
    assert_eq!(actor.ask(CounterMsg::Total).await.unwrap(), 55);
    assert!(matches!(
        actor.ask(CounterMsg::Forget).await,
        Err(ActorError::NoReply)
    ));

    drop(actor);
    handle.await.unwrap();
    assert!(stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn send_fails_once_the_actor_is_gone() {
    let (actor, handle) = spawn_actor(
        "short-lived",
        1,
        Counter {
            total: 0,
            stopped: Arc::default(),
        },
    );
    handle.abort();
    let _ = handle.await;

    assert!(actor.is_closed());
    assert!(matches!(
        actor.send(CounterMsg::Add(1)).await,
        Err(ActorError::MailboxClosed)
    ));
}
