use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

pub enum ActorStatus<TState> {
    Continue(TState),
    Stop,
}

/// A single-threaded message loop owning its state exclusively.
///
/// `handle_message` is a synchronous transition; anything that has to wait
/// (timers, platform callbacks) is spawned and reports back to the actor
/// through its own reference.
#[async_trait]
pub trait Actor: Sized + 'static {
    type Message: Send + 'static;
    type State: Send + 'static;
    type InitArgs: Send;

    fn handle_message(
        msg: Self::Message,
        state: Self::State,
        context: &ActorContext<Self>,
    ) -> anyhow::Result<ActorStatus<Self::State>>;

    async fn init_state(
        args: Self::InitArgs,
        context: &ActorContext<Self>,
    ) -> anyhow::Result<Self::State>;
}

pub struct ActorContext<TActor: Actor> {
    self_ref: ActorReference<TActor>,
}

impl<TActor: Actor> ActorContext<TActor> {
    pub fn self_ref(&self) -> &ActorReference<TActor> {
        &self.self_ref
    }

    pub fn send_after(&self, msg: TActor::Message, delay: Duration) {
        let reference = self.self_ref.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            reference.send_message(msg);
        });
    }
}

pub struct ActorReference<TActor: Actor>(mpsc::UnboundedSender<TActor::Message>);

impl<TActor: Actor> Clone for ActorReference<TActor> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<TActor: Actor> ActorReference<TActor> {
    /// Returns `false` when the actor has already stopped.
    pub fn send_message(&self, msg: TActor::Message) -> bool {
        self.0.send(msg).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

pub struct ActorHandle<TActor: Actor> {
    task: JoinHandle<()>,
    reference: ActorReference<TActor>,
}

impl<TActor: Actor> ActorHandle<TActor> {
    pub fn actor_reference(&self) -> &ActorReference<TActor> {
        &self.reference
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self, timeout: Duration) {
        if tokio::time::timeout(timeout, self.task).await.is_err() {
            log::warn!("Actor did not stop within {timeout:?}");
        }
    }
}

pub async fn start<TActor: Actor>(args: TActor::InitArgs) -> anyhow::Result<ActorHandle<TActor>> {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let reference = ActorReference(sender);
    let context = ActorContext {
        self_ref: reference.clone(),
    };
    let initial_state = TActor::init_state(args, &context).await?;

    let task = tokio::spawn(async move {
        let mut state = initial_state;
        while let Some(msg) = receiver.recv().await {
            match TActor::handle_message(msg, state, &context) {
                Ok(ActorStatus::Continue(next)) => state = next,
                Ok(ActorStatus::Stop) => break,
                Err(error) => {
                    log::error!("Actor stopped after a failed transition: {error:#}");
                    break;
                }
            }
        }
    });

    Ok(ActorHandle { task, reference })
}
