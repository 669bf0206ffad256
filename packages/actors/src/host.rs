//! The ractor actor that hosts one activation of an [`Entity`].

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, ActorStatus, RpcReplyPort};

use crate::context::{EntityContext, TimerHandle};
use crate::entity::{ActorId, DeactivateReason, Entity};
use crate::error::ActorError;
use crate::runtime::ActorRuntime;

/// Mailbox envelope of a hosted entity.
///
/// Calls, timer ticks and lifecycle requests share one mailbox, which is
/// what serializes everything that touches an activation's state.
pub enum HostMessage<M> {
    /// An entity message.
    Call(M),
    /// A registered timer fired.
    Timer(String),
    /// Periodic idle probe.
    IdleCheck,
    /// Register a timer on behalf of a caller outside the actor.
    RegisterTimer {
        name: String,
        interval: Duration,
        first_due: Duration,
        reply: RpcReplyPort<TimerHandle>,
    },
    /// Flush and stop. Replies `Ok(false)` when an idle request finds the
    /// activation busy again.
    Deactivate {
        reason: DeactivateReason,
        reply: RpcReplyPort<Result<bool, ActorError>>,
    },
}

pub(crate) struct HostArgs {
    pub id: ActorId,
    pub runtime: ActorRuntime,
}

pub(crate) struct EntityHost<E: Entity> {
    entity: Arc<E>,
}

impl<E: Entity> EntityHost<E> {
    pub fn new(entity: Arc<E>) -> Self {
        Self { entity }
    }

    async fn deactivate(
        &self,
        ctx: &mut EntityContext<E>,
        reason: DeactivateReason,
    ) -> Result<(), ActorError> {
        self.entity.on_deactivate(ctx).await?;
        if ctx.is_dirty() {
            ctx.write_state().await?;
        }
        ctx.shut_down();
        tracing::info!(kind = E::KIND, key = %ctx.key(), ?reason, "deactivated");
        Ok(())
    }
}

impl<E: Entity> Actor for EntityHost<E> {
    type Msg = HostMessage<E::Msg>;
    type State = EntityContext<E>;
    type Arguments = HostArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let mut ctx = EntityContext::<E>::load(args.id, args.runtime, myself).await?;
        self.entity.on_activate(&mut ctx).await?;
        ctx.start_idle_check();
        tracing::info!(kind = E::KIND, key = %ctx.key(), exists = ctx.state().is_some(), "activated");
        Ok(ctx)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        ctx: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            HostMessage::Call(msg) => {
                ctx.touch();
                self.entity.handle(ctx, msg).await;
            }

            HostMessage::Timer(name) => {
                if ctx.timer_active(&name) {
                    ctx.touch();
                    self.entity.on_timer(ctx, &name).await;
                }
            }

            HostMessage::IdleCheck => {
                if ctx.take_idle_request() {
                    let runtime = ctx.runtime().clone();
                    let id = ctx.id().clone();
                    tokio::spawn(async move {
                        if let Err(e) = runtime.deactivate_id(&id, DeactivateReason::Idle).await {
                            tracing::warn!(actor = %id, error = %e, "idle deactivation failed");
                        }
                    });
                }
            }

            HostMessage::RegisterTimer {
                name,
                interval,
                first_due,
                reply,
            } => {
                let handle = ctx.register_timer(name, interval, first_due);
                let _ = reply.send(handle);
            }

            HostMessage::Deactivate { reason, reply } => {
                if reason == DeactivateReason::Idle && !ctx.is_idle() {
                    let _ = reply.send(Ok(false));
                    return Ok(());
                }

                match self.deactivate(ctx, reason).await {
                    Ok(()) => {
                        let _ = reply.send(Ok(true));
                        myself.stop(None);
                    }
                    Err(e) if reason == DeactivateReason::Shutdown => {
                        tracing::error!(kind = E::KIND, key = %ctx.key(), error = %e, "dropping activation with unsaved state");
                        let _ = reply.send(Err(e));
                        myself.stop(None);
                    }
                    Err(e) => {
                        tracing::warn!(kind = E::KIND, key = %ctx.key(), error = %e, "deactivation refused, staying active");
                        if reason == DeactivateReason::Idle {
                            ctx.clear_idle_request();
                        }
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        ctx: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        ctx.shut_down();
        Ok(())
    }
}

/// Type-erased view of a running activation, as stored in the runtime's
/// activation table.
pub(crate) trait Activation: Send + Sync {
    fn deactivate(&self, reason: DeactivateReason) -> BoxFuture<'_, Result<bool, ActorError>>;
    fn is_alive(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<M: Send + 'static> Activation for ActorRef<HostMessage<M>> {
    fn deactivate(&self, reason: DeactivateReason) -> BoxFuture<'_, Result<bool, ActorError>> {
        Box::pin(async move {
            match self
                .call(|reply| HostMessage::Deactivate { reason, reply }, None)
                .await
            {
                Ok(CallResult::Success(result)) => result,
                // Mailbox already closed: nothing left to flush.
                Ok(_) | Err(_) => Ok(true),
            }
        })
    }

    fn is_alive(&self) -> bool {
        !matches!(
            self.get_status(),
            ActorStatus::Stopping | ActorStatus::Stopped
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Typed handle to an activation. Cheap to clone.
///
/// Obtained from [`ActorRuntime::get_or_activate`]. Calls are delivered
/// through the activation's mailbox; if the activation stopped before the
/// call reached it, the handle re-resolves the key once and retries.
pub struct EntityHandle<E: Entity> {
    runtime: ActorRuntime,
    id: ActorId,
    actor: ActorRef<HostMessage<E::Msg>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for EntityHandle<E> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            id: self.id.clone(),
            actor: self.actor.clone(),
            _entity: PhantomData,
        }
    }
}

enum Delivery<R> {
    Replied(R),
    Gone,
    TimedOut,
}

impl<E: Entity> EntityHandle<E> {
    pub(crate) fn new(runtime: ActorRuntime, id: ActorId, actor: ActorRef<HostMessage<E::Msg>>) -> Self {
        Self {
            runtime,
            id,
            actor,
            _entity: PhantomData,
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.id.key
    }

    /// Send a message built by `build` and wait for the reply.
    pub async fn call<R, F>(&self, build: F) -> Result<R, ActorError>
    where
        R: Send + 'static,
        F: Fn(RpcReplyPort<R>) -> E::Msg + Send + Sync,
    {
        let timeout = self.runtime.config().call_timeout;
        match deliver(&self.actor, &build, timeout).await {
            Delivery::Replied(reply) => Ok(reply),
            Delivery::TimedOut => Err(ActorError::Timeout(self.id.to_string())),
            Delivery::Gone => {
                tracing::debug!(actor = %self.id, "activation stopped before delivery, re-resolving");
                let fresh = self.runtime.get_or_activate::<E>(self.id.key.clone()).await?;
                match deliver(&fresh.actor, &build, timeout).await {
                    Delivery::Replied(reply) => Ok(reply),
                    Delivery::TimedOut => Err(ActorError::Timeout(self.id.to_string())),
                    Delivery::Gone => Err(ActorError::Unavailable(self.id.to_string())),
                }
            }
        }
    }

    /// Register a recurring timer from outside the actor.
    pub async fn register_timer(
        &self,
        name: impl Into<String>,
        interval: Duration,
        first_due: Duration,
    ) -> Result<TimerHandle, ActorError> {
        let name = name.into();
        match self
            .actor
            .call(
                |reply| HostMessage::RegisterTimer {
                    name,
                    interval,
                    first_due,
                    reply,
                },
                None,
            )
            .await
        {
            Ok(CallResult::Success(handle)) => Ok(handle),
            _ => Err(ActorError::Unavailable(self.id.to_string())),
        }
    }

    /// Flush and drop this activation.
    pub async fn deactivate(&self) -> Result<bool, ActorError> {
        self.runtime.deactivate::<E>(self.id.key.clone()).await
    }
}

async fn deliver<M, R, F>(
    actor: &ActorRef<HostMessage<M>>,
    build: &F,
    timeout: Option<Duration>,
) -> Delivery<R>
where
    M: Send + 'static,
    R: Send + 'static,
    F: Fn(RpcReplyPort<R>) -> M + Send + Sync,
{
    match actor
        .call(|reply| HostMessage::Call(build(reply)), timeout)
        .await
    {
        Ok(CallResult::Success(reply)) => Delivery::Replied(reply),
        Ok(CallResult::Timeout) => Delivery::TimedOut,
        Ok(CallResult::SenderError) | Err(_) => Delivery::Gone,
    }
}
