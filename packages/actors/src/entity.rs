//! The `Entity` trait: what a keyed, persistent actor type looks like.

use std::fmt::Debug;
use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::context::EntityContext;
use crate::error::ActorError;

/// Address of one activation: entity kind plus key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId {
    pub kind: &'static str,
    pub key: String,
}

impl ActorId {
    pub fn new(kind: &'static str, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

/// A keyed actor type hosted by the [`ActorRuntime`](crate::ActorRuntime).
///
/// One value of the implementing type is registered per runtime and shared by
/// every activation of that kind, so it holds configuration and collaborators,
/// never per-key data. Per-key data lives in [`Entity::State`] and is reached
/// through the [`EntityContext`].
///
/// All hooks for one key run one at a time, in mailbox order.
pub trait Entity: Send + Sync + Sized + 'static {
    /// Kind name, used in actor ids and state keys.
    const KIND: &'static str;

    /// Name of the durable state slot.
    const STATE_NAME: &'static str = "state";

    /// Never deactivate for idleness. For singletons that drive themselves
    /// from a timer and would otherwise wait for a call to come back.
    const KEEP_ALIVE: bool = false;

    /// Durable per-key state.
    type State: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;

    /// Message enum. Variants carry an `RpcReplyPort` for the reply.
    type Msg: Send + 'static;

    /// Runs once after the state has been loaded, before the first message.
    fn on_activate(
        &self,
        _ctx: &mut EntityContext<Self>,
    ) -> impl Future<Output = Result<(), ActorError>> + Send {
        async { Ok(()) }
    }

    /// Handle one message. Implementations always answer the reply port.
    fn handle(
        &self,
        ctx: &mut EntityContext<Self>,
        msg: Self::Msg,
    ) -> impl Future<Output = ()> + Send;

    /// A registered timer fired.
    fn on_timer(
        &self,
        _ctx: &mut EntityContext<Self>,
        _name: &str,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Runs before the final flush when the activation is dropped.
    fn on_deactivate(
        &self,
        _ctx: &mut EntityContext<Self>,
    ) -> impl Future<Output = Result<(), ActorError>> + Send {
        async { Ok(()) }
    }
}

/// Why an activation is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivateReason {
    /// No calls or timer ticks for the configured idle period.
    Idle,
    /// The host asked for it.
    Explicit,
    /// The runtime is shutting down.
    Shutdown,
}
