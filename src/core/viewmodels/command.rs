use super::loading::LoadingCounter;
use crate::constants::DEFAULT_CHANNEL_CAPACITY;
use crate::core::dispatcher::{PresentationContext, dispatch};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    fn next() -> Self {
        Self(NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}

/// Something whose executability has to be re-evaluated when a property it
/// depends on changes.
pub trait Requery: Send + Sync {
    fn command_id(&self) -> CommandId;
    fn request_requery(&self);
}

type ExecuteFn<P> = Box<dyn Fn(&P) -> Result<()> + Send + Sync>;
type CanExecuteFn<P> = Box<dyn Fn(&P) -> bool + Send + Sync>;

/// An action plus the predicate deciding whether it may run.
///
/// The binding never calls its own predicate before executing; callers
/// check [`can_execute`](Self::can_execute) and listen for requery signals
/// to refresh whatever they show for it.
pub struct CommandBinding<P = ()> {
    id: CommandId,
    execute: ExecuteFn<P>,
    can_execute: CanExecuteFn<P>,
    disable_on_loading: bool,
    loading: Arc<LoadingCounter>,
    requery: broadcast::Sender<CommandId>,
    presentation: Option<PresentationContext>,
}

impl<P> CommandBinding<P> {
    pub fn new<E, C>(
        execute: E,
        can_execute: C,
        disable_on_loading: bool,
        loading: Arc<LoadingCounter>,
    ) -> Self
    where
        E: Fn(&P) -> Result<()> + Send + Sync + 'static,
        C: Fn(&P) -> bool + Send + Sync + 'static,
    {
        let (requery, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let id = CommandId::next();
        trace!("Created command {} (disable on loading: {})", id, disable_on_loading);

        Self {
            id,
            execute: Box::new(execute),
            can_execute: Box::new(can_execute),
            disable_on_loading,
            loading,
            requery,
            presentation: None,
        }
    }

    /// Buffer at most `capacity` requery signals per listener.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        let (requery, _) = broadcast::channel(capacity.max(1));
        self.requery = requery;
        self
    }

    /// Marshal requery signals onto `context`.
    pub fn with_presentation(mut self, context: Option<PresentationContext>) -> Self {
        self.presentation = context;
        self
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn disables_on_loading(&self) -> bool {
        self.disable_on_loading
    }

    pub fn can_execute(&self, parameter: &P) -> bool {
        (self.can_execute)(parameter) && (!self.disable_on_loading || !self.loading.is_loading())
    }

    pub fn execute(&self, parameter: &P) -> Result<()> {
        debug!("Executing command {}", self.id);
        (self.execute)(parameter)
    }

    pub fn subscribe_requery(&self) -> RequerySubscriber {
        RequerySubscriber {
            receiver: self.requery.subscribe(),
        }
    }
}

impl<P: 'static> Requery for CommandBinding<P> {
    fn command_id(&self) -> CommandId {
        self.id
    }

    fn request_requery(&self) {
        let sender = self.requery.clone();
        let id = self.id;
        dispatch(self.presentation.as_ref(), move || {
            // No listeners is fine
            let _ = sender.send(id);
        });
    }
}

impl<P> fmt::Debug for CommandBinding<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBinding")
            .field("id", &self.id)
            .field("disable_on_loading", &self.disable_on_loading)
            .finish()
    }
}

/// Receives a signal each time a command should be re-evaluated.
pub struct RequerySubscriber {
    receiver: broadcast::Receiver<CommandId>,
}

impl RequerySubscriber {
    pub async fn wait_for_requery(&mut self) -> bool {
        match self.receiver.recv().await {
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => true,
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }

    pub fn try_recv(&mut self) -> bool {
        match self.receiver.try_recv() {
            Ok(_) => true,
            Err(broadcast::error::TryRecvError::Lagged(_)) => true,
            Err(_) => false,
        }
    }

    /// Number of signals received since the last call. Signals lost to a
    /// full buffer are not counted.
    pub fn pending(&mut self) -> usize {
        let mut count = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(_) => count += 1,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return count,
            }
        }
    }
}
