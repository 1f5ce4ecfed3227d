use super::command::{CommandBinding, Requery};
use super::dependency::DependencyGraph;
use super::loading::LoadingCounter;
use super::property::{ChangeSubscriber, PropertyName, PropertyStore};
use crate::config::NotificationConfig;
use crate::constants::DEFAULT_CHANNEL_CAPACITY;
use crate::core::dispatcher::{PresentationContext, dispatch};
use crate::events::{MessageBus, Subscription};
use crate::utils::errors::ViewStateError;
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Names of the properties every view-state carries.
pub mod props {
    use super::PropertyName;

    pub const ERROR: PropertyName = PropertyName::from_static("Error");
    pub const IS_LOADING: PropertyName = PropertyName::from_static("IsLoading");
    pub const IS_DEFECTIVE: PropertyName = PropertyName::from_static("IsDefective");
    pub const SHOW_DEFECTIVE: PropertyName = PropertyName::from_static("ShowDefective");
    pub const IS_READY: PropertyName = PropertyName::from_static("IsReady");
}

/// Property values, dependency edges, commands and loading state of one view
/// model.
///
/// Changing a property walks the dependency graph and delivers one change
/// notification per affected property to [`subscribe_changes`] listeners,
/// followed by requery signals for the affected commands. With a
/// presentation context attached, delivery happens on that context.
///
/// [`subscribe_changes`]: ViewState::subscribe_changes
pub struct ViewState {
    name: String,
    bus: Arc<MessageBus>,
    values: RwLock<PropertyStore>,
    graph: RwLock<DependencyGraph>,
    loading: Arc<LoadingCounter>,
    changes: broadcast::Sender<PropertyName>,
    channel_capacity: usize,
    presentation: Option<PresentationContext>,
    subscription: Mutex<Option<Subscription>>,
    disposed: AtomicBool,
}

impl ViewState {
    pub fn new(name: impl Into<String>, bus: Arc<MessageBus>) -> Self {
        let mut values = PropertyStore::new();
        values.set(props::ERROR, String::new());
        values.set(props::IS_LOADING, false);

        let mut graph = DependencyGraph::new();
        graph.add_edges(props::IS_LOADING, [props::IS_READY, props::SHOW_DEFECTIVE]);
        graph.add_edge(props::IS_DEFECTIVE, props::SHOW_DEFECTIVE);
        graph.add_edge(props::ERROR, props::IS_DEFECTIVE);

        let (changes, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);

        Self {
            name: name.into(),
            bus,
            values: RwLock::new(values),
            graph: RwLock::new(graph),
            loading: Arc::new(LoadingCounter::new()),
            changes,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            presentation: None,
            subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Deliver notifications on `context` instead of the calling thread.
    pub fn with_presentation(mut self, context: PresentationContext) -> Self {
        self.presentation = Some(context);
        self
    }

    /// Size the change and requery buffers from `config`. Commands
    /// registered afterwards use the same capacity.
    pub fn with_notifications(mut self, config: &NotificationConfig) -> Self {
        self.channel_capacity = config.channel_capacity.max(1);
        let (changes, _) = broadcast::channel(self.channel_capacity);
        self.changes = changes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn presentation(&self) -> Option<&PresentationContext> {
        self.presentation.as_ref()
    }

    pub fn loading_counter(&self) -> &Arc<LoadingCounter> {
        &self.loading
    }

    /// Current value of `name`, or `T::default()` when unset or of another
    /// type. `IsDefective`, `ShowDefective` and `IsReady` are computed.
    pub fn get<T>(&self, name: &str) -> T
    where
        T: Any + Clone + Default,
    {
        match self.derived(name) {
            Some(value) => {
                let value: Box<dyn Any> = Box::new(value);
                value.downcast::<T>().map(|value| *value).unwrap_or_default()
            }
            None => self.values.read().get(name),
        }
    }

    fn derived(&self, name: &str) -> Option<bool> {
        if name == props::IS_DEFECTIVE.as_str() {
            Some(self.is_defective())
        } else if name == props::SHOW_DEFECTIVE.as_str() {
            Some(self.show_defective())
        } else if name == props::IS_READY.as_str() {
            Some(self.is_ready())
        } else {
            None
        }
    }

    /// Store `value` and notify, cascading through dependents, when it
    /// differs from the current value. Returns whether it changed.
    ///
    /// Writing `IsLoading` enters or leaves one loading level like
    /// [`set_loading`](Self::set_loading). Computed properties cannot be
    /// written.
    pub fn set<T>(&self, name: impl Into<PropertyName>, value: T) -> bool
    where
        T: Any + PartialEq + Send + Sync,
    {
        let name = name.into();

        if name == props::IS_LOADING {
            return match (&value as &dyn Any).downcast_ref::<bool>() {
                Some(loading) => self.set_loading(*loading),
                None => {
                    warn!("{}: ignoring non-bool write to '{}'", self.name, name);
                    false
                }
            };
        }
        if self.derived(name.as_str()).is_some() {
            warn!("{}: '{}' is computed and cannot be set", self.name, name);
            return false;
        }

        let changed = self.values.write().set(name.clone(), value);

        if changed {
            self.raise_property_changed(name, true);
        }
        changed
    }

    /// Notify a change of `name` without touching its value, for computed
    /// properties.
    pub fn raise_property_changed(&self, name: impl Into<PropertyName>, cascade: bool) {
        if self.is_disposed() {
            return;
        }

        let name = name.into();
        let propagation = self.graph.read().notify(&name, cascade);
        trace!(
            "{}: '{}' changed, {} notification(s), {} requery(s)",
            self.name,
            name,
            propagation.properties.len(),
            propagation.commands.len()
        );

        let sender = self.changes.clone();
        let properties = propagation.properties;
        dispatch(self.presentation.as_ref(), move || {
            for property in properties {
                let _ = sender.send(property);
            }
        });

        for command in propagation.commands {
            command.request_requery();
        }
    }

    pub fn add_dependency<I, D>(&self, source: impl Into<PropertyName>, dependents: I)
    where
        I: IntoIterator<Item = D>,
        D: Into<PropertyName>,
    {
        self.graph.write().add_edges(source, dependents);
    }

    pub fn add_command_dependency<C>(&self, source: impl Into<PropertyName>, command: &Arc<C>)
    where
        C: Requery + 'static,
    {
        let command: Arc<dyn Requery> = command.clone();
        self.graph.write().add_command_edge(source, command);
    }

    /// Create a command sharing this state's loading counter. With
    /// `disable_on_loading` it reports non-executable while loading and is
    /// requeried whenever loading starts or stops.
    pub fn register_command<P, E, C>(
        &self,
        execute: E,
        can_execute: C,
        disable_on_loading: bool,
    ) -> Arc<CommandBinding<P>>
    where
        P: 'static,
        E: Fn(&P) -> Result<()> + Send + Sync + 'static,
        C: Fn(&P) -> bool + Send + Sync + 'static,
    {
        let command = Arc::new(
            CommandBinding::new(execute, can_execute, disable_on_loading, Arc::clone(&self.loading))
                .with_channel_capacity(self.channel_capacity)
                .with_presentation(self.presentation.clone()),
        );

        if disable_on_loading {
            self.add_command_dependency(props::IS_LOADING, &command);
        }
        debug!("{}: registered command {}", self.name, command.id());

        command
    }

    pub fn subscribe_changes(&self) -> ChangeSubscriber {
        ChangeSubscriber::new(self.changes.subscribe())
    }

    pub fn error(&self) -> String {
        self.get(props::ERROR.as_str())
    }

    pub fn set_error(&self, error: impl Into<String>) -> bool {
        self.set(props::ERROR, error.into())
    }

    pub fn clear_error(&self) -> bool {
        self.set_error(String::new())
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    pub fn is_defective(&self) -> bool {
        !self.error().is_empty()
    }

    pub fn show_defective(&self) -> bool {
        self.is_defective() && !self.is_loading()
    }

    pub fn is_ready(&self) -> bool {
        !self.is_loading()
    }

    /// Enter or leave one level of loading. `IsLoading` only changes, and is
    /// only notified, when the outermost level starts or ends. Returns
    /// whether it changed.
    pub fn set_loading(&self, loading: bool) -> bool {
        let mut changed = false;
        self.loading.update(loading, |is_loading| {
            changed = self.values.write().set(props::IS_LOADING, is_loading);
        });

        if changed {
            self.raise_property_changed(props::IS_LOADING, true);
        }
        changed
    }

    /// Loading until the returned guard is dropped.
    pub fn begin_loading(&self) -> LoadingGuard<'_> {
        self.set_loading(true);
        LoadingGuard { state: self }
    }

    /// Run `action` on the blocking pool after `delay`. Outside a tokio
    /// runtime a plain thread is used.
    pub fn execute_later<F>(&self, action: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        trace!("{}: scheduling work in {:?}", self.name, delay);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if let Err(e) = tokio::task::spawn_blocking(action).await {
                        warn!("Deferred work failed: {}", e);
                    }
                });
            }
            Err(_) => {
                thread::spawn(move || {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    action();
                });
            }
        }
    }

    /// Keep `subscription` alive for as long as this state is not disposed.
    pub fn attach_subscription(&self, subscription: Subscription) {
        if self.is_disposed() {
            debug!("{}: dropping subscription of a disposed state", self.name);
            return;
        }
        *self.subscription.lock() = Some(subscription);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Leave the bus and release commands. Later changes are no longer
    /// notified. Disposing twice is an error and leaves the state untouched.
    pub fn dispose(&self) -> Result<(), ViewStateError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            warn!("{}: dispose called on an already disposed view state", self.name);
            return Err(ViewStateError::AlreadyDisposed(self.name.clone()));
        }

        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
        self.graph.write().clear_commands();

        debug!("{}: disposed", self.name);
        Ok(())
    }
}

impl fmt::Debug for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewState")
            .field("name", &self.name)
            .field("loading", &self.loading.count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Leaves one loading level when dropped.
#[must_use = "loading ends as soon as the guard is dropped"]
pub struct LoadingGuard<'a> {
    state: &'a ViewState,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.set_loading(false);
    }
}
