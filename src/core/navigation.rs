use crate::core::dispatcher::PresentationContext;
use crate::core::viewmodels::ViewModel;
use crate::events::{HandleMessage, MessageBus, Subscription};
use crate::handles;
use crate::utils::errors::{BusError, NavigationError};
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NavigationMode {
    #[default]
    New,
    Back,
    Forward,
    Refresh,
}

/// Asks the navigation controller to return to the previous page.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoBackRequest;

/// Published before the frame leaves the current page.
#[derive(Debug, Clone)]
pub struct NavigatingEvent {
    pub mode: NavigationMode,
    pub target: String,
}

/// Published after a navigation finished and the page was initialized.
#[derive(Debug, Clone)]
pub struct NavigatedEvent {
    pub mode: NavigationMode,
    pub view_model: Option<&'static str>,
}

/// Published when the page bound to a `V` view model has been navigated to.
pub struct NavigationCompleted<V> {
    pub mode: NavigationMode,
    _view_model: PhantomData<fn() -> V>,
}

impl<V> NavigationCompleted<V> {
    pub fn new(mode: NavigationMode) -> Self {
        Self {
            mode,
            _view_model: PhantomData,
        }
    }
}

impl<V> Clone for NavigationCompleted<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for NavigationCompleted<V> {}

impl<V> fmt::Debug for NavigationCompleted<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationCompleted")
            .field("view_model", &type_name::<V>())
            .field("mode", &self.mode)
            .finish()
    }
}

/// The page stack the controller drives. Implemented by the host's frame.
pub trait Navigator: Send + Sync {
    fn can_go_back(&self) -> bool;

    fn go_back(&self) -> Result<()>;

    fn navigate(&self, page: &str, extra: Option<Box<dyn Any + Send + Sync>>) -> Result<()>;
}

type PublishCompleted = fn(&MessageBus, NavigationMode) -> Result<(), BusError>;

struct Route {
    name: &'static str,
    publish: PublishCompleted,
}

/// View model types whose [`NavigationCompleted`] event can be published
/// from a type-erased view model. Filled once at start-up.
#[derive(Default)]
pub struct NavigationTable {
    routes: HashMap<TypeId, Route>,
}

impl NavigationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<V: ViewModel>(&mut self) -> &mut Self {
        self.routes.insert(
            TypeId::of::<V>(),
            Route {
                name: type_name::<V>(),
                publish: publish_completed::<V>,
            },
        );
        self
    }

    pub fn contains<V: ViewModel>(&self) -> bool {
        self.routes.contains_key(&TypeId::of::<V>())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Publish `NavigationCompleted<V>` for the concrete type of
    /// `view_model`. Returns `false` when that type was never registered.
    pub fn publish_completed(
        &self,
        bus: &MessageBus,
        view_model: &dyn ViewModel,
        mode: NavigationMode,
    ) -> Result<bool, NavigationError> {
        match self.routes.get(&view_model.view_model_type()) {
            Some(route) => {
                debug!("Navigation to {} completed ({:?})", route.name, mode);
                (route.publish)(bus, mode)?;
                Ok(true)
            }
            None => {
                debug!(
                    "No navigation route for {}, skipping completion event",
                    view_model.view_model_name()
                );
                Ok(false)
            }
        }
    }
}

impl fmt::Debug for NavigationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.values().map(|route| route.name))
            .finish()
    }
}

fn publish_completed<V: 'static>(bus: &MessageBus, mode: NavigationMode) -> Result<(), BusError> {
    bus.publish(NavigationCompleted::<V>::new(mode)).map(|_| ())
}

/// Bridges the host's frame and the bus.
///
/// Tracks the view model of the current page, publishes the navigation
/// events and answers [`GoBackRequest`]s.
pub struct NavigationController {
    bus: Arc<MessageBus>,
    navigator: Arc<dyn Navigator>,
    table: NavigationTable,
    presentation: Option<PresentationContext>,
    current: RwLock<Option<Arc<dyn ViewModel>>>,
    mode: Mutex<NavigationMode>,
    subscription: Mutex<Option<Subscription>>,
}

impl NavigationController {
    pub fn new(bus: Arc<MessageBus>, navigator: Arc<dyn Navigator>, table: NavigationTable) -> Self {
        Self {
            bus,
            navigator,
            table,
            presentation: None,
            current: RwLock::new(None),
            mode: Mutex::new(NavigationMode::New),
            subscription: Mutex::new(None),
        }
    }

    pub fn with_presentation(mut self, context: PresentationContext) -> Self {
        self.presentation = Some(context);
        self
    }

    /// Share the controller and subscribe it to the bus for as long as it
    /// lives.
    pub fn register(self) -> Arc<Self> {
        let controller = Arc::new(self);
        let subscription = controller.bus.subscribe(&controller);
        *controller.subscription.lock() = Some(subscription);
        info!("Navigation controller registered ({} route(s))", controller.table.len());
        controller
    }

    pub fn current_view_model(&self) -> Option<Arc<dyn ViewModel>> {
        self.current.read().clone()
    }

    pub fn navigation_mode(&self) -> NavigationMode {
        *self.mode.lock()
    }

    pub fn can_go_back(&self) -> bool {
        self.navigator.can_go_back()
    }

    /// The frame is about to navigate.
    pub fn on_navigating(
        &self,
        mode: NavigationMode,
        target: impl Into<String>,
    ) -> Result<(), NavigationError> {
        *self.mode.lock() = mode;
        self.bus.publish(NavigatingEvent {
            mode,
            target: target.into(),
        })?;
        Ok(())
    }

    /// The frame finished navigating to a page bound to `view_model`.
    ///
    /// Publishes the typed completion event, initializes the page and then
    /// publishes [`NavigatedEvent`]. Pages without a view model are only
    /// tracked.
    pub fn on_navigated(
        &self,
        view_model: Option<Arc<dyn ViewModel>>,
        extra: Option<&(dyn Any + Send + Sync)>,
    ) -> Result<(), NavigationError> {
        *self.current.write() = view_model.clone();

        let Some(view_model) = view_model else {
            debug!("Navigated to a page without view model");
            return Ok(());
        };

        let mode = self.navigation_mode();
        self.table
            .publish_completed(&self.bus, view_model.as_ref(), mode)?;
        view_model.initialize_page(extra);

        self.bus.publish(NavigatedEvent {
            mode,
            view_model: Some(view_model.view_model_name()),
        })?;
        Ok(())
    }

    /// Navigate the frame to `page`, on the presentation context when one is
    /// attached. Work queued from another thread reports failures in the log
    /// only.
    pub fn navigate_to(
        &self,
        page: &str,
        extra: Option<Box<dyn Any + Send + Sync>>,
    ) -> Result<(), NavigationError> {
        if let Some(context) = &self.presentation
            && !context.has_access()
        {
            let navigator = Arc::clone(&self.navigator);
            let page = page.to_string();
            context.invoke_later(move || {
                if let Err(e) = navigator.navigate(&page, extra) {
                    warn!("Queued navigation to '{}' failed: {}", page, e);
                }
            });
            return Ok(());
        }

        debug!("Navigating to '{}'", page);
        self.navigator
            .navigate(page, extra)
            .map_err(|source| NavigationError::Navigator {
                page: page.to_string(),
                source,
            })
    }

    fn go_back(navigator: &dyn Navigator, current: Option<&dyn ViewModel>) -> Result<()> {
        // Leaving a failed page resets its error state
        if let Some(view_model) = current
            && view_model.state().is_defective()
        {
            view_model.state().clear_error();
        }

        if navigator.can_go_back() {
            navigator.go_back()?;
        }
        Ok(())
    }
}

impl HandleMessage<GoBackRequest> for NavigationController {
    fn handle(&self, _message: &mut GoBackRequest) -> Result<()> {
        if !self.can_go_back() {
            debug!("Go back requested with an empty history");
            return Ok(());
        }

        let navigator = Arc::clone(&self.navigator);
        let current = self.current_view_model();

        match &self.presentation {
            Some(context) if !context.has_access() => {
                context.invoke_later(move || {
                    if let Err(e) = Self::go_back(navigator.as_ref(), current.as_deref()) {
                        warn!("Queued go back failed: {}", e);
                    }
                });
                Ok(())
            }
            _ => Self::go_back(navigator.as_ref(), current.as_deref()),
        }
    }
}

handles!(NavigationController => [GoBackRequest]);

impl fmt::Debug for NavigationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationController")
            .field("routes", &self.table)
            .field("mode", &self.navigation_mode())
            .finish()
    }
}
