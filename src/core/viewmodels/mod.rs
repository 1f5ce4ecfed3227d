pub mod command;
pub mod dependency;
pub mod loading;
pub mod property;
pub mod view_state;

pub use command::{CommandBinding, CommandId, Requery, RequerySubscriber};
pub use dependency::{DependencyGraph, Propagation};
pub use loading::LoadingCounter;
pub use property::{ChangeSubscriber, PropertyName, PropertyStore};
pub use view_state::{LoadingGuard, ViewState, props};

use crate::events::Subscriber;
use std::any::{Any, TypeId, type_name};
use std::sync::Arc;
use tracing::debug;

/// A view model: bus subscriber plus the view-state it exposes.
pub trait ViewModel: Subscriber {
    fn state(&self) -> &ViewState;

    /// Called once after the view model joined the bus.
    fn initialize(&self) {}

    /// Called every time a page bound to this view model is navigated to.
    fn initialize_page(&self, _extra: Option<&(dyn Any + Send + Sync)>) {}

    fn view_model_type(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    fn view_model_name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Share `view_model`, subscribe it to its state's bus and initialize it.
///
/// The subscription lives in the view-state and ends on
/// [`ViewState::dispose`] or when the view model is dropped.
pub fn register<V: ViewModel>(view_model: V) -> Arc<V> {
    let view_model = Arc::new(view_model);
    let state = view_model.state();

    let subscription = state.bus().subscribe(&view_model);
    state.attach_subscription(subscription);
    debug!("Registered view model {}", view_model.view_model_name());

    view_model.initialize();
    view_model
}
