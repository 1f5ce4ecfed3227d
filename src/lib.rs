// In-process message bus and view-state notification engine shared by the
// controllers and view models of one application scope

#![allow(clippy::result_large_err)]

pub mod config;
pub mod constants;
pub mod core;
pub mod events;
pub mod utils;

pub use config::Config;
pub use crate::core::{
    DispatchOutcome, NavigationController, NavigationTable, Navigator, PresentationContext,
    ViewModel, ViewState,
};
pub use events::{HandleMessage, HandleMessageAsync, MessageBus, Subscriber, Subscription};
pub use utils::errors::{BusError, ConfigError, NavigationError, ViewStateError};
