pub mod dispatcher;
pub mod navigation;
pub mod viewmodels;

pub use dispatcher::{DispatchOutcome, PresentationContext};
pub use navigation::{
    GoBackRequest, NavigatedEvent, NavigatingEvent, NavigationCompleted, NavigationController,
    NavigationMode, NavigationTable, Navigator,
};
pub use viewmodels::{ViewModel, ViewState};
