pub mod message_bus;
pub mod registry;
pub mod subscriber;

pub use futures::future::BoxFuture;
pub use message_bus::{BusStats, FailurePolicy, MessageBus};
pub use registry::{SubscriberRegistry, Subscription, SubscriptionId};
pub use subscriber::{HandleMessage, HandleMessageAsync, HandlerResult, Subscriber};
