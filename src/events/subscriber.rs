use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::Any;

/// Outcome of one handler invocation.
pub type HandlerResult = Result<()>;

/// Marks the implementer as a handler of one message type. A subscriber can
/// implement it for as many message types as it likes.
pub trait HandleMessage<M>: Send + Sync {
    fn handle(&self, message: &mut M) -> Result<()>;
}

/// Asynchronous counterpart of [`HandleMessage`], used by
/// [`MessageBus::publish_async`](super::MessageBus::publish_async).
#[async_trait]
pub trait HandleMessageAsync<M: Send>: Send + Sync {
    async fn handle_async(&self, message: &mut M) -> Result<()>;
}

/// Anything that can sit in the subscriber registry.
///
/// The bus only sees type-erased messages. `dispatch` performs the capability
/// check for the concrete message type and returns `None` when the subscriber
/// does not handle it. Implement it with the [`handles!`](crate::handles)
/// macro rather than by hand.
pub trait Subscriber: Send + Sync + 'static {
    fn dispatch(&self, message: &mut dyn Any) -> Option<Result<()>> {
        let _ = message;
        None
    }

    fn dispatch_async<'a>(
        &'a self,
        message: &'a mut (dyn Any + Send),
    ) -> Option<BoxFuture<'a, Result<()>>> {
        let _ = message;
        None
    }
}

/// Implements [`Subscriber`] for a type from its list of handled messages.
///
/// ```ignore
/// handles!(LibraryController => [GoBackRequest, OpenLibrary]);
/// handles!(Importer => [Cancel]; async [ImportFolder]);
/// ```
///
/// Every listed synchronous message needs a [`HandleMessage`] impl and every
/// asynchronous one a [`HandleMessageAsync`] impl.
#[macro_export]
macro_rules! handles {
    ($subscriber:ty => [$($message:ty),* $(,)?]) => {
        $crate::handles!($subscriber => [$($message),*]; async []);
    };
    ($subscriber:ty => [$($message:ty),* $(,)?]; async [$($async_message:ty),* $(,)?]) => {
        impl $crate::events::Subscriber for $subscriber {
            fn dispatch(
                &self,
                message: &mut dyn ::std::any::Any,
            ) -> ::std::option::Option<$crate::events::HandlerResult> {
                $(
                    if message.is::<$message>() {
                        let message = message.downcast_mut::<$message>()?;
                        return ::std::option::Option::Some(
                            <Self as $crate::events::HandleMessage<$message>>::handle(self, message),
                        );
                    }
                )*
                let _ = message;
                ::std::option::Option::None
            }

            fn dispatch_async<'a>(
                &'a self,
                message: &'a mut (dyn ::std::any::Any + ::std::marker::Send),
            ) -> ::std::option::Option<$crate::events::BoxFuture<'a, $crate::events::HandlerResult>> {
                $(
                    if message.is::<$async_message>() {
                        let message = message.downcast_mut::<$async_message>()?;
                        return ::std::option::Option::Some(
                            <Self as $crate::events::HandleMessageAsync<$async_message>>::handle_async(
                                self, message,
                            ),
                        );
                    }
                )*
                let _ = message;
                ::std::option::Option::None
            }
        }
    };
}
