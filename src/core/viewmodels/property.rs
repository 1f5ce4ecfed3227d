use std::any::{Any, type_name};
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::broadcast;
use tracing::warn;

/// Key of a view-state property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyName(Cow<'static, str>);

impl PropertyName {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PropertyName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PropertyName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for PropertyName {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for PropertyName {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for PropertyName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PropertyName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Current values of one owner's properties.
///
/// Values are type-erased; readers name the type they expect. Reading an
/// absent key, or a key holding another type, yields `T::default()`.
#[derive(Default)]
pub struct PropertyStore {
    values: HashMap<PropertyName, Box<dyn Any + Send + Sync>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T>(&self, name: &str) -> T
    where
        T: Any + Clone + Default,
    {
        match self.values.get(name) {
            None => T::default(),
            Some(value) => match value.downcast_ref::<T>() {
                Some(value) => value.clone(),
                None => {
                    warn!(
                        "Property '{}' does not hold a {}, returning default",
                        name,
                        type_name::<T>()
                    );
                    T::default()
                }
            },
        }
    }

    /// Like [`get`](Self::get) but distinguishes an absent or mistyped value.
    pub fn try_get<T>(&self, name: &str) -> Option<T>
    where
        T: Any + Clone,
    {
        self.values.get(name)?.downcast_ref::<T>().cloned()
    }

    /// Store `value` and report whether it differs from the previous one.
    /// Raises no notification by itself.
    pub fn set<T>(&mut self, name: impl Into<PropertyName>, value: T) -> bool
    where
        T: Any + PartialEq + Send + Sync,
    {
        let name = name.into();

        if let Some(slot) = self.values.get_mut(name.as_str())
            && let Some(current) = (**slot).downcast_mut::<T>()
        {
            if *current == value {
                return false;
            }
            *current = value;
            return true;
        }

        self.values.insert(name, Box::new(value));
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Receiving end of a view-state's change notifications.
pub struct ChangeSubscriber {
    receiver: broadcast::Receiver<PropertyName>,
}

impl ChangeSubscriber {
    pub(crate) fn new(receiver: broadcast::Receiver<PropertyName>) -> Self {
        Self { receiver }
    }

    /// Wait for the next changed property. Returns `None` once the owner is
    /// gone.
    pub async fn wait_for_change(&mut self) -> Option<PropertyName> {
        loop {
            match self.receiver.recv().await {
                Ok(name) => return Some(name),
                // Lagged behind: skip what was lost and keep waiting
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Change subscriber lagged, {} notification(s) lost", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<PropertyName> {
        loop {
            match self.receiver.try_recv() {
                Ok(name) => return Some(name),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Everything received so far, in notification order.
    pub fn drain(&mut self) -> Vec<PropertyName> {
        let mut names = Vec::new();
        while let Some(name) = self.try_recv() {
            names.push(name);
        }
        names
    }
}
