//! Dynamically typed payloads and the move/copy transport.
//!
//! Values crossing the boundary between a caller and the server travel inside
//! [`Payload`] handles. A handle owns an interior slot; transporting it with
//! copy semantics deep-clones the slot, while move semantics takes the boxed
//! value out and leaves the moved-from marker behind. Every clone of the
//! handle observes the marker, so a caller that handed a value away under a
//! move policy gets a [`WrapperError::Moved`] on any later access.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{WrapperError, WrapperResult};

/// A value that can live inside a [`Payload`]: any `Send` type that supports
/// the deep clone used for copy transports. Implemented for every
/// `T: Any + Send + Clone`.
pub trait PayloadValue: Any + Send {
    fn clone_value(&self) -> Box<dyn PayloadValue>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any + Send + Clone> PayloadValue for T {
    fn clone_value(&self) -> Box<dyn PayloadValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Shared handle to one transported value. Cheap to clone; all clones share
/// the same slot and therefore the same moved-from state.
#[derive(Clone)]
pub struct Payload {
    slot: Arc<Mutex<Option<Box<dyn PayloadValue>>>>,
}

impl Payload {
    pub fn new<T: Any + Send + Clone>(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    fn from_box(value: Box<dyn PayloadValue>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(value))),
        }
    }

    /// True once the slot was emptied by a move transport or [`Payload::take`].
    pub fn is_moved(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Address identity of the boxed value. Stable across move transports,
    /// fresh for copies.
    pub fn value_id(&self) -> WrapperResult<usize> {
        let slot = self.slot.lock();
        let value = slot.as_deref().ok_or(WrapperError::Moved)?;
        Ok(value as *const dyn PayloadValue as *const () as usize)
    }

    /// Borrow the value as `T` under the slot lock.
    pub fn with_ref<T: Any, R>(&self, read: impl FnOnce(&T) -> R) -> WrapperResult<R> {
        let slot = self.slot.lock();
        let value = slot.as_deref().ok_or(WrapperError::Moved)?;
        let typed = value
            .as_any()
            .downcast_ref::<T>()
            .ok_or(WrapperError::WrongType(std::any::type_name::<T>()))?;
        Ok(read(typed))
    }

    /// Clone the value out as `T`.
    pub fn extract<T: Any + Clone>(&self) -> WrapperResult<T> {
        self.with_ref(T::clone)
    }

    /// Move the value out as `T`, leaving the moved-from marker behind.
    pub fn take<T: Any>(&self) -> WrapperResult<T> {
        let mut slot = self.slot.lock();
        match slot.as_deref() {
            Some(value) if value.as_any().is::<T>() => {}
            Some(_) => return Err(WrapperError::WrongType(std::any::type_name::<T>())),
            None => return Err(WrapperError::Moved),
        }
        let boxed = match slot.take() {
            Some(boxed) => boxed,
            None => return Err(WrapperError::Moved),
        };
        match boxed.into_any().downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(WrapperError::WrongType(std::any::type_name::<T>())),
        }
    }

    /// Transport point: move takes the box, copy deep-clones it. Either way
    /// the result is a detached handle ready to cross the boundary.
    pub(crate) fn export(&self, take: bool) -> WrapperResult<Payload> {
        let mut slot = self.slot.lock();
        if take {
            slot.take().map(Payload::from_box).ok_or(WrapperError::Moved)
        } else {
            slot.as_ref()
                .map(|value| Payload::from_box(value.clone_value()))
                .ok_or(WrapperError::Moved)
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_moved() {
            f.write_str("Payload(<moved>)")
        } else {
            f.write_str("Payload(..)")
        }
    }
}

/// Positional and keyword payloads of one call or one block invocation.
/// Keyword order is preserved. Cloning shares the underlying slots.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    positional: Vec<Payload>,
    keyword: IndexMap<String, Payload>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional value, wrapping it in a fresh handle.
    pub fn arg<T: Any + Send + Clone>(self, value: T) -> Self {
        self.payload(Payload::new(value))
    }

    /// Append an existing handle, e.g. one the caller keeps to observe move
    /// effects.
    pub fn payload(mut self, payload: Payload) -> Self {
        self.positional.push(payload);
        self
    }

    pub fn kwarg<T: Any + Send + Clone>(self, name: impl Into<String>, value: T) -> Self {
        self.kwarg_payload(name, Payload::new(value))
    }

    pub fn kwarg_payload(mut self, name: impl Into<String>, payload: Payload) -> Self {
        self.keyword.insert(name.into(), payload);
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Payload> {
        self.positional.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Payload> {
        self.keyword.get(name)
    }

    pub fn positional(&self) -> &[Payload] {
        &self.positional
    }

    pub fn keywords(&self) -> impl Iterator<Item = (&str, &Payload)> {
        self.keyword.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Apply the transport to every contained value.
    pub(crate) fn export(&self, take: bool) -> WrapperResult<Arguments> {
        let positional = self
            .positional
            .iter()
            .map(|payload| payload.export(take))
            .collect::<WrapperResult<Vec<_>>>()?;
        let keyword = self
            .keyword
            .iter()
            .map(|(name, payload)| Ok((name.clone(), payload.export(take)?)))
            .collect::<WrapperResult<IndexMap<_, _>>>()?;
        Ok(Self {
            positional,
            keyword,
        })
    }
}
