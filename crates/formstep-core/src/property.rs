//! Reactive properties with change detection.
//!
//! A [`Property`] holds a value and reports whether a write actually changed
//! it. Owners pair a property with a [`Signal`](crate::Signal) and emit only
//! when the value changed.
//!
//! # Example
//!
//! ```
//! use formstep_core::{Property, Signal};
//!
//! struct Counter {
//!     value: Property<i32>,
//!     value_changed: Signal<i32>,
//! }
//!
//! impl Counter {
//!     fn set_value(&self, new_value: i32) {
//!         if self.value.set(new_value) {
//!             self.value_changed.emit(new_value);
//!         }
//!     }
//! }
//!
//! let counter = Counter { value: Property::new(0), value_changed: Signal::new() };
//! counter.set_value(3);
//! assert_eq!(counter.value.get(), 3);
//! ```

use std::fmt;

use parking_lot::RwLock;

/// A reactive property that tracks changes.
///
/// `Property<T>` uses interior mutability with `RwLock` and is `Send + Sync`
/// when `T` is.
pub struct Property<T> {
    value: RwLock<T>,
}

impl<T: Clone> Property<T> {
    /// Create a new property with an initial value.
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Access the value through a closure without cloning.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(&self.value.read())
    }

    /// Set the value without change detection.
    pub fn set_silent(&self, value: T) {
        *self.value.write() = value;
    }
}

impl<T: Clone + PartialEq> Property<T> {
    /// Set the value, returning `true` if the value changed.
    pub fn set(&self, value: T) -> bool {
        let mut current = self.value.write();
        if *current != value {
            *current = value;
            true
        } else {
            false
        }
    }

    /// Set the value, returning the old value if it changed.
    ///
    /// The read and the write happen under one lock, so the returned value is
    /// exactly the value that was replaced.
    pub fn replace(&self, value: T) -> Option<T> {
        let mut current = self.value.write();
        if *current != value {
            Some(std::mem::replace(&mut *current, value))
        } else {
            None
        }
    }
}

impl<T: Clone + Default> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + fmt::Debug> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("value", &self.get())
            .finish()
    }
}

/// A read-only view of a property.
///
/// Useful for exposing a property publicly while keeping the setter private.
pub struct ReadOnlyProperty<'a, T> {
    inner: &'a Property<T>,
}

impl<'a, T: Clone> ReadOnlyProperty<'a, T> {
    /// Create a read-only view of a property.
    pub fn new(property: &'a Property<T>) -> Self {
        Self { inner: property }
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Access the value through a closure.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.inner.with(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_set_reports_change() {
        let prop = Property::new(42);
        assert_eq!(prop.get(), 42);
        assert!(!prop.set(42));
        assert!(prop.set(100));
        assert_eq!(prop.get(), 100);
    }

    #[test]
    fn test_property_replace() {
        let prop = Property::new(1usize);
        assert_eq!(prop.replace(1), None);
        assert_eq!(prop.replace(4), Some(1));
        assert_eq!(prop.get(), 4);
    }

    #[test]
    fn test_property_set_silent_and_with() {
        let prop = Property::new(String::from("a"));
        prop.set_silent(String::from("abc"));
        assert_eq!(prop.with(|s| s.len()), 3);
    }

    #[test]
    fn test_read_only_view() {
        let prop = Property::new(7);
        let view = ReadOnlyProperty::new(&prop);
        assert_eq!(view.get(), 7);
        prop.set(8);
        assert_eq!(view.with(|v| *v), 8);
    }
}
