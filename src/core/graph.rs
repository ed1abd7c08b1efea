//! # Graph Containers
//!
//! Shared, identity-bearing handles for the reference types the graph
//! serializer understands. Cloning a handle clones the pointer, never the
//! contents, so two members holding clones of the same handle are written once
//! and come back as the same instance.
//!
//! Locks are `std::sync::RwLock`; a poisoned lock is recovered rather than
//! propagated since the protected data has no invariants beyond its contents.
//!
//! ```rust
//! use objwire::core::graph::List;
//!
//! let list = List::from(vec![1, 2]);
//! let alias = list.clone();
//! alias.push(3);
//! assert!(list.ptr_eq(&alias));
//! assert_eq!(*list.read(), vec![1, 2, 3]);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

macro_rules! shared_handle {
    ($(#[$meta:meta])* $name:ident<$($param:ident),+> => $inner:ty) => {
        $(#[$meta])*
        pub struct $name<$($param),+>(Arc<RwLock<$inner>>);

        impl<$($param),+> $name<$($param),+> {
            fn from_inner(value: $inner) -> Self {
                Self(Arc::new(RwLock::new(value)))
            }

            /// Shared access to the contents.
            pub fn read(&self) -> RwLockReadGuard<'_, $inner> {
                self.0.read().unwrap_or_else(PoisonError::into_inner)
            }

            /// Exclusive access to the contents.
            pub fn write(&self) -> RwLockWriteGuard<'_, $inner> {
                self.0.write().unwrap_or_else(PoisonError::into_inner)
            }

            /// True when both handles point at the same instance.
            pub fn ptr_eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }

            pub(crate) fn address(&self) -> usize {
                Arc::as_ptr(&self.0) as *const () as usize
            }
        }

        impl<$($param),+> Clone for $name<$($param),+> {
            fn clone(&self) -> Self {
                Self(Arc::clone(&self.0))
            }
        }

        // Contents may be cyclic, so only the address is shown.
        impl<$($param),+> fmt::Debug for $name<$($param),+> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}@{:#x}", stringify!($name), self.address())
            }
        }
    };
}

shared_handle!(
    /// Growable shared list.
    List<E> => Vec<E>
);

shared_handle!(
    /// Fixed-length shared array.
    Array<E> => Box<[E]>
);

shared_handle!(
    /// Shared hash map.
    Dict<K, V> => HashMap<K, V>
);

shared_handle!(
    /// Shared object instance.
    Obj<T> => T
);

impl<E> List<E> {
    pub fn new() -> Self {
        Self::from_inner(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_inner(Vec::with_capacity(capacity))
    }

    pub fn push(&self, element: E) {
        self.write().push(element);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<E> Default for List<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> From<Vec<E>> for List<E> {
    fn from(items: Vec<E>) -> Self {
        Self::from_inner(items)
    }
}

impl<E: Default> Array<E> {
    /// Array of `len` default elements.
    pub fn with_len(len: usize) -> Self {
        Self::from_inner((0..len).map(|_| E::default()).collect())
    }
}

impl<E> Array<E> {
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<E> From<Vec<E>> for Array<E> {
    fn from(items: Vec<E>) -> Self {
        Self::from_inner(items.into_boxed_slice())
    }
}

impl<K, V> Dict<K, V> {
    pub fn new() -> Self {
        Self::from_inner(HashMap::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_inner(HashMap::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<K: Eq + std::hash::Hash, V> Dict<K, V> {
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.write().insert(key, value)
    }
}

impl<K, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> From<HashMap<K, V>> for Dict<K, V> {
    fn from(map: HashMap<K, V>) -> Self {
        Self::from_inner(map)
    }
}

impl<T> Obj<T> {
    pub fn new(value: T) -> Self {
        Self::from_inner(value)
    }
}

impl<T: Default> Default for Obj<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
