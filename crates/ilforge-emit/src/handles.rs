//! Typed, copyable handles to builder objects.
//!
//! A handle is `(session serial, index)`; the marker type keeps module,
//! type and method indices from being mixed up.

use core::{fmt, hash, marker::PhantomData};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Fresh, process-unique session serial.
pub(crate) fn next_session_serial() -> u64 { NEXT_SESSION.fetch_add(1, Ordering::Relaxed) }

/// Marker for [`ModuleRef`].
#[derive(Debug)]
pub enum ModuleTag {}
/// Marker for [`TypeRef`].
#[derive(Debug)]
pub enum TypeTag {}
/// Marker for [`MethodRef`].
#[derive(Debug)]
pub enum MethodTag {}

/// Handle to a builder object of kind `T` inside one session.
pub struct Handle<T> {
    session: u64,
    index: u32,
    _tag: PhantomData<fn() -> T>,
}

/// Module declared in a session.
pub type ModuleRef = Handle<ModuleTag>;
/// Type declared in a session.
pub type TypeRef = Handle<TypeTag>;
/// Method declared in a session.
pub type MethodRef = Handle<MethodTag>;

impl<T> Handle<T> {
    pub(crate) const fn new(session: u64, index: u32) -> Self { Self { session, index, _tag: PhantomData } }

    /// Serial of the owning session.
    pub const fn session(self) -> u64 { self.session }

    /// Position in the session's declaration order.
    pub const fn index(self) -> u32 { self.index }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self { *self }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool { self.session == other.session && self.index == other.index }
}

impl<T> Eq for Handle<T> {}

impl<T> hash::Hash for Handle<T> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.session.hash(state);
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = core::any::type_name::<T>().rsplit("::").next().unwrap_or("Handle");
        write!(f, "{kind}({}#{})", self.session, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_session_and_index() {
        let a = TypeRef::new(1, 0);
        let b = a;
        assert_eq!(a, b);
        assert_ne!(a, TypeRef::new(2, 0));
        assert_eq!(format!("{a:?}"), "TypeTag(1#0)");
    }

    #[test]
    fn serials_are_unique() {
        assert_ne!(next_session_serial(), next_session_serial());
    }
}
