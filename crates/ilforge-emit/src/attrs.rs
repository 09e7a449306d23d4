//! Type and method attribute flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Visibility and shape of a declared type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TypeAttributes: u32 {
        /// Visible outside its module.
        const PUBLIC    = 1 << 0;
        /// Cannot be derived from.
        const SEALED    = 1 << 1;
        /// Cannot be instantiated.
        const ABSTRACT  = 1 << 2;
        /// Declares an interface.
        const INTERFACE = 1 << 3;

        /// Pure namespace for static methods.
        const STATIC_CONTAINER = Self::PUBLIC.bits() | Self::SEALED.bits() | Self::ABSTRACT.bits();
    }
}

bitflags! {
    /// Visibility and dispatch of a declared method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MethodAttributes: u32 {
        /// Callable from anywhere.
        const PUBLIC  = 1 << 0;
        /// Callable from the owning type only.
        const PRIVATE = 1 << 1;
        /// No receiver.
        const STATIC  = 1 << 2;
        /// Cannot be overridden.
        const FINAL   = 1 << 3;
    }
}

impl TypeAttributes {
    /// Whether only static methods may be declared.
    pub const fn is_static_container(self) -> bool { self.contains(Self::STATIC_CONTAINER) }
}

impl MethodAttributes {
    /// Whether the method takes no receiver.
    pub const fn is_static(self) -> bool { self.contains(Self::STATIC) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_container_is_public_sealed_abstract() {
        let attrs = TypeAttributes::PUBLIC | TypeAttributes::SEALED | TypeAttributes::ABSTRACT;
        assert!(attrs.is_static_container());
        assert!(!(TypeAttributes::PUBLIC | TypeAttributes::SEALED).is_static_container());
        assert_eq!(TypeAttributes::STATIC_CONTAINER.bits(), 0b111);
    }

    #[test]
    fn method_flags_compose() {
        let attrs = MethodAttributes::PUBLIC | MethodAttributes::STATIC;
        assert!(attrs.is_static());
        assert!(!MethodAttributes::PUBLIC.is_static());
    }
}
