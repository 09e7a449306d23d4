//! ilforge-runtime : liaison et exécution des méthodes générées
//!
//! - [`Binder`] : résout une méthode finalisée par nom + signature complète
//!   et produit un [`CallableHandle<A, R>`] typé statiquement
//! - [`Marshal`] / [`ArgList`] : correspondance types Rust ↔ [`Value`]
//! - [`Loader`] / [`EntryPoint`] : étape « charger en forme exécutable »,
//!   pluggable ; [`Interpreter`] est le backend par défaut
//! - [`Emitter`] : façade « un type statique, une méthode, un handle »
//!
//! ```
//! use ilforge_core::Op;
//! use ilforge_runtime::Emitter;
//!
//! let emitter = Emitter::new("TestAssembly");
//! let f = emitter.emit_method::<i32, String>("TestNamespace.TestType", "TestMethod", |il| {
//!     il.emit(Op::LdStr("Hello IL coder!".into())).emit(Op::Ret);
//! })?;
//! assert_eq!(f.invoke(123), "Hello IL coder!");
//! # Ok::<(), ilforge_emit::Error>(())
//! ```

#![deny(missing_docs)]

pub mod binder;
pub mod emitter;
pub mod interp;
pub mod loader;
pub mod value;

pub use binder::{find_type, Binder, CallableHandle, DynamicHandle};
pub use emitter::Emitter;
pub use interp::Interpreter;
pub use loader::{EntryPoint, Loader, Trap};
pub use value::{ArgList, Marshal, Value};

/// Prélude : builders (`ilforge-emit`) + liaison/exécution.
pub mod prelude {
    pub use super::{ArgList, Binder, CallableHandle, DynamicHandle, Emitter, Marshal, Value};
    pub use ilforge_emit::prelude::*;
}
