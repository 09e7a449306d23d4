//! ilforge-emit : construction d'assemblies à l'exécution
//!
//! Pipeline (chaque flèche est à sens unique) :
//! ```text
//! Session (assembly) → module → type → méthode → émission
//!   → close → finalize_type → finalize → [persist]
//! ```
//!
//! - [`Session`] : état explicite d'une génération (pas de contexte global)
//! - handles typés [`ModuleRef`], [`TypeRef`], [`MethodRef`]
//! - [`IlGenerator`] : enregistreur mécanique, aucune vérification à l'émission
//! - finalisation = vérification de pile (`ilforge_core::verify`) puis gel
//!   en descripteurs immuables partagés par `Arc`
//! - persistance optionnelle au format ILIMG (`ilforge-image`)
//!
//! Exemple :
//! ```
//! use ilforge_core::{Op, ValueType};
//! use ilforge_emit::{MethodAttributes, Session, SessionOptions, TypeAttributes};
//!
//! let s = Session::new("TestAssembly", SessionOptions::default());
//! let ty = s.define_type(s.default_module(), "TestNamespace.TestType", TypeAttributes::STATIC_CONTAINER)?;
//! let m = s.define_method(
//!     ty,
//!     "TestMethod",
//!     MethodAttributes::PUBLIC | MethodAttributes::STATIC,
//!     ValueType::Str,
//!     &[ValueType::I32],
//! )?;
//! s.with_il(m, |il| {
//!     il.emit(Op::LdStr("Hello IL coder!".into())).emit(Op::Ret);
//! })?;
//! s.close(m)?;
//! let desc = s.finalize_type(ty)?;
//! assert_eq!(desc.methods().len(), 1);
//! # Ok::<(), ilforge_emit::Error>(())
//! ```
//!
//! Features :
//! - `zstd` : compression de la section CODE à la persistance

#![deny(missing_docs)]

pub mod attrs;
pub mod descriptors;
pub mod error;
pub mod handles;
pub mod il;
pub mod options;
mod persist;
pub mod session;

pub use attrs::{MethodAttributes, TypeAttributes};
pub use descriptors::{FinalizedAssembly, FinalizedModule, MethodDescriptor, Signature, TypeDescriptor};
pub use error::{invariant_violation, EmitResult, Error};
pub use handles::{MethodRef, ModuleRef, TypeRef};
pub use il::IlGenerator;
pub use options::{ArityPolicy, OptionsError, SessionOptions};
pub use session::{AssemblyPhase, MethodPhase, Session};

/// Prélude : builders, attributs, descripteurs et vocabulaire par défaut.
pub mod prelude {
    pub use super::{
        AssemblyPhase, EmitResult, Error, FinalizedAssembly, IlGenerator, MethodAttributes, MethodDescriptor,
        Session, SessionOptions, TypeAttributes, TypeDescriptor,
    };
    pub use ilforge_core::{Label, Op, ValueType};
}
