//! One-call helper: declare, emit, finalize and bind a static method.

use std::{path::Path, sync::Arc};

use ilforge_emit::{
    EmitResult, FinalizedAssembly, IlGenerator, MethodAttributes, Session, SessionOptions, TypeAttributes,
};

use crate::{
    binder::{Binder, CallableHandle},
    value::{ArgList, Marshal},
};

/// Session plus binder, for the common "one static method per type" case.
#[derive(Debug)]
pub struct Emitter {
    session: Session,
    binder: Binder,
}

impl Emitter {
    /// New assembly `name` with default options and the interpreter loader.
    pub fn new(name: impl Into<String>) -> Self { Self::with_options(name, SessionOptions::default()) }

    /// New assembly `name` with explicit options.
    pub fn with_options(name: impl Into<String>, options: SessionOptions) -> Self {
        Self { session: Session::new(name, options), binder: Binder::new() }
    }

    /// Replaces the binder (and so the loader).
    #[must_use]
    pub fn with_binder(mut self, binder: Binder) -> Self {
        self.binder = binder;
        self
    }

    /// Underlying session, for anything beyond the helper.
    pub const fn session(&self) -> &Session { &self.session }

    /// Binder used by [`Emitter::emit_method`].
    pub const fn binder(&self) -> &Binder { &self.binder }

    /// Declares `type_name` as a static container in the default module,
    /// declares `method_name` as public static `A → R`, records the body
    /// through `body`, then closes, finalizes the type and binds.
    pub fn emit_method<A: ArgList, R: Marshal>(
        &self,
        type_name: &str,
        method_name: &str,
        body: impl FnOnce(&mut IlGenerator<'_>),
    ) -> EmitResult<CallableHandle<A, R>> {
        let s = &self.session;
        let ty = s.define_type(s.default_module(), type_name, TypeAttributes::STATIC_CONTAINER)?;
        let method = s.define_method(
            ty,
            method_name,
            MethodAttributes::PUBLIC | MethodAttributes::STATIC,
            R::VALUE_TYPE,
            &A::value_types(),
        )?;
        s.with_il(method, body)?;
        s.close(method)?;
        let descriptor = s.finalize_type(ty)?;
        self.binder.bind(&descriptor, method_name)
    }

    /// Finalizes the assembly.
    pub fn finish(&self) -> EmitResult<Arc<FinalizedAssembly>> { self.session.finalize() }

    /// Writes the finalized assembly to `path`.
    pub fn persist(&self, path: impl AsRef<Path>) -> EmitResult<()> { self.session.persist(path) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilforge_core::Op;
    use ilforge_emit::{AssemblyPhase, Error};

    #[test]
    fn emit_method_binds_in_one_call() {
        let e = Emitter::new("TestAssembly");
        let f = e
            .emit_method::<i32, String>("TestNamespace.TestType", "TestMethod", |il| {
                il.emit(Op::LdStr("Hello IL coder!".into())).emit(Op::Ret);
            })
            .unwrap();
        assert_eq!(f.invoke(123), "Hello IL coder!");

        let asm = e.finish().unwrap();
        assert!(asm.find_type("TestNamespace.TestType").is_some());
        assert_eq!(e.session().phase(), AssemblyPhase::Finalized);
    }

    #[test]
    fn same_type_twice_is_a_duplicate() {
        let e = Emitter::new("A");
        e.emit_method::<(), ()>("T", "M", |il| {
            il.emit(Op::Ret);
        })
        .unwrap();
        let err = e
            .emit_method::<(), ()>("T", "M", |il| {
                il.emit(Op::Ret);
            })
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateDeclaration { kind: "type", .. }));
    }
}
