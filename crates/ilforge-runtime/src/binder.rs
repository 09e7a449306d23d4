//! Symbol resolution and typed callable handles.

use std::{fmt, marker::PhantomData, sync::Arc};

use tracing::debug;

use ilforge_core::ValueType;
use ilforge_emit::{invariant_violation, EmitResult, Error, FinalizedAssembly, MethodDescriptor, Signature, TypeDescriptor};

use crate::{
    interp::Interpreter,
    loader::{EntryPoint, Loader},
    value::{ArgList, Marshal, Value},
};

/// Resolves finalized methods and loads them through a [`Loader`].
#[derive(Clone)]
pub struct Binder {
    loader: Arc<dyn Loader>,
}

impl Default for Binder {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_struct("Binder").finish_non_exhaustive() }
}

impl Binder {
    /// Binder backed by the default interpreter.
    pub fn new() -> Self { Self { loader: Arc::new(Interpreter::new()) } }

    /// Binder backed by another execution backend.
    pub fn with_loader(loader: Arc<dyn Loader>) -> Self { Self { loader } }

    /// Binds `name` with parameters `A` and return `R`.
    ///
    /// `MethodNotFound` when no method has that name, `SignatureMismatch`
    /// when none of the overloads has exactly `A → R`.
    pub fn bind<A: ArgList, R: Marshal>(&self, ty: &TypeDescriptor, name: &str) -> EmitResult<CallableHandle<A, R>> {
        let wanted = Signature::new(A::value_types(), R::VALUE_TYPE);
        let method = resolve(ty, name, &wanted.params, Some(wanted.ret))?;
        let entry = self.loader.load(method)?;
        debug!(method = %method.qualified_name(), signature = %wanted, "bound");
        Ok(CallableHandle { method: Arc::clone(method), entry, _sig: PhantomData })
    }

    /// Looks `type_name` up in `assembly`, then binds as [`Binder::bind`].
    pub fn bind_path<A: ArgList, R: Marshal>(
        &self,
        assembly: &FinalizedAssembly,
        type_name: &str,
        name: &str,
    ) -> EmitResult<CallableHandle<A, R>> {
        self.bind(find_type(assembly, type_name)?, name)
    }

    /// Binds by run-time parameter list; the return type is the declared one.
    pub fn bind_dynamic(&self, ty: &TypeDescriptor, name: &str, params: &[ValueType]) -> EmitResult<DynamicHandle> {
        let method = resolve(ty, name, params, None)?;
        let entry = self.loader.load(method)?;
        debug!(method = %method.qualified_name(), signature = %method.signature(), "bound dynamically");
        Ok(DynamicHandle { method: Arc::clone(method), entry })
    }
}

/// Type lookup with a `TypeNotFound` error.
pub fn find_type<'a>(assembly: &'a FinalizedAssembly, type_name: &str) -> EmitResult<&'a Arc<TypeDescriptor>> {
    assembly
        .find_type(type_name)
        .ok_or_else(|| Error::TypeNotFound { assembly: assembly.name().to_owned(), name: type_name.to_owned() })
}

fn resolve<'a>(
    ty: &'a TypeDescriptor,
    name: &str,
    params: &[ValueType],
    ret: Option<ValueType>,
) -> EmitResult<&'a Arc<MethodDescriptor>> {
    let overloads: Vec<&'a Arc<MethodDescriptor>> = ty.methods().iter().filter(|m| m.name() == name).collect();
    if overloads.is_empty() {
        return Err(Error::MethodNotFound { ty: ty.full_name().to_owned(), method: name.to_owned() });
    }
    if let Some(found) = overloads.iter().copied().find(|m| m.params() == params && ret.map_or(true, |r| r == m.ret())) {
        return Ok(found);
    }
    let requested = ret.map_or_else(
        || format!("{:?}", params.iter().map(|p| p.name()).collect::<Vec<_>>()),
        |r| Signature::new(params, r).to_string(),
    );
    Err(Error::SignatureMismatch {
        method: format!("{}::{name}", ty.full_name()),
        requested,
        available: overloads.iter().map(|m| m.signature().to_string()).collect::<Vec<_>>().join(" | "),
    })
}

/* ─────────────────────────── Handles ─────────────────────────── */

/// Statically-typed callable bound to one finalized method.
///
/// Cheap to clone and safe to invoke from many threads at once.
pub struct CallableHandle<A, R> {
    method: Arc<MethodDescriptor>,
    entry: Arc<dyn EntryPoint>,
    _sig: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for CallableHandle<A, R> {
    fn clone(&self) -> Self {
        Self { method: Arc::clone(&self.method), entry: Arc::clone(&self.entry), _sig: PhantomData }
    }
}

impl<A, R> fmt::Debug for CallableHandle<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableHandle")
            .field("method", &self.method.qualified_name())
            .field("signature", &self.method.signature().to_string())
            .finish()
    }
}

impl<A: ArgList, R: Marshal> CallableHandle<A, R> {
    /// The bound method.
    pub fn method(&self) -> &Arc<MethodDescriptor> { &self.method }

    /// Calls the method.
    ///
    /// # Panics
    /// Only on an invariant violation: the loaded entry point trapped or
    /// returned something other than `R` although the signature was checked
    /// at bind time.
    pub fn invoke(&self, args: A) -> R {
        let value = match self.entry.call(args.into_values()) {
            Ok(v) => v,
            Err(trap) => invariant_violation(trap),
        };
        let ty = value.value_type();
        R::from_value(value).unwrap_or_else(|| {
            invariant_violation(format!(
                "`{}` produced {ty} but is bound as returning {}",
                self.method.qualified_name(),
                R::VALUE_TYPE
            ))
        })
    }
}

/// Untyped handle for hosts that only know signatures at run time.
#[derive(Clone)]
pub struct DynamicHandle {
    method: Arc<MethodDescriptor>,
    entry: Arc<dyn EntryPoint>,
}

impl fmt::Debug for DynamicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicHandle").field("method", &self.method.qualified_name()).finish()
    }
}

impl DynamicHandle {
    /// The bound method.
    pub fn method(&self) -> &Arc<MethodDescriptor> { &self.method }

    /// Calls the method; argument values are checked against the signature.
    pub fn invoke(&self, args: Vec<Value>) -> EmitResult<Value> {
        let given: Vec<ValueType> = args.iter().map(Value::value_type).collect();
        if given != self.method.params() {
            return Err(Error::SignatureMismatch {
                method: self.method.qualified_name(),
                requested: Signature::new(given, self.method.ret()).to_string(),
                available: self.method.signature().to_string(),
            });
        }
        let value = self.entry.call(args).unwrap_or_else(|trap| invariant_violation(trap));
        if value.value_type() != self.method.ret() {
            invariant_violation(format!("`{}` returned {value:?}", self.method.qualified_name()));
        }
        Ok(value)
    }
}
