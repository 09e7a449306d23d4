//! Immutable descriptors produced by finalization.
//!
//! Descriptors are shared through `Arc` and never mutated, so they can be
//! read (and invoked through) from any number of threads.

use std::{fmt, sync::Arc};

use ilforge_core::{InstructionStream, ValueType};

use crate::attrs::{MethodAttributes, TypeAttributes};

/// Ordered parameter list plus return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Parameter types, in order.
    pub params: Vec<ValueType>,
    /// Return type (`Void` for none).
    pub ret: ValueType,
}

impl Signature {
    /// Build a signature.
    pub fn new(params: impl Into<Vec<ValueType>>, ret: ValueType) -> Self { Self { params: params.into(), ret } }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// Finalized method: signature plus its verified, frozen body.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) attributes: MethodAttributes,
    pub(crate) signature: Signature,
    pub(crate) body: InstructionStream,
    pub(crate) max_stack: u16,
}

impl MethodDescriptor {
    /// Fully-qualified name of the owning type.
    pub fn owner(&self) -> &str { &self.owner }
    /// Simple name.
    pub fn name(&self) -> &str { &self.name }
    /// `Owner::name`, as used in diagnostics.
    pub fn qualified_name(&self) -> String { format!("{}::{}", self.owner, self.name) }
    /// Attribute flags.
    pub const fn attributes(&self) -> MethodAttributes { self.attributes }
    /// Declared signature.
    pub const fn signature(&self) -> &Signature { &self.signature }
    /// Parameter types.
    pub fn params(&self) -> &[ValueType] { &self.signature.params }
    /// Return type.
    pub const fn ret(&self) -> ValueType { self.signature.ret }
    /// Frozen instruction stream.
    pub const fn body(&self) -> &InstructionStream { &self.body }
    /// Deepest evaluation stack reached by the verified body.
    pub const fn max_stack(&self) -> u16 { self.max_stack }
}

/// Finalized type and its methods, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub(crate) module: String,
    pub(crate) full_name: String,
    pub(crate) attributes: TypeAttributes,
    pub(crate) methods: Vec<Arc<MethodDescriptor>>,
}

impl TypeDescriptor {
    /// Owning module name.
    pub fn module(&self) -> &str { &self.module }
    /// `Namespace.Simple`.
    pub fn full_name(&self) -> &str { &self.full_name }
    /// Everything before the last `.` (empty for the global namespace).
    pub fn namespace(&self) -> &str { split_name(&self.full_name).0 }
    /// Everything after the last `.`.
    pub fn simple_name(&self) -> &str { split_name(&self.full_name).1 }
    /// Attribute flags.
    pub const fn attributes(&self) -> TypeAttributes { self.attributes }
    /// All methods.
    pub fn methods(&self) -> &[Arc<MethodDescriptor>] { &self.methods }

    /// Overloads sharing `name`.
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arc<MethodDescriptor>> + 'a {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Exact `(name, params)` lookup.
    pub fn method(&self, name: &str, params: &[ValueType]) -> Option<&Arc<MethodDescriptor>> {
        self.methods.iter().find(|m| m.name == name && m.params() == params)
    }
}

/// `Namespace.Simple` with no empty segment.
pub(crate) fn is_well_formed_type_name(full: &str) -> bool { !full.is_empty() && !full.split('.').any(str::is_empty) }

/// Splits a qualified type name at its last `.`.
pub fn split_name(full: &str) -> (&str, &str) { full.rsplit_once('.').unwrap_or(("", full)) }

/// Finalized module: its types, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedModule {
    pub(crate) name: String,
    pub(crate) types: Vec<Arc<TypeDescriptor>>,
}

impl FinalizedModule {
    /// Module name.
    pub fn name(&self) -> &str { &self.name }
    /// Types of the module.
    pub fn types(&self) -> &[Arc<TypeDescriptor>] { &self.types }
}

/// Read-only result of finalizing a session.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedAssembly {
    pub(crate) name: String,
    pub(crate) modules: Vec<FinalizedModule>,
}

impl FinalizedAssembly {
    /// Assembly name.
    pub fn name(&self) -> &str { &self.name }
    /// Modules, in declaration order.
    pub fn modules(&self) -> &[FinalizedModule] { &self.modules }

    /// Every type of every module.
    pub fn types(&self) -> impl Iterator<Item = &Arc<TypeDescriptor>> + '_ {
        self.modules.iter().flat_map(|m| m.types.iter())
    }

    /// First type with this fully-qualified name, in module order.
    pub fn find_type(&self, full_name: &str) -> Option<&Arc<TypeDescriptor>> {
        self.types().find(|t| t.full_name == full_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_split_at_last_dot() {
        assert_eq!(split_name("TestNamespace.TestType"), ("TestNamespace", "TestType"));
        assert_eq!(split_name("A.B.C"), ("A.B", "C"));
        assert_eq!(split_name("Global"), ("", "Global"));
    }

    #[test]
    fn signature_display() {
        let sig = Signature::new([ValueType::I32, ValueType::Str], ValueType::Str);
        assert_eq!(sig.to_string(), "(i32, str) -> str");
        assert_eq!(Signature::new(Vec::new(), ValueType::Void).to_string(), "() -> void");
    }
}
