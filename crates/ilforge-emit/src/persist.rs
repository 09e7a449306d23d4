//! Conversion between a finalized assembly and its ILIMG image.
//!
//! Loading re-verifies every body and re-checks the declaration rules
//! (unique names, well-formed type names, static containers): an image is
//! trusted no more than a freshly emitted session.

use std::{path::Path, sync::Arc};

use tracing::debug;

use ilforge_core::{verify::verify, CoreError, InstructionStream, ValueType};
use ilforge_image::{Image, MethodRecord, TypeRecord};

use crate::{
    attrs::{MethodAttributes, TypeAttributes},
    descriptors::{is_well_formed_type_name, FinalizedAssembly, FinalizedModule, MethodDescriptor, Signature, TypeDescriptor},
    error::{EmitResult, Error},
};

impl FinalizedAssembly {
    /// Lays the assembly out as an [`Image`] at the current format version.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_image(&self) -> Image {
        let mut img = Image::new(self.name.as_str());
        for (module_ix, module) in self.modules.iter().enumerate() {
            img.modules.push(module.name.clone());
            for ty in &module.types {
                let first_method = img.methods.len() as u32;
                for m in &ty.methods {
                    let (code_offset, code_len) = img.push_code(&m.body.to_bytes());
                    img.methods.push(MethodRecord {
                        name: m.name.clone(),
                        attributes: m.attributes.bits(),
                        ret: m.signature.ret.code(),
                        params: m.signature.params.iter().map(|p| p.code()).collect(),
                        max_stack: m.max_stack,
                        code_offset,
                        code_len,
                    });
                }
                img.types.push(TypeRecord {
                    module: module_ix as u32,
                    name: ty.full_name.clone(),
                    attributes: ty.attributes.bits(),
                    first_method,
                    method_count: ty.methods.len() as u32,
                });
            }
        }
        img
    }

    /// Rebuilds (and re-verifies) an assembly from an image.
    pub fn from_image(img: &Image) -> EmitResult<Self> {
        for (ix, name) in img.modules.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(CoreError::corrupted(format!("module #{ix} has an empty name")).into());
            }
            if img.modules[..ix].contains(name) {
                return Err(CoreError::corrupted(format!("module `{name}` is declared twice")).into());
            }
        }
        let mut modules: Vec<FinalizedModule> =
            img.modules.iter().map(|name| FinalizedModule { name: name.clone(), types: Vec::new() }).collect();

        for record in &img.types {
            let module = modules
                .get_mut(record.module as usize)
                .ok_or_else(|| CoreError::corrupted(format!("type `{}` names a missing module", record.name)))?;
            if !is_well_formed_type_name(&record.name) {
                return Err(CoreError::corrupted(format!("malformed type name `{}`", record.name)).into());
            }
            if module.types.iter().any(|t| t.full_name == record.name) {
                return Err(CoreError::corrupted(format!(
                    "type `{}` is declared twice in module `{}`",
                    record.name, module.name
                ))
                .into());
            }
            let attributes = TypeAttributes::from_bits(record.attributes)
                .ok_or_else(|| CoreError::corrupted(format!("type `{}` has unknown attribute bits", record.name)))?;
            let mut methods: Vec<Arc<MethodDescriptor>> = Vec::new();
            for m in img.methods_of(record)? {
                let method = load_method(img, &record.name, m)?;
                check_method(attributes, &methods, &method)?;
                methods.push(Arc::new(method));
            }
            module.types.push(Arc::new(TypeDescriptor {
                module: module.name.clone(),
                full_name: record.name.clone(),
                attributes,
                methods,
            }));
        }

        debug!(assembly = %img.assembly, types = img.types.len(), methods = img.methods.len(), "image loaded");
        Ok(Self { name: img.assembly.clone(), modules })
    }

    /// Writes the image to `path`.
    pub fn write_image(&self, path: impl AsRef<Path>, compress: bool) -> EmitResult<()> {
        Ok(self.to_image().write_file(path, compress)?)
    }

    /// Reads and re-verifies an image from `path`.
    pub fn read_image(path: impl AsRef<Path>) -> EmitResult<Self> { Self::from_image(&Image::read_file(path)?) }
}

fn value_type(code: u8, method: &str) -> Result<ValueType, CoreError> {
    ValueType::from_code(code).ok_or_else(|| CoreError::corrupted(format!("method `{method}` uses unknown type code {code}")))
}

/// The declaration rules `Session::define_method` enforces.
fn check_method(owner: TypeAttributes, loaded: &[Arc<MethodDescriptor>], m: &MethodDescriptor) -> Result<(), CoreError> {
    let what = m.qualified_name();
    if m.name.trim().is_empty() {
        return Err(CoreError::corrupted(format!("`{what}` has an empty method name")));
    }
    if m.attributes.contains(MethodAttributes::PUBLIC | MethodAttributes::PRIVATE) {
        return Err(CoreError::corrupted(format!("`{what}` is both public and private")));
    }
    if owner.is_static_container() && !m.attributes.is_static() {
        return Err(CoreError::corrupted(format!("`{what}` is an instance method on a static container")));
    }
    if loaded.iter().any(|other| other.name == m.name && other.params() == m.params()) {
        return Err(CoreError::corrupted(format!("`{what}{}` is declared twice", m.signature)));
    }
    Ok(())
}

fn load_method(img: &Image, owner: &str, record: &MethodRecord) -> EmitResult<MethodDescriptor> {
    let attributes = MethodAttributes::from_bits(record.attributes)
        .ok_or_else(|| CoreError::corrupted(format!("method `{}` has unknown attribute bits", record.name)))?;
    let params = record
        .params
        .iter()
        .map(|&code| value_type(code, &record.name))
        .collect::<Result<Vec<_>, _>>()?;
    let ret = value_type(record.ret, &record.name)?;
    let body = InstructionStream::from_bytes(img.method_code(record)?)?;

    let verified = verify(&body, &params, ret, record.max_stack)
        .map_err(|source| Error::Verification { method: format!("{owner}::{}", record.name), source })?;

    Ok(MethodDescriptor {
        owner: owner.to_owned(),
        name: record.name.clone(),
        attributes,
        signature: Signature::new(params, ret),
        body,
        max_stack: verified.max_depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{options::SessionOptions, session::Session};
    use ilforge_core::Op;
    use pretty_assertions::assert_eq;

    fn finalized() -> Arc<FinalizedAssembly> {
        let s = Session::new("TestAssembly", SessionOptions::default());
        let ty = s
            .define_type(s.default_module(), "TestNamespace.TestType", TypeAttributes::STATIC_CONTAINER)
            .unwrap();
        let m = s
            .define_method(ty, "TestMethod", MethodAttributes::PUBLIC | MethodAttributes::STATIC, ValueType::Str, &[ValueType::I32])
            .unwrap();
        s.with_il(m, |il| {
            il.emit(Op::LdStr("Hello IL coder!".into())).emit(Op::Ret);
        })
        .unwrap();
        s.close(m).unwrap();
        let other = s.define_module("Extra").unwrap();
        s.define_type(other, "Empty", TypeAttributes::PUBLIC).unwrap();
        s.finalize().unwrap()
    }

    #[test]
    fn image_roundtrip_preserves_descriptors() {
        let asm = finalized();
        let back = FinalizedAssembly::from_image(&asm.to_image()).unwrap();
        assert_eq!(back, *asm);
        assert_eq!(back.modules().len(), 2);
    }

    #[test]
    fn tampered_body_fails_verification_on_load() {
        let asm = finalized();
        let mut img = asm.to_image();
        let mut body = InstructionStream::new();
        body.push(Op::LdcI4(1));
        body.push(Op::Ret);
        img.code.clear();
        let (code_offset, code_len) = img.push_code(&body.to_bytes());
        img.methods[0].code_offset = code_offset;
        img.methods[0].code_len = code_len;

        let err = FinalizedAssembly::from_image(&img).unwrap_err();
        assert!(matches!(err, Error::Verification { .. }));
    }

    #[test]
    fn unknown_type_codes_are_rejected() {
        let mut img = finalized().to_image();
        img.methods[0].ret = 99;
        assert!(matches!(FinalizedAssembly::from_image(&img), Err(Error::Image(_))));
    }

    fn assert_corrupted(img: &Image, needle: &str) {
        match FinalizedAssembly::from_image(img) {
            Err(err @ Error::Image(_)) => assert!(err.to_string().contains(needle), "{err}"),
            other => panic!("expected a corrupted image, got {other:?}"),
        }
    }

    #[test]
    fn declaration_rules_are_rechecked_on_load() {
        let clean = finalized().to_image();

        let mut img = clean.clone();
        img.types[1].module = 0;
        img.types[1].name = img.types[0].name.clone();
        assert_corrupted(&img, "declared twice in module");

        let mut img = clean.clone();
        img.types[0].name = "TestNamespace..TestType".into();
        assert_corrupted(&img, "malformed type name");

        let mut img = clean.clone();
        img.methods[0].attributes = MethodAttributes::PUBLIC.bits();
        assert_corrupted(&img, "instance method on a static container");

        let mut img = clean.clone();
        img.modules[1] = img.modules[0].clone();
        assert_corrupted(&img, "declared twice");

        let mut img = clean;
        let dup = img.methods[0].clone();
        img.methods.insert(1, dup);
        img.types[0].method_count = 2;
        img.types[1].first_method = 2;
        assert_corrupted(&img, "TestMethod(i32) -> str` is declared twice");
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TestAssembly.ilimg");
        let asm = finalized();
        asm.write_image(&path, false).unwrap();
        assert_eq!(FinalizedAssembly::read_image(&path).unwrap(), *asm);
    }
}
