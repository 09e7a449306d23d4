//! Generation session: the assembly builder and everything it owns.
//!
//! State machines:
//! - method: `Open → Closed → Finalized`
//! - type: `Open → Finalized`
//! - assembly: `Open → Finalized → Persisted`
//!
//! All transitions are one-way. Every builder operation takes the session
//! guard with `try_lock`; a second caller arriving while it is held (another
//! thread, or a reentrant call from inside a `with_il` scope) gets
//! [`Error::ConcurrentMutation`] instead of blocking.
//!
//! Once finalized, the assembly lives in a write-once slot outside the guard:
//! descriptor reads never contend with builders or with an in-flight persist.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, OnceLock,
    },
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use ilforge_core::{verify::verify, InstructionStream, Label, Op, ValueType};

use crate::{
    attrs::{MethodAttributes, TypeAttributes},
    descriptors::{is_well_formed_type_name, FinalizedAssembly, FinalizedModule, MethodDescriptor, Signature, TypeDescriptor},
    error::{invariant_violation, EmitResult, Error},
    handles::{next_session_serial, Handle, MethodRef, ModuleRef, TypeRef},
    il::IlGenerator,
    options::{ArityPolicy, SessionOptions},
};

/* ─────────────────────────── Phases ─────────────────────────── */

/// Lifecycle of the assembly owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssemblyPhase {
    /// Declarations accepted.
    Open,
    /// Read-only; descriptors available.
    Finalized,
    /// Written to storage at least once.
    Persisted,
}

impl AssemblyPhase {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::Finalized,
            _ => Self::Persisted,
        }
    }
}

/// Lifecycle of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodPhase {
    /// Emission allowed.
    Open,
    /// Stream frozen, awaiting type finalization.
    Closed,
    /// Descriptor produced.
    Finalized,
}

/* ─────────────────────────── State ─────────────────────────── */

#[derive(Debug)]
struct ModuleState {
    name: String,
    types: Vec<u32>,
}

#[derive(Debug)]
struct TypeState {
    module: u32,
    full_name: String,
    attributes: TypeAttributes,
    methods: Vec<u32>,
    finalized: Option<Arc<TypeDescriptor>>,
}

#[derive(Debug)]
struct MethodState {
    name: String,
    attributes: MethodAttributes,
    signature: Signature,
    stream: InstructionStream,
    phase: MethodPhase,
}

#[derive(Debug, Default)]
struct SessionState {
    modules: Vec<ModuleState>,
    types: Vec<TypeState>,
    methods: Vec<MethodState>,
}

/// Read-only view published by [`Session::finalize`].
#[derive(Debug)]
struct Frozen {
    assembly: Arc<FinalizedAssembly>,
    /// Type descriptors indexed like `TypeRef`.
    types: Vec<Arc<TypeDescriptor>>,
}

/* ─────────────────────────── Session ─────────────────────────── */

/// One assembly under construction, with explicit session state.
#[derive(Debug)]
pub struct Session {
    serial: u64,
    name: String,
    options: SessionOptions,
    phase: AtomicU8,
    state: Mutex<SessionState>,
    frozen: OnceLock<Frozen>,
    persisting: Mutex<()>,
}

impl Session {
    /// Creates an assembly with one default module named after it.
    pub fn new(name: impl Into<String>, options: SessionOptions) -> Self {
        let name = name.into();
        let state = SessionState {
            modules: vec![ModuleState { name: name.clone(), types: Vec::new() }],
            ..SessionState::default()
        };
        let serial = next_session_serial();
        debug!(assembly = %name, serial, "session created");
        Self {
            serial,
            name,
            options,
            phase: AtomicU8::new(0),
            state: Mutex::new(state),
            frozen: OnceLock::new(),
            persisting: Mutex::new(()),
        }
    }

    /// Assembly name.
    pub fn name(&self) -> &str { &self.name }

    /// Options in effect.
    pub const fn options(&self) -> &SessionOptions { &self.options }

    /// Current assembly phase (readable while another operation runs).
    pub fn phase(&self) -> AssemblyPhase { AssemblyPhase::from_u8(self.phase.load(Ordering::Acquire)) }

    /// The module created with the session.
    pub const fn default_module(&self) -> ModuleRef { Handle::new(self.serial, 0) }

    fn lock(&self) -> EmitResult<MutexGuard<'_, SessionState>> {
        self.state.try_lock().ok_or(Error::ConcurrentMutation)
    }

    fn set_phase(&self, phase: AssemblyPhase) {
        self.phase.store(phase as u8, Ordering::Release);
        info!(assembly = %self.name, ?phase, "assembly phase");
    }

    fn check<T>(&self, handle: Handle<T>) -> EmitResult<usize> {
        if handle.session() == self.serial {
            Ok(handle.index() as usize)
        } else {
            Err(Error::ForeignHandle)
        }
    }

    fn ensure_open(&self) -> EmitResult<()> {
        match self.phase() {
            AssemblyPhase::Open => Ok(()),
            _ => Err(Error::AlreadyFinalized { what: format!("assembly `{}`", self.name) }),
        }
    }

    /* ───── Declarations ───── */

    /// Declares an additional module.
    #[allow(clippy::cast_possible_truncation)]
    pub fn define_module(&self, name: &str) -> EmitResult<ModuleRef> {
        let mut st = self.lock()?;
        self.ensure_open()?;
        if name.trim().is_empty() {
            return Err(Error::invalid("module name is empty"));
        }
        if st.modules.iter().any(|m| m.name == name) {
            return Err(Error::DuplicateDeclaration { kind: "module", name: name.to_owned() });
        }
        let ix = st.modules.len() as u32;
        st.modules.push(ModuleState { name: name.to_owned(), types: Vec::new() });
        debug!(module = name, "module defined");
        Ok(Handle::new(self.serial, ix))
    }

    /// Declares a type named `Namespace.Simple` in `module`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn define_type(&self, module: ModuleRef, full_name: &str, attributes: TypeAttributes) -> EmitResult<TypeRef> {
        let m = self.check(module)?;
        let mut st = self.lock()?;
        self.ensure_open()?;
        if !is_well_formed_type_name(full_name) {
            return Err(Error::invalid(format!("malformed type name `{full_name}`")));
        }
        let st = &mut *st;
        let Some(module_state) = st.modules.get_mut(m) else { invariant_violation("module handle out of range") };
        if module_state.types.iter().any(|&t| st.types[t as usize].full_name == full_name) {
            return Err(Error::DuplicateDeclaration { kind: "type", name: full_name.to_owned() });
        }
        let ix = st.types.len() as u32;
        module_state.types.push(ix);
        st.types.push(TypeState {
            module: m as u32,
            full_name: full_name.to_owned(),
            attributes,
            methods: Vec::new(),
            finalized: None,
        });
        debug!(module = %module_state.name, ty = full_name, ?attributes, "type defined");
        Ok(Handle::new(self.serial, ix))
    }

    /// Declares a method; `(name, params)` must be unique on the type.
    #[allow(clippy::cast_possible_truncation)]
    pub fn define_method(
        &self,
        ty: TypeRef,
        name: &str,
        attributes: MethodAttributes,
        ret: ValueType,
        params: &[ValueType],
    ) -> EmitResult<MethodRef> {
        let t = self.check(ty)?;
        let mut st = self.lock()?;
        self.ensure_open()?;
        let st = &mut *st;
        let Some(type_state) = st.types.get_mut(t) else { invariant_violation("type handle out of range") };

        if type_state.finalized.is_some() {
            return Err(Error::AlreadyFinalized { what: format!("type `{}`", type_state.full_name) });
        }
        if name.trim().is_empty() {
            return Err(Error::invalid("method name is empty"));
        }
        if self.options.arity == ArityPolicy::Unary && params.len() != 1 {
            return Err(Error::invalid(format!(
                "`{name}` declares {} parameter(s) but the session only accepts unary methods",
                params.len()
            )));
        }
        if attributes.contains(MethodAttributes::PUBLIC | MethodAttributes::PRIVATE) {
            return Err(Error::invalid(format!("`{name}` cannot be both public and private")));
        }
        if type_state.attributes.is_static_container() && !attributes.is_static() {
            return Err(Error::invalid(format!(
                "`{}` is a static container; `{name}` must be static",
                type_state.full_name
            )));
        }
        let signature = Signature::new(params, ret);
        if type_state.methods.iter().any(|&m| {
            let existing = &st.methods[m as usize];
            existing.name == name && existing.signature.params == params
        }) {
            return Err(Error::DuplicateDeclaration {
                kind: "method",
                name: format!("{}::{name}{}", type_state.full_name, signature),
            });
        }

        let ix = st.methods.len() as u32;
        type_state.methods.push(ix);
        debug!(ty = %type_state.full_name, method = name, %signature, "method defined");
        st.methods.push(MethodState {
            name: name.to_owned(),
            attributes,
            signature,
            stream: InstructionStream::new(),
            phase: MethodPhase::Open,
        });
        Ok(Handle::new(self.serial, ix))
    }

    /* ───── Emission ───── */

    fn open_method<'s>(&self, st: &'s mut SessionState, method: MethodRef) -> EmitResult<&'s mut MethodState> {
        let m = self.check(method)?;
        let Some(ms) = st.methods.get_mut(m) else { invariant_violation("method handle out of range") };
        match ms.phase {
            MethodPhase::Open => Ok(ms),
            _ => Err(Error::StreamClosed { method: ms.name.clone() }),
        }
    }

    /// Appends one op to an open method.
    pub fn emit(&self, method: MethodRef, op: Op) -> EmitResult<()> {
        let mut st = self.lock()?;
        let ms = self.open_method(&mut st, method)?;
        IlGenerator::new(&ms.name, &mut ms.stream).emit(op);
        Ok(())
    }

    /// Allocates a label on an open method.
    pub fn define_label(&self, method: MethodRef) -> EmitResult<Label> {
        let mut st = self.lock()?;
        let ms = self.open_method(&mut st, method)?;
        Ok(ms.stream.define_label())
    }

    /// Binds `label` to the next op of an open method.
    pub fn mark_label(&self, method: MethodRef, label: Label) -> EmitResult<()> {
        let mut st = self.lock()?;
        let ms = self.open_method(&mut st, method)?;
        ms.stream.mark_label(label);
        Ok(())
    }

    /// Runs `f` with an emission scope over an open method.
    ///
    /// The session guard is held for the whole callback.
    pub fn with_il<T>(&self, method: MethodRef, f: impl FnOnce(&mut IlGenerator<'_>) -> T) -> EmitResult<T> {
        let mut st = self.lock()?;
        let ms = self.open_method(&mut st, method)?;
        let mut il = IlGenerator::new(&ms.name, &mut ms.stream);
        Ok(f(&mut il))
    }

    /// Closes a method's stream: `Open → Closed`.
    pub fn close(&self, method: MethodRef) -> EmitResult<()> {
        let mut st = self.lock()?;
        let ms = self.open_method(&mut st, method)?;
        ms.phase = MethodPhase::Closed;
        debug!(method = %ms.name, ops = ms.stream.len(), "method closed");
        Ok(())
    }

    /// Current phase of a method.
    pub fn method_phase(&self, method: MethodRef) -> EmitResult<MethodPhase> {
        let m = self.check(method)?;
        let st = self.lock()?;
        st.methods.get(m).map(|ms| ms.phase).ok_or_else(|| invariant_violation("method handle out of range"))
    }

    /* ───── Finalization ───── */

    /// Finalizes a type and every method it owns.
    ///
    /// On failure nothing changes: the type stays open, its methods stay closed.
    pub fn finalize_type(&self, ty: TypeRef) -> EmitResult<Arc<TypeDescriptor>> {
        let t = self.check(ty)?;
        let mut st = self.lock()?;
        self.ensure_open()?;
        if t >= st.types.len() {
            invariant_violation("type handle out of range");
        }
        let methods = self.prepare_type(&st, t)?;
        Ok(commit_type(&mut st, t, methods))
    }

    /// Checks and verifies a type without mutating anything.
    fn prepare_type(&self, st: &SessionState, t: usize) -> EmitResult<Vec<Arc<MethodDescriptor>>> {
        let ts = &st.types[t];
        if ts.finalized.is_some() {
            return Err(Error::AlreadyFinalized { what: format!("type `{}`", ts.full_name) });
        }
        if let Some(open) = ts.methods.iter().map(|&m| &st.methods[m as usize]).find(|m| m.phase == MethodPhase::Open) {
            return Err(Error::IncompleteMethod { ty: ts.full_name.clone(), method: open.name.clone() });
        }

        ts.methods
            .iter()
            .map(|&m| -> EmitResult<Arc<MethodDescriptor>> {
                let ms = &st.methods[m as usize];
                let verified = verify(&ms.stream, &ms.signature.params, ms.signature.ret, self.options.max_stack)
                    .map_err(|source| Error::Verification { method: format!("{}::{}", ts.full_name, ms.name), source })?;
                Ok(Arc::new(MethodDescriptor {
                    owner: ts.full_name.clone(),
                    name: ms.name.clone(),
                    attributes: ms.attributes,
                    signature: ms.signature.clone(),
                    body: ms.stream.clone(),
                    max_stack: verified.max_depth,
                }))
            })
            .collect()
    }

    /// Finalizes every still-open type and freezes the assembly.
    ///
    /// All types are verified before any of them is committed.
    pub fn finalize(&self) -> EmitResult<Arc<FinalizedAssembly>> {
        let mut st = self.lock()?;
        self.ensure_open()?;

        let open: Vec<usize> = (0..st.types.len()).filter(|&t| st.types[t].finalized.is_none()).collect();
        let prepared = open
            .iter()
            .map(|&t| self.prepare_type(&st, t).map(|methods| (t, methods)))
            .collect::<EmitResult<Vec<_>>>()?;
        for (t, methods) in prepared {
            commit_type(&mut st, t, methods);
        }

        let modules = st
            .modules
            .iter()
            .map(|m| FinalizedModule {
                name: m.name.clone(),
                types: m
                    .types
                    .iter()
                    .map(|&t| st.types[t as usize].finalized.clone().unwrap_or_else(|| invariant_violation("type left open")))
                    .collect(),
            })
            .collect();
        let assembly = Arc::new(FinalizedAssembly { name: self.name.clone(), modules });
        let frozen = Frozen {
            assembly: Arc::clone(&assembly),
            types: st
                .types
                .iter()
                .map(|ts| ts.finalized.clone().unwrap_or_else(|| invariant_violation("type left open")))
                .collect(),
        };
        if self.frozen.set(frozen).is_err() {
            invariant_violation("assembly frozen twice");
        }
        self.set_phase(AssemblyPhase::Finalized);
        Ok(assembly)
    }

    /// The finalized assembly. Never contends with other callers.
    pub fn assembly(&self) -> EmitResult<Arc<FinalizedAssembly>> {
        self.frozen
            .get()
            .map(|f| Arc::clone(&f.assembly))
            .ok_or_else(|| Error::NotFinalized { what: format!("assembly `{}`", self.name) })
    }

    /// Descriptor of a finalized type.
    ///
    /// Lock-free once the assembly is finalized.
    pub fn type_descriptor(&self, ty: TypeRef) -> EmitResult<Arc<TypeDescriptor>> {
        let t = self.check(ty)?;
        if let Some(frozen) = self.frozen.get() {
            return frozen.types.get(t).cloned().ok_or_else(|| invariant_violation("type handle out of range"));
        }
        let st = self.lock()?;
        let Some(ts) = st.types.get(t) else { invariant_violation("type handle out of range") };
        ts.finalized.clone().ok_or_else(|| Error::NotFinalized { what: format!("type `{}`", ts.full_name) })
    }

    /// Fully-qualified name of a declared type.
    pub fn type_name(&self, ty: TypeRef) -> EmitResult<String> {
        let t = self.check(ty)?;
        if let Some(frozen) = self.frozen.get() {
            return frozen.types.get(t).map(|d| d.full_name.clone()).ok_or_else(|| invariant_violation("type handle out of range"));
        }
        let st = self.lock()?;
        st.types.get(t).map(|ts| ts.full_name.clone()).ok_or_else(|| invariant_violation("type handle out of range"))
    }

    /// Name of a declared module.
    pub fn module_name(&self, module: ModuleRef) -> EmitResult<String> {
        let m = self.check(module)?;
        if let Some(frozen) = self.frozen.get() {
            return frozen
                .assembly
                .modules()
                .get(m)
                .map(|fm| fm.name().to_owned())
                .ok_or_else(|| invariant_violation("module handle out of range"));
        }
        let st = self.lock()?;
        st.modules.get(m).map(|ms| ms.name.clone()).ok_or_else(|| invariant_violation("module handle out of range"))
    }

    /* ───── Persistence ───── */

    /// Writes the finalized assembly to `path`.
    ///
    /// Success moves the session to `Persisted`; a failure leaves the
    /// in-memory form untouched and the call may be retried. The builder guard
    /// is not held during I/O; only a second concurrent persist is rejected.
    pub fn persist(&self, path: impl AsRef<Path>) -> EmitResult<()> {
        let path = path.as_ref();
        let assembly = self.assembly()?;
        let _writing = self.persisting.try_lock().ok_or(Error::ConcurrentMutation)?;
        let mut image = assembly.to_image();
        image.version = self.options.image_version;
        image.write_file(path, self.options.compress_image)?;
        info!(assembly = %self.name, path = %path.display(), "assembly persisted");
        self.set_phase(AssemblyPhase::Persisted);
        Ok(())
    }
}

/// Freezes the methods of type `t` with already-verified descriptors.
fn commit_type(st: &mut SessionState, t: usize, methods: Vec<Arc<MethodDescriptor>>) -> Arc<TypeDescriptor> {
    for &m in &st.types[t].methods {
        st.methods[m as usize].phase = MethodPhase::Finalized;
    }
    let ts = &mut st.types[t];
    let descriptor = Arc::new(TypeDescriptor {
        module: st.modules[ts.module as usize].name.clone(),
        full_name: ts.full_name.clone(),
        attributes: ts.attributes,
        methods,
    });
    ts.finalized = Some(Arc::clone(&descriptor));
    debug!(ty = %descriptor.full_name, methods = descriptor.methods.len(), "type finalized");
    descriptor
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STATIC: MethodAttributes = MethodAttributes::PUBLIC.union(MethodAttributes::STATIC);

    fn hello(session: &Session) -> (TypeRef, MethodRef) {
        let ty = session
            .define_type(session.default_module(), "TestNamespace.TestType", TypeAttributes::STATIC_CONTAINER)
            .unwrap();
        let m = session.define_method(ty, "TestMethod", STATIC, ValueType::Str, &[ValueType::I32]).unwrap();
        session.emit(m, Op::LdStr("Hello IL coder!".into())).unwrap();
        session.emit(m, Op::Ret).unwrap();
        (ty, m)
    }

    #[test]
    fn default_module_is_named_after_the_assembly() {
        let s = Session::new("TestAssembly", SessionOptions::default());
        assert_eq!(s.module_name(s.default_module()).unwrap(), "TestAssembly");
        assert_eq!(s.phase(), AssemblyPhase::Open);
    }

    #[test]
    fn full_lifecycle() {
        let s = Session::new("TestAssembly", SessionOptions::default());
        let (ty, m) = hello(&s);
        assert_eq!(s.method_phase(m).unwrap(), MethodPhase::Open);
        s.close(m).unwrap();
        assert_eq!(s.method_phase(m).unwrap(), MethodPhase::Closed);

        let desc = s.finalize_type(ty).unwrap();
        assert_eq!(s.method_phase(m).unwrap(), MethodPhase::Finalized);
        assert_eq!(desc.namespace(), "TestNamespace");
        assert_eq!(desc.simple_name(), "TestType");
        assert_eq!(desc.module(), "TestAssembly");
        let method = desc.method("TestMethod", &[ValueType::I32]).unwrap();
        assert_eq!(method.max_stack(), 1);
        assert_eq!(method.qualified_name(), "TestNamespace.TestType::TestMethod");

        let asm = s.finalize().unwrap();
        assert_eq!(s.phase(), AssemblyPhase::Finalized);
        assert!(Arc::ptr_eq(asm.find_type("TestNamespace.TestType").unwrap(), &desc));
    }

    #[test]
    fn duplicates_are_rejected_per_scope() {
        let s = Session::new("A", SessionOptions::default());
        let module = s.default_module();
        let a = s.define_type(module, "N.A", TypeAttributes::PUBLIC).unwrap();
        let b = s.define_type(module, "N.B", TypeAttributes::PUBLIC).unwrap();
        assert!(matches!(
            s.define_type(module, "N.A", TypeAttributes::PUBLIC),
            Err(Error::DuplicateDeclaration { kind: "type", .. })
        ));

        s.define_method(a, "M", STATIC, ValueType::Void, &[ValueType::I32]).unwrap();
        assert!(matches!(
            s.define_method(a, "M", STATIC, ValueType::Str, &[ValueType::I32]),
            Err(Error::DuplicateDeclaration { kind: "method", .. })
        ));
        // overload by parameter list, and same name on another type
        s.define_method(a, "M", STATIC, ValueType::Void, &[ValueType::I64]).unwrap();
        s.define_method(b, "M", STATIC, ValueType::Void, &[ValueType::I32]).unwrap();

        let other = s.define_module("Other").unwrap();
        s.define_type(other, "N.A", TypeAttributes::PUBLIC).unwrap();
        assert!(matches!(s.define_module("Other"), Err(Error::DuplicateDeclaration { kind: "module", .. })));
    }

    #[test]
    fn emission_after_close_fails() {
        let s = Session::new("A", SessionOptions::default());
        let (_, m) = hello(&s);
        s.close(m).unwrap();
        assert!(matches!(s.emit(m, Op::Nop), Err(Error::StreamClosed { .. })));
        assert!(matches!(s.close(m), Err(Error::StreamClosed { .. })));
        assert!(matches!(s.with_il(m, |_| ()), Err(Error::StreamClosed { .. })));
        assert!(matches!(s.define_label(m), Err(Error::StreamClosed { .. })));
    }

    #[test]
    fn unclosed_method_blocks_type_finalization() {
        let s = Session::new("A", SessionOptions::default());
        let (ty, m) = hello(&s);
        assert!(matches!(s.finalize_type(ty), Err(Error::IncompleteMethod { .. })));
        assert!(matches!(s.finalize(), Err(Error::IncompleteMethod { .. })));
        assert_eq!(s.phase(), AssemblyPhase::Open);
        s.close(m).unwrap();
        s.finalize_type(ty).unwrap();
    }

    #[test]
    fn verification_failure_mutates_nothing() {
        let s = Session::new("A", SessionOptions::default());
        let ty = s.define_type(s.default_module(), "T", TypeAttributes::STATIC_CONTAINER).unwrap();
        let m = s.define_method(ty, "Bad", STATIC, ValueType::I32, &[]).unwrap();
        s.emit(m, Op::LdStr("not an int".into())).unwrap();
        s.emit(m, Op::Ret).unwrap();
        s.close(m).unwrap();

        let err = s.finalize_type(ty).unwrap_err();
        match err {
            Error::Verification { method, source } => {
                assert_eq!(method, "T::Bad");
                assert_eq!(source.pc, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.method_phase(m).unwrap(), MethodPhase::Closed);
        assert!(matches!(s.type_descriptor(ty), Err(Error::NotFinalized { .. })));
    }

    #[test]
    fn second_finalize_fails_and_keeps_descriptor() {
        let s = Session::new("A", SessionOptions::default());
        let (ty, m) = hello(&s);
        s.close(m).unwrap();
        let first = s.finalize_type(ty).unwrap();
        assert!(matches!(s.finalize_type(ty), Err(Error::AlreadyFinalized { .. })));
        assert!(matches!(
            s.define_method(ty, "Late", STATIC, ValueType::Void, &[]),
            Err(Error::AlreadyFinalized { .. })
        ));
        assert!(Arc::ptr_eq(&s.type_descriptor(ty).unwrap(), &first));

        let asm = s.finalize().unwrap();
        assert!(matches!(s.finalize(), Err(Error::AlreadyFinalized { .. })));
        assert!(matches!(
            s.define_type(s.default_module(), "Late", TypeAttributes::PUBLIC),
            Err(Error::AlreadyFinalized { .. })
        ));
        assert!(Arc::ptr_eq(&s.assembly().unwrap(), &asm));
    }

    #[test]
    fn attribute_and_arity_rules() {
        let s = Session::new("A", SessionOptions { arity: ArityPolicy::Unary, ..SessionOptions::default() });
        let ty = s.define_type(s.default_module(), "T", TypeAttributes::STATIC_CONTAINER).unwrap();
        assert!(matches!(
            s.define_method(ty, "Inst", MethodAttributes::PUBLIC, ValueType::Void, &[ValueType::I32]),
            Err(Error::InvalidDeclaration { .. })
        ));
        assert!(matches!(
            s.define_method(ty, "Two", STATIC, ValueType::Void, &[ValueType::I32, ValueType::I32]),
            Err(Error::InvalidDeclaration { .. })
        ));
        assert!(matches!(
            s.define_type(s.default_module(), "N..T", TypeAttributes::PUBLIC),
            Err(Error::InvalidDeclaration { .. })
        ));
        s.define_method(ty, "One", STATIC, ValueType::Void, &[ValueType::I32]).unwrap();
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let a = Session::new("A", SessionOptions::default());
        let b = Session::new("B", SessionOptions::default());
        assert!(matches!(
            b.define_type(a.default_module(), "T", TypeAttributes::PUBLIC),
            Err(Error::ForeignHandle)
        ));
    }

    #[test]
    fn finalized_reads_skip_both_guards() {
        let s = Session::new("A", SessionOptions::default());
        let (ty, m) = hello(&s);
        s.close(m).unwrap();
        let asm = s.finalize().unwrap();

        let _builder = s.state.lock();
        let _writer = s.persisting.lock();
        assert!(Arc::ptr_eq(&s.assembly().unwrap(), &asm));
        assert_eq!(s.type_descriptor(ty).unwrap().full_name(), "TestNamespace.TestType");
        assert_eq!(s.type_name(ty).unwrap(), "TestNamespace.TestType");
        assert_eq!(s.module_name(s.default_module()).unwrap(), "A");
        assert!(matches!(s.persist("unused.ilimg"), Err(Error::ConcurrentMutation)));
        assert_eq!(s.phase(), AssemblyPhase::Finalized);
    }

    #[test]
    fn reentrant_calls_are_concurrent_mutations() {
        let s = Session::new("A", SessionOptions::default());
        let (_, m) = hello(&s);
        let inner = s.with_il(m, |il| {
            il.emit(Op::Nop);
            s.emit(m, Op::Nop)
        });
        assert!(matches!(inner, Ok(Err(Error::ConcurrentMutation))));
    }

    #[test]
    fn labels_through_the_session() {
        let s = Session::new("A", SessionOptions::default());
        let ty = s.define_type(s.default_module(), "T", TypeAttributes::STATIC_CONTAINER).unwrap();
        let m = s.define_method(ty, "Pick", STATIC, ValueType::I32, &[ValueType::Bool]).unwrap();
        let yes = s.define_label(m).unwrap();
        s.emit(m, Op::Ldarg(0)).unwrap();
        s.emit(m, Op::BrTrue(yes)).unwrap();
        s.emit(m, Op::LdcI4(0)).unwrap();
        s.emit(m, Op::Ret).unwrap();
        s.mark_label(m, yes).unwrap();
        s.emit(m, Op::LdcI4(1)).unwrap();
        s.emit(m, Op::Ret).unwrap();
        s.close(m).unwrap();
        let desc = s.finalize_type(ty).unwrap();
        assert_eq!(desc.methods()[0].body().label_target(yes), Some(4));
    }

    #[test]
    fn persist_requires_finalization() {
        let dir = tempfile::tempdir().unwrap();
        let s = Session::new("A", SessionOptions::default());
        let (_, m) = hello(&s);
        assert!(matches!(s.persist(dir.path().join("a.ilimg")), Err(Error::NotFinalized { .. })));
        s.close(m).unwrap();
        s.finalize().unwrap();

        let missing_dir = dir.path().join("nope").join("a.ilimg");
        assert!(matches!(s.persist(&missing_dir), Err(Error::Io { .. })));
        assert_eq!(s.phase(), AssemblyPhase::Finalized);

        s.persist(dir.path().join("a.ilimg")).unwrap();
        assert_eq!(s.phase(), AssemblyPhase::Persisted);
    }
}
