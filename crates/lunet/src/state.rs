//! The embedding state: a VM plus bridge context.
//!
//! `State` is a transparent wrapper over the engine `Vm`; the registry,
//! descriptor set, and binding cache ride in the VM's extension slot so that
//! native trampolines (which receive `&mut Vm`) can reconstruct the full
//! embedding view.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use lunet_engine::{GcOp, LibSet, NativeFn, TypeTag, Vm};
use rustc_hash::FxHashMap;

use crate::binding::{TypeBinding, TypeDescriptor};
use crate::error::{Error, Result};
use crate::function::FunctionView;
use crate::marshal;
use crate::registry::{Handle, IdentityRegistry};
use crate::table::TableView;
use crate::value::{FromLunet, HostObject, HostValue, ToLunet};

/// Embedding context carried in the VM's extension slot.
pub(crate) struct BridgeCtx {
    pub registry: Arc<IdentityRegistry>,
    pub descriptors: RefCell<FxHashMap<TypeId, Arc<TypeDescriptor>>>,
    pub bindings: RefCell<FxHashMap<TypeId, TypeBinding>>,
}

/// A script state: the engine VM plus the embedding bridge.
#[repr(transparent)]
pub struct State {
    vm: Vm,
}

impl State {
    /// Create a state with every standard library and the process-wide
    /// default registry.
    pub fn new() -> State {
        State::with_libs(LibSet::ALL)
    }

    /// Create a state with the selected libraries.
    pub fn with_libs(libs: LibSet) -> State {
        State::with_registry(libs, Arc::clone(IdentityRegistry::global()))
    }

    /// Create a state with the selected libraries and an injected registry
    /// (isolated registries keep tests and short-lived sessions independent).
    pub fn with_registry(libs: LibSet, registry: Arc<IdentityRegistry>) -> State {
        let mut vm = Vm::new(libs);
        vm.set_ext(Rc::new(BridgeCtx {
            registry,
            descriptors: RefCell::new(FxHashMap::default()),
            bindings: RefCell::new(FxHashMap::default()),
        }));
        State { vm }
    }

    /// View a borrowed engine VM as a `State`.
    ///
    /// Native functions receive `&mut Vm`; this recovers the embedding
    /// surface around it.
    pub(crate) fn from_vm_mut(vm: &mut Vm) -> &mut State {
        // SAFETY: State is repr(transparent) over Vm, so the layouts are
        // identical and the reference kinds match.
        unsafe { &mut *(vm as *mut Vm as *mut State) }
    }

    /// The underlying engine VM.
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    pub(crate) fn ctx(&self) -> Result<Rc<BridgeCtx>> {
        self.vm
            .ext()
            .and_then(|e| e.clone().downcast::<BridgeCtx>().ok())
            .ok_or_else(|| Error::Runtime("state is missing its bridge context".to_string()))
    }

    /// The identity registry this state shares host objects through.
    pub fn registry(&self) -> Result<Arc<IdentityRegistry>> {
        Ok(Arc::clone(&self.ctx()?.registry))
    }

    // ========================================================================
    // Loading and running
    // ========================================================================

    /// Compile a string and leave the chunk function on the stack.
    pub fn load_string(&mut self, source: &str) -> Result<()> {
        self.vm.load_str(source, "=(load)").map_err(Into::into)
    }

    /// Load a chunk from bytes (dumped chunk or source text).
    pub fn load_buffer(&mut self, bytes: &[u8], chunk_name: &str) -> Result<()> {
        self.vm.load_bytes(bytes, chunk_name).map_err(Into::into)
    }

    /// Compile a file and leave the chunk function on the stack.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.vm.load_file(path.as_ref()).map_err(Into::into)
    }

    /// Load and run a string under a protected call. On failure the foreign
    /// error value is left on the stack and returned as the error.
    pub fn do_string(&mut self, source: &str) -> Result<()> {
        self.vm.do_str(source, "=(load)").map_err(Into::into)
    }

    /// Load and run a file under a protected call.
    pub fn do_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.vm.do_file(path.as_ref()).map_err(Into::into)
    }

    /// Run a string and convert its (last) result to a typed host value.
    pub fn do_string_as<T: FromLunet>(&mut self, source: &str) -> Result<T> {
        self.do_string(source)?;
        let value = self.pop_host()?;
        T::from_lunet(value)
    }

    /// Dump the script function on top of the stack to a byte buffer.
    pub fn dump(&mut self) -> Result<Vec<u8>> {
        let tag = self.type_of(-1);
        if tag != TypeTag::Function {
            return Err(Error::TypeExpected {
                found: tag,
                expected: TypeTag::Function,
            });
        }
        self.vm.dump().map_err(Into::into)
    }

    // ========================================================================
    // Stack surface
    // ========================================================================

    /// Number of values in the current frame.
    pub fn top(&self) -> usize {
        self.vm.top()
    }

    pub fn set_top(&mut self, n: i32) {
        self.vm.set_top(n);
    }

    pub fn pop(&mut self, n: usize) {
        self.vm.pop(n);
    }

    pub fn push_nil(&mut self) {
        self.vm.push_nil();
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.vm.push_boolean(b);
    }

    pub fn push_number(&mut self, n: f64) {
        self.vm.push_number(n);
    }

    /// Integers are widened to the foreign number type.
    pub fn push_integer(&mut self, i: i64) {
        self.vm.push_integer(i);
    }

    pub fn push_string(&mut self, s: &str) {
        self.vm.push_string(s);
    }

    /// Push a copy of the value at `idx`.
    pub fn push_value(&mut self, idx: i32) -> Result<()> {
        self.vm.push_value(idx).map_err(Into::into)
    }

    pub fn insert(&mut self, idx: i32) -> Result<()> {
        self.vm.insert(idx).map_err(Into::into)
    }

    pub fn remove(&mut self, idx: i32) -> Result<()> {
        self.vm.remove(idx).map_err(Into::into)
    }

    pub fn replace(&mut self, idx: i32) -> Result<()> {
        self.vm.replace(idx).map_err(Into::into)
    }

    /// Concatenate the top `n` values and push the result.
    pub fn concat(&mut self, n: usize) -> Result<()> {
        self.vm.concat(n).map_err(Into::into)
    }

    /// Type tag of the slot at `idx` (top by default conventions: pass -1).
    pub fn type_of(&self, idx: i32) -> TypeTag {
        self.vm.type_of(idx)
    }

    /// Foreign type name of the slot at `idx`.
    pub fn type_name_of(&self, idx: i32) -> &'static str {
        self.vm.type_name_of(idx)
    }

    /// Resolve a relative index to an absolute one within this frame.
    pub fn absolute(&self, idx: i32) -> Result<i32> {
        let top = self.top() as i32;
        let abs = if idx > 0 {
            idx
        } else if idx < 0 {
            top + idx + 1
        } else {
            0
        };
        if abs >= 1 && abs <= top {
            Ok(abs)
        } else {
            Err(Error::Runtime(format!("invalid stack index {idx}")))
        }
    }

    // ========================================================================
    // Typed reads
    // ========================================================================

    /// The number at `idx`.
    pub fn to_number(&self, idx: i32) -> Result<f64> {
        self.vm.to_number(idx).ok_or(Error::TypeExpected {
            found: self.type_of(idx),
            expected: TypeTag::Number,
        })
    }

    /// The number at `idx`, truncated toward zero.
    pub fn to_integer(&self, idx: i32) -> Result<i64> {
        self.to_number(idx).map(|n| n as i64)
    }

    /// Truthiness of the slot at `idx`.
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.vm.to_boolean(idx)
    }

    /// Byte-for-byte copy of the string at `idx`.
    pub fn to_string_value(&self, idx: i32) -> Result<String> {
        self.vm
            .to_str(idx)
            .map(|s| s.to_string())
            .ok_or(Error::TypeExpected {
                found: self.type_of(idx),
                expected: TypeTag::String,
            })
    }

    /// Raw border length of the table or string at `idx`.
    pub fn raw_len(&self, idx: i32) -> usize {
        self.vm.raw_len(idx)
    }

    /// The host object denoted by the userdata at `idx`, downcast to `T`.
    pub fn to_userdata<T: Any + Send + Sync>(&self, idx: i32) -> Result<Arc<T>> {
        let tag = self.type_of(idx);
        let handle = self.vm.to_handle(idx).ok_or(Error::TypeExpected {
            found: tag,
            expected: TypeTag::UserData,
        })?;
        let obj = self
            .ctx()?
            .registry
            .resolve(Handle::from_raw(handle))
            .ok_or_else(|| {
                Error::Runtime(format!("no host object registered for handle {handle}"))
            })?;
        obj.downcast::<T>().map_err(|_| Error::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            got: "a different host type".to_string(),
        })
    }

    // ========================================================================
    // Marshalling
    // ========================================================================

    /// Convert the slot at `idx` to a host value.
    pub fn to_host(&mut self, idx: i32) -> Result<HostValue> {
        marshal::to_host(self, idx)
    }

    /// Convert the top slot to a host value and pop it.
    pub fn pop_host(&mut self) -> Result<HostValue> {
        let value = marshal::to_host(self, -1)?;
        self.vm.pop(1);
        Ok(value)
    }

    /// Push a host value, producing exactly one slot.
    pub fn push_host(&mut self, value: &HostValue) -> Result<()> {
        marshal::to_foreign(self, value)
    }

    /// Convert and push a typed host value.
    pub fn push<T: ToLunet>(&mut self, value: T) -> Result<()> {
        let host = value.to_lunet();
        self.push_host(&host)
    }

    // ========================================================================
    // Globals
    // ========================================================================

    /// Push the named global and report its type.
    pub fn get_global(&mut self, name: &str) -> TypeTag {
        self.vm.get_global(name)
    }

    /// Pop the top value and bind it to the named global.
    pub fn set_global(&mut self, name: &str) -> Result<()> {
        self.vm.set_global(name).map_err(Into::into)
    }

    /// Read a global as a typed host value.
    pub fn global_as<T: FromLunet>(&mut self, name: &str) -> Result<T> {
        self.get_global(name);
        let value = self.pop_host()?;
        T::from_lunet(value)
    }

    /// Convert, push, and globally bind a typed host value.
    pub fn set_global_value<T: ToLunet>(&mut self, name: &str, value: T) -> Result<()> {
        self.push(value)?;
        self.set_global(name)
    }

    // ========================================================================
    // Tables and functions
    // ========================================================================

    /// Create a table with capacity hints; it is pushed and viewed.
    pub fn create_table(&mut self, narr: usize, nrec: usize) -> Result<TableView> {
        self.vm.create_table(narr, nrec);
        TableView::from_top(self)
    }

    /// View the table at `idx`.
    pub fn table_view(&self, idx: i32) -> Result<TableView> {
        TableView::at_checked(self, idx)
    }

    /// View the function at `idx`.
    pub fn function_view(&self, idx: i32) -> Result<FunctionView> {
        FunctionView::at_checked(self, idx)
    }

    /// Traversal step over the table at `idx`; see the engine's protocol.
    pub fn table_next(&mut self, idx: i32) -> Result<bool> {
        self.vm.table_next(idx).map_err(Into::into)
    }

    /// Get or create a named metatable; it is pushed and viewed. Returns
    /// whether it already existed.
    pub fn new_metatable(&mut self, name: &str) -> Result<(TableView, bool)> {
        let (table, created) = self.vm.named_metatable(name);
        self.vm.push(lunet_engine::Value::Table(table));
        let view = TableView::from_top(self)?;
        Ok((view, !created))
    }

    /// Set the metatable of the top stack value to the named metatable.
    pub fn set_named_metatable(&mut self, name: &str) -> Result<()> {
        self.vm.set_named_metatable(name).map_err(Into::into)
    }

    /// Pop a table from the top and set it as the metatable of the value at
    /// `idx`.
    pub fn set_metatable(&mut self, idx: i32) -> Result<()> {
        self.vm.set_metatable(idx).map_err(Into::into)
    }

    // ========================================================================
    // Host functions and userdata
    // ========================================================================

    /// Push a host function as a foreign-callable value.
    pub fn push_function<F>(&mut self, f: F)
    where
        F: Fn(&mut State) -> Result<usize> + 'static,
    {
        let native: NativeFn = Rc::new(move |vm: &mut Vm| {
            let st = State::from_vm_mut(vm);
            f(st).map_err(Error::into_engine)
        });
        self.vm.push_native(native);
    }

    /// Push a host function and bind it to a global name.
    pub fn set_global_function<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&mut State) -> Result<usize> + 'static,
    {
        self.push_function(f);
        self.set_global(name)
    }

    /// Synthesize a trampoline for a descriptor and push it as a
    /// foreign-callable value (the static-method path; instance members go
    /// through `register_type` and the metatable dispatch).
    pub fn push_method(&mut self, descriptor: crate::trampoline::MethodDescriptor) {
        let native = crate::trampoline::build(Arc::new(descriptor));
        self.vm.push_native(native);
    }

    /// Register the member set of a host type; its binding is built lazily
    /// on first userdata creation.
    pub fn register_type(&mut self, descriptor: TypeDescriptor) -> Result<()> {
        let ctx = self.ctx()?;
        ctx.descriptors
            .borrow_mut()
            .insert(descriptor.type_id(), Arc::new(descriptor));
        Ok(())
    }

    /// Move a host value into the registry and push a full userdata cell
    /// denoting it, with the type's dispatch metatable attached. Returns the
    /// shared host object.
    pub fn new_userdata<T: Any + Send + Sync>(&mut self, value: T) -> Result<Arc<T>> {
        let arc = Arc::new(value);
        let obj: HostObject = arc.clone();
        let handle = self.ctx()?.registry.register(&obj);
        let meta = crate::binding::bind_for::<T>(self)?;
        let cell = self.vm.push_userdata(handle.raw());
        cell.borrow_mut().meta = Some(meta);
        Ok(arc)
    }

    /// Register a host object and push a light userdata holding its handle.
    pub fn push_light_userdata(&mut self, obj: &HostObject) -> Result<Handle> {
        let handle = self.ctx()?.registry.register(obj);
        self.vm.push_light_userdata(handle.raw());
        Ok(handle)
    }

    /// Push a light userdata from a raw handle, registered or not.
    pub fn push_light_handle(&mut self, handle: Handle) {
        self.vm.push_light_userdata(handle.raw());
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Unprotected call. An unprotected call site commits to the script not
    /// failing: a raised error escalates to a host panic.
    pub fn call(&mut self, nargs: usize, nresults: i32) {
        if let Err(e) = self.vm.call(nargs, nresults) {
            let err: Error = e.into();
            panic!("unprotected script call failed: {err}");
        }
    }

    /// Protected call; `errfunc` is the stack index of an error handler or 0.
    pub fn pcall(&mut self, nargs: usize, nresults: i32, errfunc: i32) -> Result<()> {
        self.vm.pcall(nargs, nresults, errfunc).map_err(Into::into)
    }

    /// Build an error from the top stack value (popping it), for returning
    /// out of a host function: `return Err(state.raise())`.
    pub fn raise(&mut self) -> Error {
        Error::from(self.vm.error_raise())
    }

    /// Coroutine yield passthrough; always reports the engine's
    /// outside-a-coroutine error.
    pub fn yield_values(&mut self, nresults: usize) -> Error {
        Error::from(self.vm.yield_values(nresults))
    }

    // ========================================================================
    // Garbage collector
    // ========================================================================

    /// Drive the foreign collector.
    pub fn gc(&mut self, op: GcOp, data: i32) -> i64 {
        self.vm.gc(op, data)
    }
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}

impl From<Vm> for State {
    fn from(vm: Vm) -> Self {
        State { vm }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_with_isolated_registry() {
        let registry = Arc::new(IdentityRegistry::new());
        let st = State::with_registry(LibSet::BASE, Arc::clone(&registry));
        assert!(Arc::ptr_eq(&st.registry().unwrap(), &registry));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_default_states_share_global_registry() {
        let a = State::new();
        let b = State::new();
        assert!(Arc::ptr_eq(
            &a.registry().unwrap(),
            &b.registry().unwrap()
        ));
    }

    #[test]
    fn test_do_string_as_typed() {
        let mut st = State::with_libs(LibSet::BASE);
        let n: f64 = st.do_string_as("return 5.0 + 5.0").unwrap();
        assert_eq!(n, 10.0);
        let s: String = st.do_string_as("return 'Hello'").unwrap();
        assert_eq!(s, "Hello");
    }

    #[test]
    fn test_global_roundtrip_typed() {
        let mut st = State::with_libs(LibSet::NONE);
        st.set_global_value("answer", 42.0).unwrap();
        assert_eq!(st.global_as::<f64>("answer").unwrap(), 42.0);
        let missing: HostValue = st.global_as("nope").unwrap();
        assert!(missing.is_nil());
    }

    #[test]
    fn test_load_without_running() {
        let mut st = State::with_libs(LibSet::NONE);
        st.load_string("return 1").unwrap();
        assert_eq!(st.type_of(-1), TypeTag::Function);
        st.pcall(0, 1, 0).unwrap();
        assert_eq!(st.to_number(-1).unwrap(), 1.0);
    }

    #[test]
    fn test_dump_type_check() {
        let mut st = State::with_libs(LibSet::NONE);
        st.push_number(1.0);
        let err = st.dump().unwrap_err();
        assert!(matches!(
            err,
            Error::TypeExpected {
                found: TypeTag::Number,
                expected: TypeTag::Function
            }
        ));
    }
}
