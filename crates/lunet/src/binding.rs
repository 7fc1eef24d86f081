//! Per-type dispatch bindings: the metatable protocol.
//!
//! A `TypeDescriptor` declares the member set of a host type (the
//! declarative capability set). `bind_for` lazily builds, per state, the
//! function/getter/setter lookup tables and the `__index`/`__newindex`
//! closures that close over them, caching the result by `TypeId` and under
//! a stable type-name key in the engine's named-metatable registry.
//!
//! Index access first consults the function table (a method is a value
//! until invoked), then the getter table (invoked with the receiver); a
//! miss either yields nil or raises, selectable through the process-global
//! strict flag. Assignment consults only the setter table and always raises
//! on a miss; silently dropping an assignment is a worse failure mode than
//! an error.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lunet_engine::{NativeFn, Table, TableRef, Value, Vm};

use crate::error::{Error, Result};
use crate::state::State;
use crate::trampoline::{self, InvokeThunk, MemberKind, MethodDescriptor, ParamKind};
use crate::value::{HostObject, HostValue};

/// Whether reading an unexposed member raises instead of yielding nil.
static ERROR_ON_INDEX_NOT_FOUND: AtomicBool = AtomicBool::new(false);

/// Set the strict-mode policy for missing `__index` keys on host objects.
pub fn set_error_on_index_not_found(enabled: bool) {
    ERROR_ON_INDEX_NOT_FOUND.store(enabled, Ordering::Relaxed);
}

/// The current strict-mode policy.
pub fn error_on_index_not_found() -> bool {
    ERROR_ON_INDEX_NOT_FOUND.load(Ordering::Relaxed)
}

/// Declared member set of a host type.
pub struct TypeDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    members: Vec<Arc<MethodDescriptor>>,
}

impl TypeDescriptor {
    pub(crate) fn empty<T: Any + Send + Sync>() -> TypeDescriptor {
        TypeDescriptor {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            members: Vec::new(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Stable name keying the engine-side metatable.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn members(&self) -> &[Arc<MethodDescriptor>] {
        &self.members
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_name", &self.type_name)
            .field("members", &self.members.len())
            .finish()
    }
}

/// Builder collecting the exposed members of a host type `T`.
pub struct TypeBuilder<T> {
    name: &'static str,
    members: Vec<Arc<MethodDescriptor>>,
    _marker: PhantomData<fn(T)>,
}

fn receiver_as<T: Any>(recv: Option<&HostObject>) -> std::result::Result<&T, String> {
    recv.and_then(|o| o.as_ref().downcast_ref::<T>())
        .ok_or_else(|| "receiver type mismatch".to_string())
}

impl<T: Any + Send + Sync> TypeBuilder<T> {
    /// Start a member set under a stable type name.
    pub fn new(name: &'static str) -> TypeBuilder<T> {
        TypeBuilder {
            name,
            members: Vec::new(),
            _marker: PhantomData,
        }
    }

    fn push_member(&mut self, name: &str, kind: MemberKind, params: Vec<ParamKind>, invoke: InvokeThunk) {
        self.members.push(Arc::new(MethodDescriptor::instance(
            name,
            kind,
            TypeId::of::<T>(),
            self.name,
            params,
            invoke,
        )));
    }

    /// Expose a callable method. The thunk returns `Some(result)` for one
    /// result or `None` for a void method.
    pub fn method<F>(mut self, name: &str, params: &[ParamKind], f: F) -> Self
    where
        F: Fn(&T, &[HostValue]) -> std::result::Result<Option<HostValue>, String>
            + Send
            + Sync
            + 'static,
    {
        self.push_member(
            name,
            MemberKind::Method,
            params.to_vec(),
            Arc::new(move |recv, args| f(receiver_as::<T>(recv)?, args)),
        );
        self
    }

    /// Expose a readable property.
    pub fn getter<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&T) -> std::result::Result<HostValue, String> + Send + Sync + 'static,
    {
        self.push_member(
            name,
            MemberKind::Getter,
            Vec::new(),
            Arc::new(move |recv, _args| f(receiver_as::<T>(recv)?).map(Some)),
        );
        self
    }

    /// Expose a writable property.
    pub fn setter<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&T, HostValue) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.push_member(
            name,
            MemberKind::Setter,
            vec![ParamKind::Any],
            Arc::new(move |recv, args| {
                let value = args.first().cloned().unwrap_or(HostValue::Nil);
                f(receiver_as::<T>(recv)?, value)?;
                Ok(None)
            }),
        );
        self
    }

    /// Install a metamethod under its event name (`__add`, `__mul`, ...).
    /// The receiver is the left operand; remaining operands arrive as
    /// declared parameters.
    pub fn metamethod<F>(mut self, event: &str, params: &[ParamKind], f: F) -> Self
    where
        F: Fn(&T, &[HostValue]) -> std::result::Result<Option<HostValue>, String>
            + Send
            + Sync
            + 'static,
    {
        self.push_member(
            event,
            MemberKind::Metamethod,
            params.to_vec(),
            Arc::new(move |recv, args| f(receiver_as::<T>(recv)?, args)),
        );
        self
    }

    /// Finish the member set.
    pub fn build(self) -> TypeDescriptor {
        TypeDescriptor {
            type_id: TypeId::of::<T>(),
            type_name: self.name,
            members: self.members,
        }
    }
}

/// A built binding: the dispatch metatable plus its lookup tables.
pub(crate) struct TypeBinding {
    pub metatable: TableRef,
    pub functions: TableRef,
    pub getters: TableRef,
    pub setters: TableRef,
}

/// Get or build the binding for `T`, returning its metatable.
///
/// Types without a registered descriptor bind with an empty member set.
/// Rebinding is idempotent: the cached binding (and the engine's named
/// metatable) are reused.
pub(crate) fn bind_for<T: Any + Send + Sync>(st: &mut State) -> Result<TableRef> {
    let ctx = st.ctx()?;
    let type_id = TypeId::of::<T>();
    if let Some(binding) = ctx.bindings.borrow().get(&type_id) {
        return Ok(binding.metatable.clone());
    }
    let descriptor = {
        let descriptors = ctx.descriptors.borrow();
        match descriptors.get(&type_id) {
            Some(d) => Arc::clone(d),
            None => Arc::new(TypeDescriptor::empty::<T>()),
        }
    };
    let binding = build_binding(st, &descriptor)?;
    let metatable = binding.metatable.clone();
    ctx.bindings.borrow_mut().insert(type_id, binding);
    Ok(metatable)
}

fn new_lookup_table(capacity: usize) -> TableRef {
    Rc::new(RefCell::new(Table::new(0, capacity)))
}

fn build_binding(st: &mut State, descriptor: &TypeDescriptor) -> Result<TypeBinding> {
    let (metatable, _created) = st.vm_mut().named_metatable(descriptor.type_name());
    let functions = new_lookup_table(descriptor.members().len());
    let getters = new_lookup_table(4);
    let setters = new_lookup_table(4);

    for member in descriptor.members() {
        let callable = Value::native(trampoline::build(Arc::clone(member)));
        let table = match member.kind() {
            MemberKind::Method => &functions,
            MemberKind::Getter => &getters,
            MemberKind::Setter => &setters,
            MemberKind::Metamethod => &metatable,
        };
        table
            .borrow_mut()
            .raw_set(Value::str(member.name()), callable)
            .map_err(|m| Error::Runtime(m.to_string()))?;
    }

    let index_fn = make_index_fn(functions.clone(), getters.clone());
    let newindex_fn = make_newindex_fn(setters.clone());
    {
        let mut meta = metatable.borrow_mut();
        meta.raw_set(Value::str("__index"), Value::native(index_fn))
            .map_err(|m| Error::Runtime(m.to_string()))?;
        meta.raw_set(Value::str("__newindex"), Value::native(newindex_fn))
            .map_err(|m| Error::Runtime(m.to_string()))?;
    }

    Ok(TypeBinding {
        metatable,
        functions,
        getters,
        setters,
    })
}

/// `__index` dispatch: function table first (returned uninvoked), then
/// getter invocation, then the strict-mode policy.
fn make_index_fn(functions: TableRef, getters: TableRef) -> NativeFn {
    Rc::new(move |vm: &mut Vm| {
        let key = vm.arg(2);
        let method = functions.borrow().raw_get(&key);
        if !method.is_nil() {
            vm.push(method);
            return Ok(1);
        }
        let getter = getters.borrow().raw_get(&key);
        if !getter.is_nil() {
            let receiver = vm.arg(1);
            let mut results = vm.call_value(getter, vec![receiver])?;
            let value = if results.is_empty() {
                lunet_engine::Value::Nil
            } else {
                results.remove(0)
            };
            vm.push(value);
            return Ok(1);
        }
        if error_on_index_not_found() {
            Err(Error::IndexNotFound(key.to_string()).into_engine())
        } else {
            vm.push_nil();
            Ok(1)
        }
    })
}

/// `__newindex` dispatch: setter invocation; a miss always raises,
/// independent of the strict flag.
fn make_newindex_fn(setters: TableRef) -> NativeFn {
    Rc::new(move |vm: &mut Vm| {
        let key = vm.arg(2);
        let setter = setters.borrow().raw_get(&key);
        if setter.is_nil() {
            return Err(Error::IndexNotFound(key.to_string()).into_engine());
        }
        let receiver = vm.arg(1);
        let value = vm.arg(3);
        vm.call_value(setter, vec![receiver, value])?;
        Ok(0)
    })
}
