//! Trampoline synthesis: turning a host method descriptor into a
//! foreign-callable function.
//!
//! A synthesized trampoline resolves and type-checks the receiver through
//! the identity registry, marshals each declared argument from its stack
//! slot, invokes the host thunk, and marshals the result back. Every
//! host-side failure (a thunk error, a conversion error, or a panic) is
//! translated into a foreign runtime error at this boundary; a host panic
//! must never cross into the VM untranslated.

use std::any::{Any, TypeId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use lunet_engine::{NativeFn, TypeTag, Vm};

use crate::error::{Error, Result};
use crate::marshal;
use crate::registry::Handle;
use crate::state::State;
use crate::value::{HostObject, HostValue};

/// Declared parameter type of an exposed host method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Requires a foreign number
    Number,
    /// Requires a foreign boolean
    Boolean,
    /// Requires a foreign string
    Str,
    /// Requires a foreign table, converted by full traversal
    Table,
    /// Accepts any foreign value
    Any,
}

impl ParamKind {
    fn expected_tag(self) -> TypeTag {
        match self {
            ParamKind::Number => TypeTag::Number,
            ParamKind::Boolean => TypeTag::Boolean,
            ParamKind::Str => TypeTag::String,
            ParamKind::Table => TypeTag::Table,
            ParamKind::Any => TypeTag::Nil,
        }
    }
}

/// Member capability: how the type binder dispatches this descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Exposed by name in the function table
    Method,
    /// Invoked on index access
    Getter,
    /// Invoked on index assignment
    Setter,
    /// Installed directly in the metatable under its event name
    /// (`__add`, `__mul`, ...)
    Metamethod,
}

/// Receiver convention of a descriptor.
#[derive(Debug, Clone)]
pub(crate) enum Receiver {
    /// Argument 1 is a userdata resolving to a host object of this type
    Instance {
        type_id: TypeId,
        type_name: &'static str,
    },
    /// All arguments are declared parameters
    Static,
}

/// Invocation thunk provided by the descriptor author.
///
/// Receives the resolved receiver (instance members) and the marshalled
/// arguments; an `Err` message is raised as a foreign runtime error.
pub type InvokeThunk = Arc<
    dyn Fn(Option<&HostObject>, &[HostValue]) -> std::result::Result<Option<HostValue>, String>
        + Send
        + Sync,
>;

/// One exposed host member: name, capability, signature, and thunk.
pub struct MethodDescriptor {
    pub(crate) name: String,
    pub(crate) kind: MemberKind,
    pub(crate) receiver: Receiver,
    pub(crate) params: Vec<ParamKind>,
    pub(crate) invoke: InvokeThunk,
}

impl MethodDescriptor {
    pub(crate) fn instance(
        name: impl Into<String>,
        kind: MemberKind,
        type_id: TypeId,
        type_name: &'static str,
        params: Vec<ParamKind>,
        invoke: InvokeThunk,
    ) -> MethodDescriptor {
        MethodDescriptor {
            name: name.into(),
            kind,
            receiver: Receiver::Instance { type_id, type_name },
            params,
            invoke,
        }
    }

    /// A static (receiver-less) function descriptor.
    pub fn static_fn<F>(name: impl Into<String>, params: &[ParamKind], f: F) -> MethodDescriptor
    where
        F: Fn(&[HostValue]) -> std::result::Result<Option<HostValue>, String>
            + Send
            + Sync
            + 'static,
    {
        MethodDescriptor {
            name: name.into(),
            kind: MemberKind::Method,
            receiver: Receiver::Static,
            params: params.to_vec(),
            invoke: Arc::new(move |_recv, args| f(args)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .finish()
    }
}

/// Synthesize a foreign-callable entry point for a descriptor.
///
/// Synthesis happens once per descriptor; the type binder caches the result
/// inside its lookup tables.
pub(crate) fn build(desc: Arc<MethodDescriptor>) -> NativeFn {
    std::rc::Rc::new(move |vm: &mut Vm| {
        let st = State::from_vm_mut(vm);
        dispatch(st, &desc).map_err(Error::into_engine)
    })
}

fn dispatch(st: &mut State, desc: &MethodDescriptor) -> Result<usize> {
    let ctx = st.ctx()?;
    let (receiver, arg_base) = match &desc.receiver {
        Receiver::Instance { type_id, type_name } => {
            let tag = st.type_of(1);
            let handle = st.vm().to_handle(1).ok_or(Error::TypeExpected {
                found: tag,
                expected: TypeTag::UserData,
            })?;
            let obj = ctx
                .registry
                .resolve(Handle::from_raw(handle))
                .ok_or_else(|| {
                    Error::Runtime(format!(
                        "no host object registered for handle {handle}"
                    ))
                })?;
            if (*obj).type_id() != *type_id {
                return Err(Error::TypeMismatch {
                    expected: type_name.to_string(),
                    got: "a different host type".to_string(),
                });
            }
            (Some(obj), 2usize)
        }
        Receiver::Static => (None, 1usize),
    };

    let mut args = Vec::with_capacity(desc.params.len());
    for (i, kind) in desc.params.iter().enumerate() {
        let idx = (arg_base + i) as i32;
        args.push(convert_arg(st, *kind, idx, i + 1)?);
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| (desc.invoke)(receiver.as_ref(), &args)));
    match outcome {
        Ok(Ok(Some(result))) => {
            st.push_host(&result)?;
            Ok(1)
        }
        Ok(Ok(None)) => Ok(0),
        Ok(Err(message)) => Err(Error::Runtime(message)),
        Err(payload) => Err(Error::Runtime(format!(
            "host method '{}' panicked: {}",
            desc.name,
            panic_message(&*payload)
        ))),
    }
}

fn convert_arg(st: &mut State, kind: ParamKind, idx: i32, position: usize) -> Result<HostValue> {
    let found = st.type_of(idx);
    let mismatch = Error::ArgumentTypeMismatch {
        index: position,
        expected: kind.expected_tag(),
        found,
    };
    match kind {
        ParamKind::Number => {
            if found != TypeTag::Number {
                return Err(mismatch);
            }
            st.to_number(idx).map(HostValue::Number)
        }
        ParamKind::Boolean => {
            if found != TypeTag::Boolean {
                return Err(mismatch);
            }
            Ok(HostValue::Bool(st.to_boolean(idx)))
        }
        ParamKind::Str => {
            if found != TypeTag::String {
                return Err(mismatch);
            }
            st.to_string_value(idx).map(HostValue::Str)
        }
        ParamKind::Table => {
            if found != TypeTag::Table {
                return Err(mismatch);
            }
            marshal::to_host(st, idx)
        }
        ParamKind::Any => marshal::to_host(st, idx),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
