//! Value representation for the Lunet VM.
//!
//! Values are a tagged enum over `Rc`-shared heap objects. The VM is
//! single-threaded by construction, so reference counting without atomics is
//! sufficient; cross-thread traffic goes through the embedder's handle
//! registry, never through raw values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ast::FunctionProto;
use crate::error::EngineResult;
use crate::interp::Env;
use crate::state::Vm;
use crate::table::Table;

/// Shared reference to a table.
pub type TableRef = Rc<RefCell<Table>>;

/// Shared reference to a userdata cell.
pub type UserDataRef = Rc<RefCell<UserDataCell>>;

/// Native function callable from the VM.
///
/// Receives the VM with a fresh stack frame: arguments sit at absolute
/// indices `1..=n`. Returns the number of results it left on top of the
/// stack, or an error to be raised through the protected-call channel.
pub type NativeFn = Rc<dyn Fn(&mut Vm) -> EngineResult<usize>>;

/// Type tag reported for a stack slot.
///
/// Discriminants match the classic C API numbering so embedders can rely on
/// stable values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TypeTag {
    Nil = 0,
    Boolean = 1,
    LightUserData = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    UserData = 7,
    Thread = 8,
}

impl TypeTag {
    /// The language-level name of the type, as `type()` reports it.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Nil => "nil",
            TypeTag::Boolean => "boolean",
            TypeTag::LightUserData | TypeTag::UserData => "userdata",
            TypeTag::Number => "number",
            TypeTag::String => "string",
            TypeTag::Table => "table",
            TypeTag::Function => "function",
            TypeTag::Thread => "thread",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A script closure: compiled prototype plus captured environment.
#[derive(Clone)]
pub struct ScriptFn {
    /// Compiled function body
    pub proto: Rc<FunctionProto>,
    /// Environment captured at creation
    pub env: Env,
}

/// A callable value: script closure or native function.
#[derive(Clone)]
pub enum Function {
    Script(ScriptFn),
    Native(NativeFn),
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Script(s) => f
                .debug_struct("Function::Script")
                .field("params", &s.proto.params)
                .finish(),
            Function::Native(_) => f.write_str("Function::Native"),
        }
    }
}

/// A full userdata allocation: engine-owned cell holding one embedder handle.
///
/// The cell is the only thing the VM owns; the host object the handle
/// denotes lives on the host side and is merely referenced.
#[derive(Debug)]
pub struct UserDataCell {
    /// Opaque handle issued by the embedder's registry
    pub handle: u64,
    /// Per-type metatable, if bound
    pub meta: Option<TableRef>,
}

/// A single VM value.
#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    Str(Rc<str>),
    Table(TableRef),
    Function(Rc<Function>),
    UserData(UserDataRef),
    LightUserData(u64),
}

impl Value {
    /// Build a string value.
    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    /// Build an empty-capacity table value.
    pub fn table(narr: usize, nrec: usize) -> Value {
        Value::Table(Rc::new(RefCell::new(Table::new(narr, nrec))))
    }

    /// Wrap a native function.
    pub fn native(f: NativeFn) -> Value {
        Value::Function(Rc::new(Function::Native(f)))
    }

    /// The type tag of this value.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Boolean(_) => TypeTag::Boolean,
            Value::Number(_) => TypeTag::Number,
            Value::Str(_) => TypeTag::String,
            Value::Table(_) => TypeTag::Table,
            Value::Function(_) => TypeTag::Function,
            Value::UserData(_) => TypeTag::UserData,
            Value::LightUserData(_) => TypeTag::LightUserData,
        }
    }

    /// The language-level type name.
    pub fn type_name(&self) -> &'static str {
        self.type_tag().name()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&Rc<str>> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// The handle stored in a full or light userdata slot.
    pub fn as_handle(&self) -> Option<u64> {
        match self {
            Value::UserData(u) => Some(u.borrow().handle),
            Value::LightUserData(h) => Some(*h),
            _ => None,
        }
    }

    /// The metatable of a table or userdata value.
    pub fn metatable(&self) -> Option<TableRef> {
        match self {
            Value::Table(t) => t.borrow().meta.clone(),
            Value::UserData(u) => u.borrow().meta.clone(),
            _ => None,
        }
    }
}

/// Language equality: numbers and strings by content, heap objects by
/// identity, light userdata by handle value.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::UserData(a), Value::UserData(b)) => Rc::ptr_eq(a, b),
            (Value::LightUserData(a), Value::LightUserData(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("Nil"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Table(t) => write!(f, "Table({:p})", Rc::as_ptr(t)),
            Value::Function(c) => write!(f, "Function({:p})", Rc::as_ptr(c)),
            Value::UserData(u) => write!(f, "UserData(handle={})", u.borrow().handle),
            Value::LightUserData(h) => write!(f, "LightUserData({h})"),
        }
    }
}

/// `tostring` rendering.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::Str(s) => f.write_str(s),
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Value::Function(c) => write!(f, "function: {:p}", Rc::as_ptr(c)),
            Value::UserData(u) => write!(f, "userdata: {:p}", Rc::as_ptr(u)),
            Value::LightUserData(h) => write!(f, "userdata: {h:#x}"),
        }
    }
}

/// Render a number the way the language prints it: integral values without a
/// fractional part, everything else in shortest round-trip form.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n < 0.0 { "-inf".to_string() } else { "inf".to_string() }
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_match_c_numbering() {
        assert_eq!(TypeTag::Nil as i32, 0);
        assert_eq!(TypeTag::LightUserData as i32, 2);
        assert_eq!(TypeTag::String as i32, 4);
        assert_eq!(TypeTag::Thread as i32, 8);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Boolean(false).truthy());
        assert!(Value::Boolean(true).truthy());
        assert!(Value::Number(0.0).truthy());
        assert!(Value::str("").truthy());
    }

    #[test]
    fn test_equality_semantics() {
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
        assert_eq!(Value::str("a"), Value::str("a"));
        let t = Value::table(0, 0);
        assert_eq!(t.clone(), t.clone());
        assert_ne!(Value::table(0, 0), Value::table(0, 0));
        assert_ne!(Value::Number(0.0), Value::Nil);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(5.0), "5");
        assert_eq!(number_to_string(-1.0), "-1");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::INFINITY), "inf");
    }
}
