//! The VM instance and its stack protocol.
//!
//! `Vm` exposes the classic embedding surface: a value stack addressed by
//! signed indices (positive = absolute within the current frame, negative =
//! relative to the top), globals, protected calls, chunk loading/dumping,
//! and garbage-collector control verbs.
//!
//! The stack is frame-windowed: while a native function runs, index 1 is its
//! first argument. Frames are managed by the interpreter's call machinery.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::error::{EngineError, EngineResult};
use crate::interp::Scope;
use crate::parser;
use crate::stdlib::{self, LibSet};
use crate::table::Table;
use crate::value::{Function, NativeFn, ScriptFn, TableRef, TypeTag, UserDataCell, UserDataRef, Value};

/// Accept all results from a call.
pub const MULTRET: i32 = -1;

/// Recursion guard for the tree-walking evaluator.
pub(crate) const MAX_CALL_DEPTH: usize = 180;

/// Prefix identifying a dumped chunk in a byte buffer.
pub const DUMP_MAGIC: &[u8] = b"\x1bLNT";

/// Garbage-collector control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOp {
    /// Stop the collector
    Stop,
    /// Restart the collector
    Restart,
    /// Perform a full collection cycle
    Collect,
    /// Current memory in use, in KiB
    Count,
    /// Remainder of the memory in use divided by 1024
    CountBytes,
    /// Perform an incremental step
    Step,
    /// Set the collector pause, returning the previous value
    SetPause,
    /// Set the step multiplier, returning the previous value
    SetStepMul,
}

/// A Lunet VM instance.
pub struct Vm {
    pub(crate) stack: Vec<Value>,
    /// Start of the current frame window
    pub(crate) base: usize,
    pub(crate) globals: TableRef,
    /// Named metatable registry (the `luaL_newmetatable` analog)
    metatables: FxHashMap<Rc<str>, TableRef>,
    /// Evaluator recursion depth
    pub(crate) depth: usize,
    gc_running: bool,
    gc_pause: i64,
    gc_stepmul: i64,
    pub(crate) start: Instant,
    /// Embedder-owned extension slot
    ext: Option<Rc<dyn Any>>,
}

impl Vm {
    /// Create a VM and open the selected standard libraries.
    pub fn new(libs: LibSet) -> Vm {
        let mut vm = Vm {
            stack: Vec::with_capacity(32),
            base: 0,
            globals: Rc::new(RefCell::new(Table::new(0, 32))),
            metatables: FxHashMap::default(),
            depth: 0,
            gc_running: true,
            gc_pause: 200,
            gc_stepmul: 100,
            start: Instant::now(),
            ext: None,
        };
        stdlib::open_libs(&mut vm, libs);
        vm
    }

    /// Attach embedder context retrievable from native functions.
    pub fn set_ext(&mut self, ext: Rc<dyn Any>) {
        self.ext = Some(ext);
    }

    /// The embedder context, if attached.
    pub fn ext(&self) -> Option<&Rc<dyn Any>> {
        self.ext.as_ref()
    }

    /// The globals table.
    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    // ========================================================================
    // Index resolution
    // ========================================================================

    fn abs(&self, idx: i32) -> Option<usize> {
        if idx > 0 {
            let pos = self.base + (idx as usize) - 1;
            (pos < self.stack.len()).then_some(pos)
        } else if idx < 0 {
            let off = (-idx) as usize;
            let frame_len = self.stack.len().checked_sub(self.base)?;
            if off <= frame_len {
                Some(self.stack.len() - off)
            } else {
                None
            }
        } else {
            None
        }
    }

    /// Number of values in the current frame.
    pub fn top(&self) -> usize {
        self.stack.len() - self.base
    }

    /// Set the frame height: positive counts from the frame base, negative
    /// counts from the top (`set_top(-2)` pops one value).
    pub fn set_top(&mut self, n: i32) {
        let target = if n >= 0 {
            self.base + n as usize
        } else {
            let len = self.stack.len() as i64 + n as i64 + 1;
            len.max(self.base as i64) as usize
        };
        if target <= self.stack.len() {
            self.stack.truncate(target);
        } else {
            self.stack.resize(target, Value::Nil);
        }
    }

    /// Pop `n` values from the frame.
    pub fn pop(&mut self, n: usize) {
        let target = self.stack.len().saturating_sub(n).max(self.base);
        self.stack.truncate(target);
    }

    fn pop_value(&mut self) -> EngineResult<Value> {
        if self.stack.len() <= self.base {
            return Err(EngineError::runtime("stack underflow"));
        }
        Ok(self.stack.pop().unwrap_or(Value::Nil))
    }

    // ========================================================================
    // Pushes
    // ========================================================================

    /// Push any value.
    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    pub fn push_nil(&mut self) {
        self.push(Value::Nil);
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.push(Value::Boolean(b));
    }

    pub fn push_number(&mut self, n: f64) {
        self.push(Value::Number(n));
    }

    /// Integers are widened to the engine's number type.
    pub fn push_integer(&mut self, i: i64) {
        self.push(Value::Number(i as f64));
    }

    pub fn push_string(&mut self, s: &str) {
        self.push(Value::str(s));
    }

    /// Push a copy of the value at `idx`.
    pub fn push_value(&mut self, idx: i32) -> EngineResult<()> {
        let v = self
            .value(idx)
            .ok_or_else(|| EngineError::runtime("invalid stack index"))?;
        self.push(v);
        Ok(())
    }

    /// Push a native function.
    pub fn push_native(&mut self, f: NativeFn) {
        self.push(Value::native(f));
    }

    /// Allocate a userdata cell holding `handle` and push it.
    pub fn push_userdata(&mut self, handle: u64) -> UserDataRef {
        let cell = Rc::new(RefCell::new(UserDataCell { handle, meta: None }));
        self.push(Value::UserData(cell.clone()));
        cell
    }

    /// Push a light userdata: a bare handle with no engine-side allocation.
    pub fn push_light_userdata(&mut self, handle: u64) {
        self.push(Value::LightUserData(handle));
    }

    // ========================================================================
    // Stack shuffling
    // ========================================================================

    /// Move the top value to `idx`, shifting values above it up.
    pub fn insert(&mut self, idx: i32) -> EngineResult<()> {
        let pos = self
            .abs(idx)
            .ok_or_else(|| EngineError::runtime("invalid stack index"))?;
        let v = self.pop_value()?;
        self.stack.insert(pos.min(self.stack.len()), v);
        Ok(())
    }

    /// Remove the value at `idx`, shifting values above it down.
    pub fn remove(&mut self, idx: i32) -> EngineResult<()> {
        let pos = self
            .abs(idx)
            .ok_or_else(|| EngineError::runtime("invalid stack index"))?;
        self.stack.remove(pos);
        Ok(())
    }

    /// Pop the top value and store it at `idx`.
    pub fn replace(&mut self, idx: i32) -> EngineResult<()> {
        let pos = self
            .abs(idx)
            .ok_or_else(|| EngineError::runtime("invalid stack index"))?;
        let v = self.pop_value()?;
        if pos < self.stack.len() {
            self.stack[pos] = v;
        } else {
            self.stack.push(v);
        }
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Clone the value at `idx`, if the index is valid.
    pub fn value(&self, idx: i32) -> Option<Value> {
        self.abs(idx).map(|pos| self.stack[pos].clone())
    }

    /// Type tag at `idx`; an invalid index reads as nil.
    pub fn type_of(&self, idx: i32) -> TypeTag {
        self.abs(idx)
            .map(|pos| self.stack[pos].type_tag())
            .unwrap_or(TypeTag::Nil)
    }

    /// Language-level type name at `idx`.
    pub fn type_name_of(&self, idx: i32) -> &'static str {
        self.type_of(idx).name()
    }

    /// Truthiness of the value at `idx`.
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).map(|v| v.truthy()).unwrap_or(false)
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value(idx).and_then(|v| v.as_number())
    }

    /// The number at `idx`, truncated toward zero.
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.to_number(idx).map(|n| n as i64)
    }

    pub fn to_str(&self, idx: i32) -> Option<Rc<str>> {
        self.value(idx).and_then(|v| v.as_str().cloned())
    }

    pub fn to_table(&self, idx: i32) -> Option<TableRef> {
        self.value(idx).and_then(|v| v.as_table().cloned())
    }

    /// The handle in a full or light userdata at `idx`.
    pub fn to_handle(&self, idx: i32) -> Option<u64> {
        self.value(idx).and_then(|v| v.as_handle())
    }

    // ========================================================================
    // Globals
    // ========================================================================

    /// Push the named global (nil if absent) and report its type.
    pub fn get_global(&mut self, name: &str) -> TypeTag {
        let v = self.globals.borrow().raw_get(&Value::str(name));
        let tag = v.type_tag();
        self.push(v);
        tag
    }

    /// Pop the top value and bind it to the named global.
    pub fn set_global(&mut self, name: &str) -> EngineResult<()> {
        let v = self.pop_value()?;
        self.globals
            .borrow_mut()
            .raw_set(Value::str(name), v)
            .map_err(EngineError::runtime)
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Create a table with capacity hints and push it.
    pub fn create_table(&mut self, narr: usize, nrec: usize) -> TableRef {
        let t = Rc::new(RefCell::new(Table::new(narr, nrec)));
        self.push(Value::Table(t.clone()));
        t
    }

    /// Push `t[name]`, honoring `__index`. Reports the pushed type.
    pub fn get_field(&mut self, idx: i32, name: &str) -> EngineResult<TypeTag> {
        let obj = self
            .value(idx)
            .ok_or_else(|| EngineError::runtime("invalid stack index"))?;
        let v = self.index_value(&obj, &Value::str(name))?;
        let tag = v.type_tag();
        self.push(v);
        Ok(tag)
    }

    /// Pop a value and assign `t[name]`, honoring `__newindex`.
    pub fn set_field(&mut self, idx: i32, name: &str) -> EngineResult<()> {
        let obj = self
            .value(idx)
            .ok_or_else(|| EngineError::runtime("invalid stack index"))?;
        let v = self.pop_value()?;
        self.setindex_value(&obj, &Value::str(name), v)
    }

    /// Pop a key, push `t[key]` (honoring `__index`).
    pub fn get_table(&mut self, idx: i32) -> EngineResult<TypeTag> {
        let obj = self
            .value(idx)
            .ok_or_else(|| EngineError::runtime("invalid stack index"))?;
        let key = self.pop_value()?;
        let v = self.index_value(&obj, &key)?;
        let tag = v.type_tag();
        self.push(v);
        Ok(tag)
    }

    /// Pop a key and a value (value on top) and assign `t[key] = value`.
    pub fn set_table(&mut self, idx: i32) -> EngineResult<()> {
        let obj = self
            .value(idx)
            .ok_or_else(|| EngineError::runtime("invalid stack index"))?;
        let value = self.pop_value()?;
        let key = self.pop_value()?;
        self.setindex_value(&obj, &key, value)
    }

    /// Raw border length of the table or string at `idx`.
    pub fn raw_len(&self, idx: i32) -> usize {
        match self.value(idx) {
            Some(Value::Table(t)) => t.borrow().len(),
            Some(Value::Str(s)) => s.len(),
            _ => 0,
        }
    }

    /// Traversal step: pops a key (nil to start) and, if the table has a
    /// following entry, pushes the next key and value and returns true.
    pub fn table_next(&mut self, idx: i32) -> EngineResult<bool> {
        let t = self.to_table(idx).ok_or_else(|| {
            EngineError::runtime(format!("table expected, got {}", self.type_name_of(idx)))
        })?;
        let key = self.pop_value()?;
        let prev = if key.is_nil() { None } else { Some(key) };
        let step = t
            .borrow()
            .next(prev.as_ref())
            .map_err(EngineError::runtime)?;
        match step {
            Some((k, v)) => {
                self.push(k);
                self.push(v);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // Named metatables
    // ========================================================================

    /// Get or create the named metatable. Returns the table and whether it
    /// was newly created.
    pub fn named_metatable(&mut self, name: &str) -> (TableRef, bool) {
        if let Some(t) = self.metatables.get(name) {
            return (t.clone(), false);
        }
        let t: TableRef = Rc::new(RefCell::new(Table::new(0, 4)));
        self.metatables.insert(Rc::from(name), t.clone());
        (t, true)
    }

    /// Look up a named metatable without creating it.
    pub fn get_named_metatable(&self, name: &str) -> Option<TableRef> {
        self.metatables.get(name).cloned()
    }

    /// Pop a table from the top and set it as the metatable of the value at
    /// `idx`.
    pub fn set_metatable(&mut self, idx: i32) -> EngineResult<()> {
        let target = self
            .value(idx)
            .ok_or_else(|| EngineError::runtime("invalid stack index"))?;
        let meta = match self.pop_value()? {
            Value::Table(t) => Some(t),
            Value::Nil => None,
            other => {
                return Err(EngineError::runtime(format!(
                    "table expected, got {}",
                    other.type_name()
                )))
            }
        };
        match target {
            Value::Table(t) => t.borrow_mut().meta = meta,
            Value::UserData(u) => u.borrow_mut().meta = meta,
            other => {
                return Err(EngineError::runtime(format!(
                    "cannot set a metatable on a {} value",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Set the metatable of the top value to the named metatable.
    pub fn set_named_metatable(&mut self, name: &str) -> EngineResult<()> {
        let meta = self
            .get_named_metatable(name)
            .ok_or_else(|| EngineError::runtime(format!("unknown metatable '{name}'")))?;
        match self.value(-1) {
            Some(Value::Table(t)) => t.borrow_mut().meta = Some(meta),
            Some(Value::UserData(u)) => u.borrow_mut().meta = Some(meta),
            _ => {
                return Err(EngineError::runtime(
                    "cannot set a metatable on this value",
                ))
            }
        }
        Ok(())
    }

    // ========================================================================
    // Calls and errors
    // ========================================================================

    /// Call the function below `nargs` arguments on the stack. Results
    /// replace the function and arguments, adjusted to `nresults`
    /// (`MULTRET` keeps all).
    pub fn call(&mut self, nargs: usize, nresults: i32) -> EngineResult<()> {
        if self.top() < nargs + 1 {
            return Err(EngineError::runtime(
                "not enough elements in the stack for call",
            ));
        }
        let func_pos = self.stack.len() - nargs - 1;
        let args = self.stack.split_off(func_pos + 1);
        let f = self.stack.pop().unwrap_or(Value::Nil);
        let results = self.call_value(f, args)?;
        self.push_results(results, nresults);
        Ok(())
    }

    /// Protected call. `errfunc` is the stack index of an error handler, or
    /// 0 for none. On failure the stack is restored to the function slot and
    /// the (possibly handler-transformed) error value is pushed there.
    pub fn pcall(&mut self, nargs: usize, nresults: i32, errfunc: i32) -> EngineResult<()> {
        if self.top() < nargs + 1 {
            return Err(EngineError::runtime(
                "not enough elements in the stack for call",
            ));
        }
        let func_pos = self.stack.len() - nargs - 1;
        let handler = if errfunc != 0 {
            Some(self.value(errfunc).ok_or_else(|| {
                EngineError::runtime("invalid error handler index")
            })?)
        } else {
            None
        };
        match self.call(nargs, nresults) {
            Ok(()) => Ok(()),
            Err(EngineError::Runtime(raised)) => {
                let errval = match handler {
                    Some(h) => match self.call_value(h, vec![raised]) {
                        Ok(res) => res.into_iter().next().unwrap_or(Value::Nil),
                        Err(_) => {
                            self.stack.truncate(func_pos);
                            self.push(Value::str("error in error handling"));
                            return Err(EngineError::ErrorHandler(
                                "error in error handling".to_string(),
                            ));
                        }
                    },
                    None => raised,
                };
                self.stack.truncate(func_pos);
                self.push(errval.clone());
                Err(EngineError::Runtime(errval))
            }
            Err(other) => {
                self.stack.truncate(func_pos);
                Err(other)
            }
        }
    }

    fn push_results(&mut self, mut results: Vec<Value>, nresults: i32) {
        if nresults >= 0 {
            results.resize(nresults as usize, Value::Nil);
        }
        self.stack.extend(results);
    }

    /// Raise an error taking the top stack value as the error value.
    ///
    /// Native functions use this as `return Err(vm.error_raise())`.
    pub fn error_raise(&mut self) -> EngineError {
        match self.pop_value() {
            Ok(v) => EngineError::Runtime(v),
            Err(e) => e,
        }
    }

    /// Coroutine yield passthrough. The engine has no coroutines, so this
    /// always reports the standard out-of-coroutine error.
    pub fn yield_values(&mut self, _nresults: usize) -> EngineError {
        EngineError::runtime("attempt to yield from outside a coroutine")
    }

    /// Concatenate the top `n` values (strings and numbers), pop them, and
    /// push the result.
    pub fn concat(&mut self, n: usize) -> EngineResult<()> {
        if n == 0 {
            self.push_string("");
            return Ok(());
        }
        if n == 1 {
            return Ok(());
        }
        if self.top() < n {
            return Err(EngineError::runtime(
                "not enough elements in the stack for concat",
            ));
        }
        let mut parts = Vec::with_capacity(n);
        for _ in 0..n {
            parts.push(self.pop_value()?);
        }
        parts.reverse();
        let mut out = String::new();
        for v in &parts {
            match v {
                Value::Str(s) => out.push_str(s),
                Value::Number(x) => out.push_str(&crate::value::number_to_string(*x)),
                other => {
                    return Err(EngineError::runtime(format!(
                        "attempt to concatenate a {} value",
                        other.type_name()
                    )))
                }
            }
        }
        self.push_string(&out);
        Ok(())
    }

    // ========================================================================
    // Loading and running chunks
    // ========================================================================

    /// Compile a source string and push the resulting chunk function.
    pub fn load_str(&mut self, src: &str, chunk_name: &str) -> EngineResult<()> {
        let proto = parser::parse_chunk(src, chunk_name)?;
        let env = Scope::new_root();
        self.push(Value::Function(Rc::new(Function::Script(ScriptFn {
            proto: Rc::new(proto),
            env,
        }))));
        Ok(())
    }

    /// Load a chunk from bytes: either a dumped chunk (magic-prefixed) or
    /// source text.
    pub fn load_bytes(&mut self, bytes: &[u8], chunk_name: &str) -> EngineResult<()> {
        if bytes.starts_with(DUMP_MAGIC) {
            let proto: crate::ast::FunctionProto =
                serde_json::from_slice(&bytes[DUMP_MAGIC.len()..]).map_err(|e| {
                    EngineError::Syntax {
                        message: format!("bad dumped chunk: {e}"),
                        chunk: chunk_name.to_string(),
                        span: crate::lexer::Span::default(),
                    }
                })?;
            let env = Scope::new_root();
            self.push(Value::Function(Rc::new(Function::Script(ScriptFn {
                proto: Rc::new(proto),
                env,
            }))));
            return Ok(());
        }
        let src = std::str::from_utf8(bytes).map_err(|_| EngineError::Syntax {
            message: "source is not valid UTF-8".to_string(),
            chunk: chunk_name.to_string(),
            span: crate::lexer::Span::default(),
        })?;
        self.load_str(src, chunk_name)
    }

    /// Load a chunk from a file.
    pub fn load_file(&mut self, path: &Path) -> EngineResult<()> {
        let bytes = std::fs::read(path)?;
        let chunk_name = format!("@{}", path.display());
        self.load_bytes(&bytes, &chunk_name)
    }

    /// Load and run a source string under a protected call.
    pub fn do_str(&mut self, src: &str, chunk_name: &str) -> EngineResult<()> {
        self.load_str(src, chunk_name)?;
        self.pcall(0, MULTRET, 0)
    }

    /// Load and run a file under a protected call.
    pub fn do_file(&mut self, path: &Path) -> EngineResult<()> {
        self.load_file(path)?;
        self.pcall(0, MULTRET, 0)
    }

    /// Dump the script function on top of the stack to a byte buffer.
    /// The function is not popped.
    pub fn dump(&self) -> EngineResult<Vec<u8>> {
        match self.value(-1) {
            Some(Value::Function(f)) => match &*f {
                Function::Script(sf) => {
                    let mut out = DUMP_MAGIC.to_vec();
                    let body = serde_json::to_vec(&*sf.proto).map_err(|e| {
                        EngineError::runtime(format!("unable to dump function: {e}"))
                    })?;
                    out.extend(body);
                    Ok(out)
                }
                Function::Native(_) => {
                    Err(EngineError::runtime("unable to dump given function"))
                }
            },
            _ => Err(EngineError::runtime("attempt to dump a non-function value")),
        }
    }

    // ========================================================================
    // Native-function argument helpers
    // ========================================================================

    /// Number of arguments in the current native frame.
    pub fn nargs(&self) -> usize {
        self.top()
    }

    /// Argument `i` (1-based) of the current native frame; nil if absent.
    pub fn arg(&self, i: usize) -> Value {
        self.value(i as i32).unwrap_or(Value::Nil)
    }

    // ========================================================================
    // Garbage collector verbs
    // ========================================================================

    /// Control the collector. The engine reclaims through reference
    /// counting, so `Collect` has nothing to free; `Count` walks the live
    /// object graph and reports an estimate.
    pub fn gc(&mut self, op: GcOp, data: i32) -> i64 {
        match op {
            GcOp::Stop => {
                self.gc_running = false;
                0
            }
            GcOp::Restart => {
                self.gc_running = true;
                0
            }
            GcOp::Collect => 0,
            GcOp::Count => (self.live_bytes() / 1024) as i64,
            GcOp::CountBytes => (self.live_bytes() % 1024) as i64,
            GcOp::Step => 1,
            GcOp::SetPause => {
                let prev = self.gc_pause;
                self.gc_pause = data as i64;
                prev
            }
            GcOp::SetStepMul => {
                let prev = self.gc_stepmul;
                self.gc_stepmul = data as i64;
                prev
            }
        }
    }

    /// Whether the collector is (nominally) running.
    pub fn gc_is_running(&self) -> bool {
        self.gc_running
    }

    fn live_bytes(&self) -> usize {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut total = 0usize;
        for v in &self.stack {
            measure(v, &mut seen, &mut total);
        }
        measure(&Value::Table(self.globals.clone()), &mut seen, &mut total);
        for t in self.metatables.values() {
            measure(&Value::Table(t.clone()), &mut seen, &mut total);
        }
        total
    }
}

/// Rough per-object size accounting for `GcOp::Count`.
fn measure(v: &Value, seen: &mut HashSet<usize>, total: &mut usize) {
    match v {
        Value::Nil | Value::Boolean(_) | Value::Number(_) | Value::LightUserData(_) => {
            *total += std::mem::size_of::<Value>();
        }
        Value::Str(s) => *total += 24 + s.len(),
        Value::Function(f) => {
            if seen.insert(Rc::as_ptr(f) as *const () as usize) {
                *total += 48;
            }
        }
        Value::UserData(u) => {
            if seen.insert(Rc::as_ptr(u) as *const () as usize) {
                *total += 32;
            }
        }
        Value::Table(t) => {
            if !seen.insert(Rc::as_ptr(t) as *const () as usize) {
                return;
            }
            *total += 56;
            let table = t.borrow();
            let mut prev: Option<Value> = None;
            while let Ok(Some((k, val))) = table.next(prev.as_ref()) {
                *total += 16;
                measure(&k, seen, total);
                measure(&val, seen, total);
                prev = Some(k);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> Vm {
        Vm::new(LibSet::NONE)
    }

    #[test]
    fn test_push_and_index_model() {
        let mut vm = vm();
        vm.push_number(1.0);
        vm.push_string("two");
        vm.push_boolean(true);
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.to_number(1), Some(1.0));
        assert_eq!(vm.to_str(-2).as_deref(), Some("two"));
        assert!(vm.to_boolean(-1));
        assert_eq!(vm.type_of(2), TypeTag::String);
    }

    #[test]
    fn test_set_top_negative_pops() {
        let mut vm = vm();
        vm.push_number(1.0);
        vm.push_number(2.0);
        vm.push_number(3.0);
        vm.set_top(-2);
        assert_eq!(vm.top(), 2);
        assert_eq!(vm.to_number(-1), Some(2.0));
        vm.set_top(4);
        assert_eq!(vm.top(), 4);
        assert_eq!(vm.type_of(-1), TypeTag::Nil);
    }

    #[test]
    fn test_insert_remove_replace() {
        let mut vm = vm();
        vm.push_number(1.0);
        vm.push_number(2.0);
        vm.push_number(3.0);
        vm.insert(-2).unwrap(); // 1 3 2
        assert_eq!(vm.to_number(2), Some(3.0));
        vm.remove(2).unwrap(); // 1 2
        assert_eq!(vm.top(), 2);
        assert_eq!(vm.to_number(2), Some(2.0));
        vm.push_number(9.0);
        vm.replace(1).unwrap(); // 9 2
        assert_eq!(vm.to_number(1), Some(9.0));
        assert_eq!(vm.top(), 2);
    }

    #[test]
    fn test_globals_roundtrip() {
        let mut vm = vm();
        vm.push_number(5.0);
        vm.set_global("v").unwrap();
        assert_eq!(vm.get_global("v"), TypeTag::Number);
        assert_eq!(vm.to_number(-1), Some(5.0));
        assert_eq!(vm.get_global("missing"), TypeTag::Nil);
    }

    #[test]
    fn test_do_str_and_stack_result() {
        let mut vm = vm();
        vm.do_str("return 5.0 + 5.0", "t").unwrap();
        assert_eq!(vm.top(), 1);
        assert_eq!(vm.to_number(-1), Some(10.0));
    }

    #[test]
    fn test_do_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "answer = 40 + 2").unwrap();
        let mut vm = Vm::new(LibSet::NONE);
        vm.do_file(file.path()).unwrap();
        vm.get_global("answer");
        assert_eq!(vm.to_number(-1), Some(42.0));
    }

    #[test]
    fn test_do_str_syntax_error() {
        let mut vm = vm();
        let err = vm.do_str("local = 1", "t").unwrap_err();
        assert!(matches!(err, EngineError::Syntax { .. }));
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn test_pcall_pushes_error_value_and_balances() {
        let mut vm = Vm::new(LibSet::BASE);
        let before = vm.top();
        let err = vm.do_str("error(\"boom\")", "t").unwrap_err();
        match err {
            EngineError::Runtime(v) => assert_eq!(v.to_string(), "boom"),
            other => panic!("expected runtime error, got {other:?}"),
        }
        // The error value replaces the chunk function
        assert_eq!(vm.top(), before + 1);
        assert_eq!(vm.to_str(-1).as_deref(), Some("boom"));
    }

    #[test]
    fn test_pcall_with_error_handler() {
        let mut vm = Vm::new(LibSet::BASE);
        // Handler decorates the error value
        vm.do_str("function handler(e) return \"handled: \" .. e end", "t")
            .unwrap();
        vm.get_global("handler");
        let handler_idx = vm.top() as i32;
        vm.load_str("error(\"x\")", "t").unwrap();
        let err = vm.pcall(0, MULTRET, handler_idx).unwrap_err();
        match err {
            EngineError::Runtime(v) => assert_eq!(v.to_string(), "handled: x"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(vm.to_str(-1).as_deref(), Some("handled: x"));
    }

    #[test]
    fn test_unprotected_call_propagates() {
        let mut vm = Vm::new(LibSet::BASE);
        vm.load_str("error(\"fatal\")", "t").unwrap();
        assert!(vm.call(0, 0).is_err());
    }

    #[test]
    fn test_table_next_traversal() {
        let mut vm = vm();
        let t = vm.create_table(0, 2);
        t.borrow_mut()
            .raw_set(Value::str("a"), Value::Number(1.0))
            .unwrap();
        t.borrow_mut()
            .raw_set(Value::str("b"), Value::Number(2.0))
            .unwrap();
        let tbl_idx = vm.top() as i32;
        vm.push_nil();
        let mut count = 0;
        while vm.table_next(tbl_idx).unwrap() {
            count += 1;
            vm.pop(1); // pop value, keep key
        }
        assert_eq!(count, 2);
        // Traversal consumed its key; only the table remains
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn test_concat() {
        let mut vm = vm();
        vm.push_string("a");
        vm.push_number(1.0);
        vm.push_string("b");
        vm.concat(3).unwrap();
        assert_eq!(vm.to_str(-1).as_deref(), Some("a1b"));
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn test_dump_and_reload() {
        let mut vm = vm();
        vm.load_str("return 21 * 2", "chunk").unwrap();
        let bytes = vm.dump().unwrap();
        assert!(bytes.starts_with(DUMP_MAGIC));
        vm.pop(1);

        let mut vm2 = Vm::new(LibSet::NONE);
        vm2.load_bytes(&bytes, "reloaded").unwrap();
        vm2.pcall(0, MULTRET, 0).unwrap();
        assert_eq!(vm2.to_number(-1), Some(42.0));
    }

    #[test]
    fn test_dump_native_rejected() {
        let mut vm = Vm::new(LibSet::BASE);
        vm.get_global("print");
        assert!(vm.dump().is_err());
    }

    #[test]
    fn test_gc_verbs() {
        let mut vm = vm();
        assert!(vm.gc_is_running());
        vm.gc(GcOp::Stop, 0);
        assert!(!vm.gc_is_running());
        vm.gc(GcOp::Restart, 0);
        assert!(vm.gc_is_running());
        let prev = vm.gc(GcOp::SetPause, 150);
        assert_eq!(prev, 200);
        assert_eq!(vm.gc(GcOp::SetPause, 200), 150);
        vm.do_str("t = { x = 'some string', y = 42 }", "t").unwrap();
        let kb = vm.gc(GcOp::Count, 0);
        assert!(kb >= 0);
    }

    #[test]
    fn test_call_depth_guard() {
        let mut vm = vm();
        let err = vm
            .do_str("function f() return f() end\nf()", "t")
            .unwrap_err();
        match err {
            EngineError::Runtime(v) => {
                assert_eq!(v.to_string(), "stack overflow")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_yield_outside_coroutine() {
        let mut vm = vm();
        let err = vm.yield_values(0);
        assert!(err.to_string().contains("outside a coroutine"));
    }
}
