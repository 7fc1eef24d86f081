//! Standard library selection and implementations.
//!
//! `LibSet` mirrors the classic flag-per-library opening scheme. Base, math,
//! string, table, os, and io carry working subsets; the remaining flags are
//! accepted and open their (empty) library tables so `type(coroutine)` and
//! friends behave.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::error::{EngineError, EngineResult};
use crate::state::Vm;
use crate::table::Table;
use crate::value::{number_to_string, TableRef, Value};

/// A set of standard libraries to open at state creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibSet(u16);

impl LibSet {
    pub const NONE: LibSet = LibSet(0);
    pub const BASE: LibSet = LibSet(1);
    pub const COROUTINE: LibSet = LibSet(1 << 1);
    pub const TABLE: LibSet = LibSet(1 << 2);
    pub const IO: LibSet = LibSet(1 << 3);
    pub const OS: LibSet = LibSet(1 << 4);
    pub const STRING: LibSet = LibSet(1 << 5);
    pub const UTF8: LibSet = LibSet(1 << 6);
    pub const MATH: LibSet = LibSet(1 << 7);
    pub const DEBUG: LibSet = LibSet(1 << 8);
    pub const PACKAGE: LibSet = LibSet(1 << 9);
    pub const ALL: LibSet = LibSet(0x3ff);

    /// Whether every library in `other` is selected.
    pub fn contains(self, other: LibSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn from_bits(bits: u16) -> LibSet {
        LibSet(bits & Self::ALL.0)
    }
}

impl std::ops::BitOr for LibSet {
    type Output = LibSet;
    fn bitor(self, rhs: LibSet) -> LibSet {
        LibSet(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for LibSet {
    fn bitor_assign(&mut self, rhs: LibSet) {
        self.0 |= rhs.0;
    }
}

/// Open the selected libraries into the VM's globals.
pub fn open_libs(vm: &mut Vm, libs: LibSet) {
    if libs.contains(LibSet::BASE) {
        open_base(vm);
    }
    if libs.contains(LibSet::MATH) {
        open_math(vm);
    }
    if libs.contains(LibSet::STRING) {
        open_string(vm);
    }
    if libs.contains(LibSet::TABLE) {
        open_table(vm);
    }
    if libs.contains(LibSet::OS) {
        open_os(vm);
    }
    if libs.contains(LibSet::IO) {
        open_io(vm);
    }
    // Placeholder library tables for the rest of the flag surface
    for (flag, name) in [
        (LibSet::COROUTINE, "coroutine"),
        (LibSet::UTF8, "utf8"),
        (LibSet::DEBUG, "debug"),
        (LibSet::PACKAGE, "package"),
    ] {
        if libs.contains(flag) {
            lib_table(vm, name, &[]);
        }
    }
}

type LibFn = fn(&mut Vm) -> EngineResult<usize>;

fn set_global_fn(vm: &mut Vm, name: &str, f: LibFn) {
    let nf: crate::value::NativeFn = Rc::new(f);
    let _ = vm
        .globals()
        .borrow_mut()
        .raw_set(Value::str(name), Value::native(nf));
}

fn lib_table(vm: &mut Vm, name: &str, fns: &[(&str, LibFn)]) -> TableRef {
    let t: TableRef = Rc::new(RefCell::new(Table::new(0, fns.len())));
    for (fname, f) in fns {
        let nf: crate::value::NativeFn = Rc::new(*f);
        let _ = t
            .borrow_mut()
            .raw_set(Value::str(*fname), Value::native(nf));
    }
    let _ = vm
        .globals()
        .borrow_mut()
        .raw_set(Value::str(name), Value::Table(t.clone()));
    t
}

// ============================================================================
// Argument checking helpers
// ============================================================================

fn check_number(vm: &Vm, i: usize, fname: &str) -> EngineResult<f64> {
    vm.arg(i).as_number().ok_or_else(|| {
        EngineError::runtime(format!(
            "bad argument #{i} to '{fname}' (number expected, got {})",
            vm.arg(i).type_name()
        ))
    })
}

fn check_str(vm: &Vm, i: usize, fname: &str) -> EngineResult<Rc<str>> {
    vm.arg(i).as_str().cloned().ok_or_else(|| {
        EngineError::runtime(format!(
            "bad argument #{i} to '{fname}' (string expected, got {})",
            vm.arg(i).type_name()
        ))
    })
}

fn check_table(vm: &Vm, i: usize, fname: &str) -> EngineResult<TableRef> {
    vm.arg(i).as_table().cloned().ok_or_else(|| {
        EngineError::runtime(format!(
            "bad argument #{i} to '{fname}' (table expected, got {})",
            vm.arg(i).type_name()
        ))
    })
}

// ============================================================================
// base
// ============================================================================

fn open_base(vm: &mut Vm) {
    set_global_fn(vm, "print", base_print);
    set_global_fn(vm, "type", base_type);
    set_global_fn(vm, "tostring", base_tostring);
    set_global_fn(vm, "tonumber", base_tonumber);
    set_global_fn(vm, "error", base_error);
    set_global_fn(vm, "assert", base_assert);
    set_global_fn(vm, "pcall", base_pcall);
    set_global_fn(vm, "rawlen", base_rawlen);
    set_global_fn(vm, "rawget", base_rawget);
    set_global_fn(vm, "rawset", base_rawset);
    set_global_fn(vm, "rawequal", base_rawequal);
    set_global_fn(vm, "setmetatable", base_setmetatable);
    set_global_fn(vm, "getmetatable", base_getmetatable);
}

fn base_setmetatable(vm: &mut Vm) -> EngineResult<usize> {
    let t = check_table(vm, 1, "setmetatable")?;
    match vm.arg(2) {
        Value::Table(mt) => t.borrow_mut().meta = Some(mt),
        Value::Nil => t.borrow_mut().meta = None,
        other => {
            return Err(EngineError::runtime(format!(
                "bad argument #2 to 'setmetatable' (nil or table expected, got {})",
                other.type_name()
            )))
        }
    }
    vm.push(Value::Table(t));
    Ok(1)
}

fn base_getmetatable(vm: &mut Vm) -> EngineResult<usize> {
    match vm.arg(1).metatable() {
        Some(mt) => vm.push(Value::Table(mt)),
        None => vm.push_nil(),
    }
    Ok(1)
}

fn base_print(vm: &mut Vm) -> EngineResult<usize> {
    let mut line = String::new();
    for i in 1..=vm.nargs() {
        if i > 1 {
            line.push('\t');
        }
        line.push_str(&vm.arg(i).to_string());
    }
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
    Ok(0)
}

fn base_type(vm: &mut Vm) -> EngineResult<usize> {
    let name = vm.arg(1).type_name();
    vm.push_string(name);
    Ok(1)
}

fn base_tostring(vm: &mut Vm) -> EngineResult<usize> {
    let s = vm.arg(1).to_string();
    vm.push_string(&s);
    Ok(1)
}

fn base_tonumber(vm: &mut Vm) -> EngineResult<usize> {
    match vm.arg(1) {
        Value::Number(n) => vm.push_number(n),
        Value::Str(s) => {
            let text = s.trim();
            let parsed = if let Some(hex) = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
            {
                i64::from_str_radix(hex, 16).ok().map(|n| n as f64)
            } else {
                text.parse::<f64>().ok()
            };
            match parsed {
                Some(n) => vm.push_number(n),
                None => vm.push_nil(),
            }
        }
        _ => vm.push_nil(),
    }
    Ok(1)
}

/// Raises the first argument as an error value, unmodified.
fn base_error(vm: &mut Vm) -> EngineResult<usize> {
    Err(EngineError::Runtime(vm.arg(1)))
}

fn base_assert(vm: &mut Vm) -> EngineResult<usize> {
    if vm.arg(1).truthy() {
        // Arguments pass through as results
        return Ok(vm.nargs());
    }
    match vm.arg(2) {
        Value::Nil => Err(EngineError::runtime("assertion failed!")),
        message => Err(EngineError::Runtime(message)),
    }
}

fn base_pcall(vm: &mut Vm) -> EngineResult<usize> {
    let f = vm.arg(1);
    let args: Vec<Value> = (2..=vm.nargs()).map(|i| vm.arg(i)).collect();
    match vm.call_value(f, args) {
        Ok(results) => {
            vm.push_boolean(true);
            let n = results.len();
            for r in results {
                vm.push(r);
            }
            Ok(1 + n)
        }
        Err(EngineError::Runtime(v)) => {
            vm.push_boolean(false);
            vm.push(v);
            Ok(2)
        }
        Err(other) => Err(other),
    }
}

fn base_rawlen(vm: &mut Vm) -> EngineResult<usize> {
    let len = match vm.arg(1) {
        Value::Table(t) => t.borrow().len(),
        Value::Str(s) => s.len(),
        other => {
            return Err(EngineError::runtime(format!(
                "table or string expected, got {}",
                other.type_name()
            )))
        }
    };
    vm.push_number(len as f64);
    Ok(1)
}

fn base_rawget(vm: &mut Vm) -> EngineResult<usize> {
    let t = check_table(vm, 1, "rawget")?;
    let v = t.borrow().raw_get(&vm.arg(2));
    vm.push(v);
    Ok(1)
}

fn base_rawset(vm: &mut Vm) -> EngineResult<usize> {
    let t = check_table(vm, 1, "rawset")?;
    t.borrow_mut()
        .raw_set(vm.arg(2), vm.arg(3))
        .map_err(EngineError::runtime)?;
    vm.push(Value::Table(t));
    Ok(1)
}

fn base_rawequal(vm: &mut Vm) -> EngineResult<usize> {
    let eq = vm.arg(1) == vm.arg(2);
    vm.push_boolean(eq);
    Ok(1)
}

// ============================================================================
// math
// ============================================================================

fn open_math(vm: &mut Vm) {
    let t = lib_table(
        vm,
        "math",
        &[
            ("abs", math_abs),
            ("floor", math_floor),
            ("ceil", math_ceil),
            ("sqrt", math_sqrt),
            ("sin", math_sin),
            ("cos", math_cos),
            ("exp", math_exp),
            ("log", math_log),
            ("max", math_max),
            ("min", math_min),
        ],
    );
    let _ = t
        .borrow_mut()
        .raw_set(Value::str("pi"), Value::Number(std::f64::consts::PI));
    let _ = t
        .borrow_mut()
        .raw_set(Value::str("huge"), Value::Number(f64::INFINITY));
}

macro_rules! math_unary {
    ($name:ident, $fname:literal, $op:expr) => {
        fn $name(vm: &mut Vm) -> EngineResult<usize> {
            let n = check_number(vm, 1, $fname)?;
            let f: fn(f64) -> f64 = $op;
            vm.push_number(f(n));
            Ok(1)
        }
    };
}

math_unary!(math_abs, "abs", f64::abs);
math_unary!(math_floor, "floor", f64::floor);
math_unary!(math_ceil, "ceil", f64::ceil);
math_unary!(math_sqrt, "sqrt", f64::sqrt);
math_unary!(math_sin, "sin", f64::sin);
math_unary!(math_cos, "cos", f64::cos);
math_unary!(math_exp, "exp", f64::exp);
math_unary!(math_log, "log", f64::ln);

fn math_max(vm: &mut Vm) -> EngineResult<usize> {
    let mut best = check_number(vm, 1, "max")?;
    for i in 2..=vm.nargs() {
        best = best.max(check_number(vm, i, "max")?);
    }
    vm.push_number(best);
    Ok(1)
}

fn math_min(vm: &mut Vm) -> EngineResult<usize> {
    let mut best = check_number(vm, 1, "min")?;
    for i in 2..=vm.nargs() {
        best = best.min(check_number(vm, i, "min")?);
    }
    vm.push_number(best);
    Ok(1)
}

// ============================================================================
// string
// ============================================================================

fn open_string(vm: &mut Vm) {
    lib_table(
        vm,
        "string",
        &[
            ("len", str_len),
            ("sub", str_sub),
            ("upper", str_upper),
            ("lower", str_lower),
            ("rep", str_rep),
            ("reverse", str_reverse),
            ("format", str_format),
        ],
    );
}

fn str_len(vm: &mut Vm) -> EngineResult<usize> {
    let s = check_str(vm, 1, "len")?;
    vm.push_number(s.len() as f64);
    Ok(1)
}

/// 1-based substring with negative indices counting from the end.
fn str_sub(vm: &mut Vm) -> EngineResult<usize> {
    let s = check_str(vm, 1, "sub")?;
    let len = s.len() as i64;
    let mut i = check_number(vm, 2, "sub")? as i64;
    let mut j = match vm.arg(3) {
        Value::Nil => -1,
        v => v.as_number().ok_or_else(|| {
            EngineError::runtime("bad argument #3 to 'sub' (number expected)")
        })? as i64,
    };
    if i < 0 {
        i = (len + i + 1).max(1);
    } else if i == 0 {
        i = 1;
    }
    if j < 0 {
        j = len + j + 1;
    } else if j > len {
        j = len;
    }
    let out = if i > j {
        String::new()
    } else {
        // Byte-based slicing, tolerant of multi-byte boundaries
        let bytes = &s.as_bytes()[(i - 1) as usize..j as usize];
        String::from_utf8_lossy(bytes).into_owned()
    };
    vm.push_string(&out);
    Ok(1)
}

fn str_upper(vm: &mut Vm) -> EngineResult<usize> {
    let s = check_str(vm, 1, "upper")?;
    vm.push_string(&s.to_uppercase());
    Ok(1)
}

fn str_lower(vm: &mut Vm) -> EngineResult<usize> {
    let s = check_str(vm, 1, "lower")?;
    vm.push_string(&s.to_lowercase());
    Ok(1)
}

fn str_rep(vm: &mut Vm) -> EngineResult<usize> {
    let s = check_str(vm, 1, "rep")?;
    let n = check_number(vm, 2, "rep")?.max(0.0) as usize;
    vm.push_string(&s.repeat(n));
    Ok(1)
}

fn str_reverse(vm: &mut Vm) -> EngineResult<usize> {
    let s = check_str(vm, 1, "reverse")?;
    let out: String = s.chars().rev().collect();
    vm.push_string(&out);
    Ok(1)
}

/// Minimal `format`: `%s`, `%d`, `%f`, `%x`, `%%`.
fn str_format(vm: &mut Vm) -> EngineResult<usize> {
    let fmt = check_str(vm, 1, "format")?;
    let mut out = String::with_capacity(fmt.len());
    let mut argn = 1usize;
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => {
                argn += 1;
                out.push_str(&vm.arg(argn).to_string());
            }
            Some('d') => {
                argn += 1;
                out.push_str(&format!("{}", check_number(vm, argn, "format")? as i64));
            }
            Some('f') => {
                argn += 1;
                out.push_str(&format!("{:.6}", check_number(vm, argn, "format")?));
            }
            Some('x') => {
                argn += 1;
                out.push_str(&format!("{:x}", check_number(vm, argn, "format")? as i64));
            }
            Some(other) => {
                return Err(EngineError::runtime(format!(
                    "invalid option '%{other}' to 'format'"
                )))
            }
            None => {
                return Err(EngineError::runtime(
                    "invalid format string to 'format'",
                ))
            }
        }
    }
    vm.push_string(&out);
    Ok(1)
}

// ============================================================================
// table
// ============================================================================

fn open_table(vm: &mut Vm) {
    lib_table(
        vm,
        "table",
        &[
            ("insert", table_insert),
            ("remove", table_remove),
            ("concat", table_concat),
        ],
    );
}

fn table_insert(vm: &mut Vm) -> EngineResult<usize> {
    let t = check_table(vm, 1, "insert")?;
    match vm.nargs() {
        2 => {
            let pos = t.borrow().len() + 1;
            t.borrow_mut()
                .raw_set(Value::Number(pos as f64), vm.arg(2))
                .map_err(EngineError::runtime)?;
        }
        3 => {
            let pos = check_number(vm, 2, "insert")? as usize;
            let len = t.borrow().len();
            // Shift the tail up
            let mut i = len;
            while i >= pos && i >= 1 {
                let v = t.borrow().raw_get(&Value::Number(i as f64));
                t.borrow_mut()
                    .raw_set(Value::Number((i + 1) as f64), v)
                    .map_err(EngineError::runtime)?;
                i -= 1;
            }
            t.borrow_mut()
                .raw_set(Value::Number(pos as f64), vm.arg(3))
                .map_err(EngineError::runtime)?;
        }
        n => {
            return Err(EngineError::runtime(format!(
                "wrong number of arguments to 'insert' (got {n})"
            )))
        }
    }
    Ok(0)
}

fn table_remove(vm: &mut Vm) -> EngineResult<usize> {
    let t = check_table(vm, 1, "remove")?;
    let len = t.borrow().len();
    if len == 0 {
        vm.push_nil();
        return Ok(1);
    }
    let pos = match vm.arg(2) {
        Value::Nil => len,
        v => v.as_number().ok_or_else(|| {
            EngineError::runtime("bad argument #2 to 'remove' (number expected)")
        })? as usize,
    };
    let removed = t.borrow().raw_get(&Value::Number(pos as f64));
    for i in pos..len {
        let v = t.borrow().raw_get(&Value::Number((i + 1) as f64));
        t.borrow_mut()
            .raw_set(Value::Number(i as f64), v)
            .map_err(EngineError::runtime)?;
    }
    t.borrow_mut()
        .raw_set(Value::Number(len as f64), Value::Nil)
        .map_err(EngineError::runtime)?;
    vm.push(removed);
    Ok(1)
}

fn table_concat(vm: &mut Vm) -> EngineResult<usize> {
    let t = check_table(vm, 1, "concat")?;
    let sep = match vm.arg(2) {
        Value::Nil => String::new(),
        Value::Str(s) => s.to_string(),
        Value::Number(n) => number_to_string(n),
        other => {
            return Err(EngineError::runtime(format!(
                "bad argument #2 to 'concat' (string expected, got {})",
                other.type_name()
            )))
        }
    };
    let len = t.borrow().len();
    let mut parts = Vec::with_capacity(len);
    for i in 1..=len {
        match t.borrow().raw_get(&Value::Number(i as f64)) {
            Value::Str(s) => parts.push(s.to_string()),
            Value::Number(n) => parts.push(number_to_string(n)),
            other => {
                return Err(EngineError::runtime(format!(
                    "invalid value (at index {i}) in table for 'concat' ({})",
                    other.type_name()
                )))
            }
        }
    }
    vm.push_string(&parts.join(&sep));
    Ok(1)
}

// ============================================================================
// os / io
// ============================================================================

fn open_os(vm: &mut Vm) {
    lib_table(vm, "os", &[("time", os_time), ("clock", os_clock)]);
}

fn os_time(vm: &mut Vm) -> EngineResult<usize> {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as f64)
        .unwrap_or(0.0);
    vm.push_number(secs);
    Ok(1)
}

fn os_clock(vm: &mut Vm) -> EngineResult<usize> {
    let secs = vm.start.elapsed().as_secs_f64();
    vm.push_number(secs);
    Ok(1)
}

fn open_io(vm: &mut Vm) {
    lib_table(vm, "io", &[("write", io_write), ("read", io_read)]);
}

fn io_write(vm: &mut Vm) -> EngineResult<usize> {
    let mut out = std::io::stdout().lock();
    for i in 1..=vm.nargs() {
        match vm.arg(i) {
            Value::Str(s) => {
                let _ = out.write_all(s.as_bytes());
            }
            Value::Number(n) => {
                let _ = out.write_all(number_to_string(n).as_bytes());
            }
            other => {
                return Err(EngineError::runtime(format!(
                    "bad argument #{i} to 'write' (string expected, got {})",
                    other.type_name()
                )))
            }
        }
    }
    Ok(0)
}

fn io_read(vm: &mut Vm) -> EngineResult<usize> {
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => vm.push_nil(),
        Ok(_) => {
            let trimmed = line.trim_end_matches(['\n', '\r']);
            vm.push_string(trimmed);
        }
        Err(_) => vm.push_nil(),
    }
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> Vm {
        let mut vm = Vm::new(LibSet::ALL);
        vm.do_str(src, "test").unwrap();
        vm
    }

    #[test]
    fn test_libset_flags() {
        let libs = LibSet::BASE | LibSet::MATH;
        assert!(libs.contains(LibSet::BASE));
        assert!(libs.contains(LibSet::MATH));
        assert!(!libs.contains(LibSet::STRING));
        assert!(LibSet::ALL.contains(libs));
        assert!(LibSet::NONE.is_empty());
        assert_eq!(LibSet::from_bits(LibSet::ALL.bits()), LibSet::ALL);
    }

    #[test]
    fn test_none_opens_nothing() {
        let mut vm = Vm::new(LibSet::NONE);
        assert_eq!(vm.get_global("print"), crate::value::TypeTag::Nil);
    }

    #[test]
    fn test_type_and_tostring() {
        let vm = run("return type(1), tostring(42), type(nil)");
        assert_eq!(vm.to_str(-3).as_deref(), Some("number"));
        assert_eq!(vm.to_str(-2).as_deref(), Some("42"));
        assert_eq!(vm.to_str(-1).as_deref(), Some("nil"));
    }

    #[test]
    fn test_tonumber() {
        let vm = run("return tonumber('12.5'), tonumber('0x10'), tonumber('bad')");
        assert_eq!(vm.to_number(-3), Some(12.5));
        assert_eq!(vm.to_number(-2), Some(16.0));
        assert!(vm.value(-1).map(|v| v.is_nil()).unwrap_or(false));
    }

    #[test]
    fn test_script_level_pcall() {
        let vm = run("local ok, err = pcall(function() error('inner') end)\nreturn ok, err");
        assert!(!vm.to_boolean(-2));
        assert_eq!(vm.to_str(-1).as_deref(), Some("inner"));
    }

    #[test]
    fn test_assert_passthrough_and_failure() {
        let vm = run("return assert(1, 'unused')");
        assert_eq!(vm.to_number(-2), Some(1.0));

        let mut vm = Vm::new(LibSet::BASE);
        let err = vm.do_str("assert(false)", "t").unwrap_err();
        match err {
            EngineError::Runtime(v) => assert_eq!(v.to_string(), "assertion failed!"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_string_library() {
        let vm = run("return string.sub('hello', 2, 4), string.upper('ab'), string.rep('x', 3)");
        assert_eq!(vm.to_str(-3).as_deref(), Some("ell"));
        assert_eq!(vm.to_str(-2).as_deref(), Some("AB"));
        assert_eq!(vm.to_str(-1).as_deref(), Some("xxx"));
    }

    #[test]
    fn test_string_sub_negative_indices() {
        let vm = run("return string.sub('hello', -3)");
        assert_eq!(vm.to_str(-1).as_deref(), Some("llo"));
    }

    #[test]
    fn test_string_format() {
        let vm = run("return string.format('%s=%d (%x) %f%%', 'n', 10, 255, 0.5)");
        assert_eq!(vm.to_str(-1).as_deref(), Some("n=10 (ff) 0.500000%"));
    }

    #[test]
    fn test_math_library() {
        let vm = run("return math.abs(-3), math.floor(2.7), math.max(1, 9, 4)");
        assert_eq!(vm.to_number(-3), Some(3.0));
        assert_eq!(vm.to_number(-2), Some(2.0));
        assert_eq!(vm.to_number(-1), Some(9.0));
    }

    #[test]
    fn test_table_library() {
        let vm = run(
            "local t = {1, 2, 4}\n\
             table.insert(t, 3, 3)\n\
             local removed = table.remove(t)\n\
             return table.concat(t, ','), removed",
        );
        assert_eq!(vm.to_str(-2).as_deref(), Some("1,2,3"));
        assert_eq!(vm.to_number(-1), Some(4.0));
    }

    #[test]
    fn test_raw_accessors() {
        let vm = run("local t = {a = 1}\nreturn rawget(t, 'a'), rawlen('abc'), rawequal(t, t)");
        assert_eq!(vm.to_number(-3), Some(1.0));
        assert_eq!(vm.to_number(-2), Some(3.0));
        assert!(vm.to_boolean(-1));
    }

    #[test]
    fn test_placeholder_libraries_exist() {
        let vm = run("return type(coroutine), type(utf8)");
        assert_eq!(vm.to_str(-2).as_deref(), Some("table"));
        assert_eq!(vm.to_str(-1).as_deref(), Some("table"));
    }
}
