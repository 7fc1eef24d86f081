//! Lunet engine: a small stack-based scripting VM.
//!
//! This crate is the "foreign runtime" side of the Lunet project: a lexer,
//! parser, and tree-walking interpreter for a Lua-like language, fronted by
//! the classic embedding stack protocol (signed-index value stack, globals,
//! protected calls, metatables, chunk load/dump, GC verbs).
//!
//! Embedders normally use the higher-level `lunet` crate, which layers value
//! marshalling, host-object identity, and method trampolines on top of this
//! engine.

pub mod ast;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod state;
pub mod stdlib;
pub mod table;
pub mod value;

pub use error::{EngineError, EngineResult};
pub use lexer::Span;
pub use state::{GcOp, Vm, DUMP_MAGIC, MULTRET};
pub use stdlib::LibSet;
pub use table::{Table, TableKey};
pub use value::{Function, NativeFn, TableRef, TypeTag, UserDataCell, UserDataRef, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_to_end_script() {
        let mut vm = Vm::new(LibSet::ALL);
        vm.do_str(
            "local function fib(n)\n\
               if n < 2 then return n end\n\
               return fib(n - 1) + fib(n - 2)\n\
             end\n\
             return fib(10)",
            "fib",
        )
        .unwrap();
        assert_eq!(vm.to_number(-1), Some(55.0));
    }

    #[test]
    fn test_closures_capture_environment() {
        let mut vm = Vm::new(LibSet::NONE);
        vm.do_str(
            "local count = 0\n\
             function tick() count = count + 1 return count end\n\
             tick() tick()\n\
             return tick()",
            "t",
        )
        .unwrap();
        assert_eq!(vm.to_number(-1), Some(3.0));
    }

    #[test]
    fn test_table_metatable_index_function() {
        let mut vm = Vm::new(LibSet::BASE);
        vm.do_str(
            "local mt = { __index = function(t, k) return 'missing:' .. k end }\n\
             local t = setmetatable({ present = 1 }, mt)\n\
             return t.present, t.absent",
            "t",
        )
        .unwrap();
        assert_eq!(vm.to_number(-2), Some(1.0));
        assert_eq!(vm.to_str(-1).as_deref(), Some("missing:absent"));
    }

    #[test]
    fn test_table_metatable_newindex_function() {
        let mut vm = Vm::new(LibSet::BASE);
        vm.do_str(
            "local log = {}\n\
             local t = setmetatable({}, { __newindex = function(t, k, v) rawset(log, k, v) end })\n\
             t.x = 7\n\
             return rawget(log, 'x'), rawget(t, 'x')",
            "t",
        )
        .unwrap();
        assert_eq!(vm.to_number(-2), Some(7.0));
        assert!(vm.value(-1).map(|v| v.is_nil()).unwrap_or(false));
    }

    #[test]
    fn test_numeric_for_and_while() {
        let mut vm = Vm::new(LibSet::NONE);
        vm.do_str(
            "local sum = 0\n\
             for i = 1, 10 do sum = sum + i end\n\
             local n = 0\n\
             while n < 3 do n = n + 1 end\n\
             return sum, n",
            "t",
        )
        .unwrap();
        assert_eq!(vm.to_number(-2), Some(55.0));
        assert_eq!(vm.to_number(-1), Some(3.0));
    }

    #[test]
    fn test_string_ops_in_script() {
        let mut vm = Vm::new(LibSet::NONE);
        vm.do_str("return 'a' .. 1 .. 'b', #'hello', 'x' == 'x'", "t")
            .unwrap();
        assert_eq!(vm.to_str(-3).as_deref(), Some("a1b"));
        assert_eq!(vm.to_number(-2), Some(5.0));
        assert!(vm.to_boolean(-1));
    }
}
