//! Bidirectional value marshalling between the foreign stack and host values.
//!
//! `to_host` reads one slot; `to_foreign` pushes exactly one slot. Table
//! conversion traverses the full table with the engine's `next` protocol and
//! recurses on keys and values; there is deliberately no cycle detection:
//! a self-referential table recurses until the call-depth guard trips.
//!
//! Callers own stack-depth bookkeeping across calls; each conversion is
//! internally balanced.

use lunet_engine::TypeTag;

use crate::error::{Error, Result};
use crate::function::FunctionView;
use crate::registry::Handle;
use crate::state::State;
use crate::value::{HostKey, HostMap, HostValue};

/// Convert the stack slot at `idx` into a host value.
pub(crate) fn to_host(st: &mut State, idx: i32) -> Result<HostValue> {
    let tag = st.type_of(idx);
    to_host_tagged(st, tag, idx)
}

/// Convert a slot whose type tag is already known.
pub(crate) fn to_host_tagged(st: &mut State, tag: TypeTag, idx: i32) -> Result<HostValue> {
    match tag {
        TypeTag::Nil => Ok(HostValue::Nil),
        TypeTag::Boolean => Ok(HostValue::Bool(st.to_boolean(idx))),
        TypeTag::Number => st.to_number(idx).map(HostValue::Number),
        TypeTag::String => st.to_string_value(idx).map(HostValue::Str),
        TypeTag::Table => table_to_map(st, idx).map(HostValue::Map),
        TypeTag::Function => {
            let abs = st.absolute(idx)?;
            Ok(HostValue::Function(FunctionView::at(abs)))
        }
        TypeTag::UserData | TypeTag::LightUserData => {
            let handle = st.vm().to_handle(idx).ok_or(Error::TypeExpected {
                found: tag,
                expected: TypeTag::UserData,
            })?;
            // Unknown handles degrade to nil: a stale handle is a reachable
            // condition, not a bug
            let resolved = st.ctx()?.registry.resolve(Handle::from_raw(handle));
            Ok(resolved.map(HostValue::Object).unwrap_or(HostValue::Nil))
        }
        TypeTag::Thread => Err(Error::UnsupportedType("thread")),
    }
}

/// Fully traverse the table at `idx` into a fresh host container.
pub(crate) fn table_to_map(st: &mut State, idx: i32) -> Result<HostMap> {
    let abs = st.absolute(idx)?;
    let mut out = HostMap::with_capacity(st.raw_len(abs));
    st.vm_mut().push_nil();
    loop {
        let advanced = match st.table_next(abs) {
            Ok(a) => a,
            Err(e) => return Err(e),
        };
        if !advanced {
            break;
        }
        // Stack: key at -2, value at -1. Balance before propagating errors.
        let entry = (|| -> Result<(HostKey, HostValue)> {
            let value = to_host(st, -1)?;
            let key_value = to_host(st, -2)?;
            let key = HostKey::from_value(&key_value)
                .ok_or(Error::UnsupportedType("non-scalar table key"))?;
            Ok((key, value))
        })();
        match entry {
            Ok((key, value)) => {
                st.pop(1); // drop the value, keep the key for the next step
                out.insert(key, value);
            }
            Err(e) => {
                st.pop(2);
                return Err(e);
            }
        }
    }
    Ok(out)
}

/// Push a host value onto the foreign stack, producing exactly one slot.
///
/// The convertible set is closed: functions and host objects have no
/// `to_foreign` mapping (objects enter foreign memory only through userdata
/// creation).
pub(crate) fn to_foreign(st: &mut State, value: &HostValue) -> Result<()> {
    let before = st.top() as i32;
    match to_foreign_inner(st, value) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Drop any partially built structure
            st.set_top(before);
            Err(e)
        }
    }
}

fn to_foreign_inner(st: &mut State, value: &HostValue) -> Result<()> {
    match value {
        HostValue::Nil => st.push_nil(),
        HostValue::Bool(b) => st.push_boolean(*b),
        HostValue::Number(n) => st.push_number(*n),
        HostValue::Str(s) => st.push_string(s),
        HostValue::Map(map) => {
            st.vm_mut().create_table(0, map.len());
            for (key, val) in map {
                to_foreign_inner(st, &key.to_value())?;
                to_foreign_inner(st, val)?;
                st.vm_mut().set_table(-3)?;
            }
        }
        HostValue::List(items) => {
            // 1-based consecutive integer keys, pre-sized
            st.vm_mut().create_table(items.len(), 0);
            for (i, val) in items.iter().enumerate() {
                st.push_integer(i as i64 + 1);
                to_foreign_inner(st, val)?;
                st.vm_mut().set_table(-3)?;
            }
        }
        HostValue::Function(_) => return Err(Error::UnsupportedType("function view")),
        HostValue::Object(_) => return Err(Error::UnsupportedType("host object")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lunet_engine::LibSet;
    use std::sync::Arc;

    use crate::registry::IdentityRegistry;

    fn state() -> State {
        State::with_registry(LibSet::NONE, Arc::new(IdentityRegistry::new()))
    }

    #[test]
    fn test_scalar_conversions_net_one_slot() {
        let mut st = state();
        for v in [
            HostValue::Nil,
            HostValue::Bool(true),
            HostValue::Number(1.5),
            HostValue::Str("s".into()),
        ] {
            let before = st.top();
            st.push_host(&v).unwrap();
            assert_eq!(st.top(), before + 1);
            let back = st.pop_host().unwrap();
            assert_eq!(back, v);
            assert_eq!(st.top(), before);
        }
    }

    #[test]
    fn test_map_roundtrip() {
        let mut st = state();
        let mut map = HostMap::new();
        map.insert("a".into(), HostValue::Number(1.0));
        map.insert("b".into(), HostValue::Str("two".into()));
        map.insert(HostKey::Int(3), HostValue::Bool(false));
        st.push_host(&HostValue::Map(map.clone())).unwrap();
        let back = st.pop_host().unwrap();
        assert_eq!(back, HostValue::Map(map));
    }

    #[test]
    fn test_list_pushes_one_based_array() {
        let mut st = state();
        let list = HostValue::List(vec![
            HostValue::Number(10.0),
            HostValue::Number(20.0),
            HostValue::Number(30.0),
        ]);
        st.push_host(&list).unwrap();
        assert_eq!(st.raw_len(-1), 3);
        // Lists read back as maps keyed 1..=n
        let back = st.pop_host().unwrap();
        let HostValue::Map(m) = back else {
            panic!("expected a map");
        };
        assert_eq!(m.get(&HostKey::Int(1)), Some(&HostValue::Number(10.0)));
        assert_eq!(m.get(&HostKey::Int(3)), Some(&HostValue::Number(30.0)));
    }

    #[test]
    fn test_unsupported_push_is_closed_set() {
        let mut st = state();
        let obj: crate::value::HostObject = Arc::new(1u8);
        let before = st.top();
        let err = st.push_host(&HostValue::Object(obj)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType(_)));
        assert_eq!(st.top(), before);
    }

    #[test]
    fn test_failed_map_push_balances_stack() {
        let mut st = state();
        let mut map = HostMap::new();
        map.insert(
            "bad".into(),
            HostValue::Object(Arc::new(0u8) as crate::value::HostObject),
        );
        let before = st.top();
        assert!(st.push_host(&HostValue::Map(map)).is_err());
        assert_eq!(st.top(), before);
    }

    #[test]
    fn test_unknown_handle_reads_as_nil() {
        let mut st = state();
        st.push_light_handle(Handle::from_raw(424242));
        let v = st.pop_host().unwrap();
        assert!(v.is_nil());
    }

    #[test]
    fn test_function_slot_becomes_view() {
        let mut st = state();
        st.load_string("return 1").unwrap();
        let v = st.to_host(-1).unwrap();
        match v {
            HostValue::Function(view) => assert_eq!(view.index(), st.top() as i32),
            other => panic!("expected a function view, got {other:?}"),
        }
    }

    #[test]
    fn test_string_copy_is_detached() {
        let mut st = state();
        st.push_string("original");
        let copied = st.pop_host().unwrap();
        // Mutating the foreign side afterwards cannot affect the copy
        st.push_string("changed");
        st.pop(1);
        assert_eq!(copied, HostValue::Str("original".into()));
    }
}
