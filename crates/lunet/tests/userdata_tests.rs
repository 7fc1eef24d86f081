//! Host objects in scripts: identity, metatable dispatch, trampolines.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use lunet::{
    set_error_on_index_not_found, Error, HostObject, HostValue, LibSet, ParamKind, State,
    TypeBuilder, TypeTag,
};

/// Serializes tests that depend on the process-global strict flag.
static STRICT_FLAG: Mutex<()> = Mutex::new(());

struct SimpleUserdata {
    string_value: String,
}

#[test]
fn can_push_light_userdata() {
    let mut state = State::with_libs(LibSet::BASE);

    let data: HostObject = Arc::new(SimpleUserdata {
        string_value: "Hello".to_string(),
    });
    state.push_light_userdata(&data).unwrap();
    state.set_global("data").unwrap();

    let checked = Rc::new(Cell::new(false));
    let flag = Rc::clone(&checked);
    state
        .set_global_function("Test", move |st| {
            let d = st.to_userdata::<SimpleUserdata>(-1)?;
            assert_eq!(d.string_value, "Hello");
            flag.set(true);
            Ok(0)
        })
        .unwrap();

    state.do_string("Test(data)").unwrap();
    assert!(checked.get());
}

#[test]
fn light_userdata_registration_is_idempotent() {
    let mut state = State::with_libs(LibSet::NONE);
    let data: HostObject = Arc::new(SimpleUserdata {
        string_value: String::new(),
    });
    let h1 = state.push_light_userdata(&data).unwrap();
    let h2 = state.push_light_userdata(&data).unwrap();
    assert_eq!(h1, h2);
    state.pop(2);
}

#[derive(Default)]
struct ComplexUserdata {
    something_called: AtomicBool,
    val_a: Mutex<Option<String>>,
}

fn complex_descriptor() -> lunet::TypeDescriptor {
    TypeBuilder::<ComplexUserdata>::new("ComplexUserdata")
        .method("SomeFunc", &[ParamKind::Number], |cu, args| {
            cu.something_called.store(true, Ordering::SeqCst);
            let k = match args[0] {
                HostValue::Number(n) => n,
                _ => return Err("number expected".to_string()),
            };
            Ok(Some(HostValue::Number(k + 1.0)))
        })
        .method("SomeOtherFunc", &[ParamKind::Boolean], |cu, args| {
            cu.something_called.store(true, Ordering::SeqCst);
            let i = matches!(args[0], HostValue::Bool(true));
            Ok(Some(HostValue::Bool(!i)))
        })
        .getter("ValA", |cu| {
            Ok(match cu.val_a.lock().clone() {
                Some(s) => HostValue::Str(s),
                None => HostValue::Nil,
            })
        })
        .setter("ValA", |cu, value| {
            let s = match value {
                HostValue::Str(s) => Some(s),
                HostValue::Nil => None,
                other => return Err(format!("string expected, got {}", other.kind())),
            };
            *cu.val_a.lock() = s;
            Ok(())
        })
        .build()
}

#[test]
fn unbound_type_has_no_methods() {
    let mut state = State::with_libs(LibSet::BASE);
    // No descriptor registered: the binding is empty
    let cu = state.new_userdata(ComplexUserdata::default()).unwrap();
    assert_eq!(state.top(), 1);
    state.set_global("c").unwrap();

    assert!(state.do_string("return c:SomeFunc(5.0)").is_err());
    assert!(!cu.something_called.load(Ordering::SeqCst));
}

#[test]
fn can_invoke_bound_method() {
    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(complex_descriptor()).unwrap();

    let cu = state.new_userdata(ComplexUserdata::default()).unwrap();
    assert_eq!(state.top(), 1);
    state.set_global("c").unwrap();

    state.do_string("return c:SomeFunc(5.0)").unwrap();
    assert_eq!(state.top(), 1);
    assert!(cu.something_called.load(Ordering::SeqCst));
    assert_eq!(state.to_number(-1).unwrap(), 6.0);
}

#[test]
fn can_read_bound_property() {
    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(complex_descriptor()).unwrap();

    let cu = state.new_userdata(ComplexUserdata::default()).unwrap();
    *cu.val_a.lock() = Some("hello".to_string());
    state.set_global("c").unwrap();

    state.do_string("return c.ValA").unwrap();
    assert_eq!(state.to_string_value(-1).unwrap(), "hello");
}

#[test]
fn can_write_bound_property() {
    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(complex_descriptor()).unwrap();

    let cu = state.new_userdata(ComplexUserdata::default()).unwrap();
    state.set_global("c").unwrap();

    state.do_string("c.ValA = \"Set by script\"").unwrap();
    assert_eq!(cu.val_a.lock().clone(), Some("Set by script".to_string()));
}

#[test]
fn unexposed_member_reads_nil_by_default() {
    let _guard = STRICT_FLAG.lock();
    set_error_on_index_not_found(false);

    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(complex_descriptor()).unwrap();
    state.new_userdata(ComplexUserdata::default()).unwrap();
    state.set_global("c").unwrap();

    state.do_string("return c.SomethingCalled").unwrap();
    assert_eq!(state.type_of(-1), TypeTag::Nil);
}

#[test]
fn unexposed_member_read_errors_in_strict_mode() {
    let _guard = STRICT_FLAG.lock();
    set_error_on_index_not_found(true);

    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(complex_descriptor()).unwrap();
    state.new_userdata(ComplexUserdata::default()).unwrap();
    state.set_global("c").unwrap();

    let err = state.do_string("return c.SomethingCalled").unwrap_err();
    set_error_on_index_not_found(false);
    match err {
        Error::Runtime(message) => assert_eq!(
            message,
            "attempt to index SomethingCalled on a userdata value"
        ),
        other => panic!("unexpected {other:?}"),
    }
}

struct Exposed {
    q_store: Mutex<f64>,
    m_calls: Mutex<u32>,
}

fn exposed_descriptor() -> lunet::TypeDescriptor {
    TypeBuilder::<Exposed>::new("Exposed")
        .method("m", &[], |obj, _args| {
            *obj.m_calls.lock() += 1;
            Ok(None)
        })
        .getter("p", |_obj| Ok(HostValue::Number(42.0)))
        .setter("q", |obj, value| match value {
            HostValue::Number(n) => {
                *obj.q_store.lock() = n;
                Ok(())
            }
            other => Err(format!("number expected, got {}", other.kind())),
        })
        .build()
}

/// The full dispatch matrix: callable method, read-only property,
/// write-only property, and both rejection directions.
#[test]
fn dispatch_correctness_matrix() {
    let _guard = STRICT_FLAG.lock();
    set_error_on_index_not_found(true);

    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(exposed_descriptor()).unwrap();
    let obj = state
        .new_userdata(Exposed {
            q_store: Mutex::new(0.0),
            m_calls: Mutex::new(0),
        })
        .unwrap();
    state.set_global("obj").unwrap();

    // Method invocation
    state.do_string("obj:m()").unwrap();
    assert_eq!(*obj.m_calls.lock(), 1);

    // A method is a value until invoked
    state.do_string("return obj.m").unwrap();
    assert_eq!(state.type_of(-1), TypeTag::Function);
    state.pop(1);

    // Read-only property read
    let p: f64 = state.do_string_as("return obj.p").unwrap();
    assert_eq!(p, 42.0);

    // Read-only property write is rejected
    let err = state.do_string("obj.p = 5").unwrap_err();
    match err {
        Error::Runtime(message) => {
            assert_eq!(message, "attempt to index p on a userdata value")
        }
        other => panic!("unexpected {other:?}"),
    }

    // Write-only property write is observable through the side channel
    state.do_string("obj.q = 5").unwrap();
    assert_eq!(*obj.q_store.lock(), 5.0);

    // Write-only property read is rejected
    let err = state.do_string("return obj.q").unwrap_err();
    set_error_on_index_not_found(false);
    match err {
        Error::Runtime(message) => {
            assert_eq!(message, "attempt to index q on a userdata value")
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn assignment_to_unexposed_member_always_errors() {
    let _guard = STRICT_FLAG.lock();
    set_error_on_index_not_found(false);

    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(exposed_descriptor()).unwrap();
    state
        .new_userdata(Exposed {
            q_store: Mutex::new(0.0),
            m_calls: Mutex::new(0),
        })
        .unwrap();
    state.set_global("obj").unwrap();

    // Independent of the strict flag
    assert!(state.do_string("obj.nothere = 1").is_err());
}

#[test]
fn trampoline_argument_mismatch_balances_stack() {
    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(complex_descriptor()).unwrap();
    state.new_userdata(ComplexUserdata::default()).unwrap();
    state.set_global("c").unwrap();
    assert_eq!(state.top(), 0);

    let err = state.do_string("return c:SomeFunc('oops')").unwrap_err();
    match err {
        Error::Runtime(message) => {
            assert_eq!(message, "bad argument #1: number expected, got string")
        }
        other => panic!("unexpected {other:?}"),
    }
    // Only the error value remains after the protected call
    assert_eq!(state.top(), 1);
}

#[test]
fn host_panic_is_translated_at_the_boundary() {
    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(
        TypeBuilder::<SimpleUserdata>::new("Panicky")
            .method("boom", &[], |_obj, _args| panic!("deliberate test panic"))
            .build(),
    )
    .unwrap();
    state
        .new_userdata(SimpleUserdata {
            string_value: String::new(),
        })
        .unwrap();
    state.set_global("p").unwrap();

    let err = state.do_string("p:boom()").unwrap_err();
    match err {
        Error::Runtime(message) => {
            assert!(message.contains("panicked"), "got: {message}");
            assert!(message.contains("deliberate test panic"), "got: {message}");
        }
        other => panic!("unexpected {other:?}"),
    }
    // The VM survives the translated panic
    let n: f64 = state.do_string_as("return 2 + 2").unwrap();
    assert_eq!(n, 4.0);
}

#[test]
fn wrong_receiver_type_is_a_type_mismatch() {
    let mut state = State::with_libs(LibSet::BASE);
    state.register_type(complex_descriptor()).unwrap();
    state.register_type(exposed_descriptor()).unwrap();

    state.new_userdata(ComplexUserdata::default()).unwrap();
    state.set_global("c").unwrap();
    state
        .new_userdata(Exposed {
            q_store: Mutex::new(0.0),
            m_calls: Mutex::new(0),
        })
        .unwrap();
    state.set_global("obj").unwrap();

    // Steal a method from one type and call it with the other's receiver
    let err = state.do_string("local f = obj.m\nf(c)").unwrap_err();
    match err {
        Error::Runtime(message) => {
            assert!(message.contains("type mismatch"), "got: {message}")
        }
        other => panic!("unexpected {other:?}"),
    }
}

struct Vector {
    x: f64,
    y: f64,
    z: f64,
}

#[test]
fn can_execute_vector_script_with_metamethod() {
    let mut state = State::with_libs(LibSet::BASE);
    state
        .register_type(
            TypeBuilder::<Vector>::new("Vector")
                .getter("x", |v| Ok(HostValue::Number(v.x)))
                .getter("y", |v| Ok(HostValue::Number(v.y)))
                .getter("z", |v| Ok(HostValue::Number(v.z)))
                .metamethod("__mul", &[ParamKind::Any], |lhs, args| {
                    let rhs = args[0]
                        .as_object::<Vector>()
                        .ok_or_else(|| "vector expected".to_string())?;
                    Ok(Some(HostValue::Number(
                        lhs.x * rhs.x + lhs.y * rhs.y + lhs.z * rhs.z,
                    )))
                })
                .build(),
        )
        .unwrap();

    state
        .set_global_function("vector3", |st| {
            let (x, y, z) = (st.to_number(1)?, st.to_number(2)?, st.to_number(3)?);
            st.new_userdata(Vector { x, y, z })?;
            Ok(1)
        })
        .unwrap();

    let dot: f64 = state
        .do_string_as(
            "local a = vector3(1, 2, 3)\n\
             local b = vector3(4, 5, 6)\n\
             return a * b",
        )
        .unwrap();
    assert_eq!(dot, 32.0);
}

#[test]
fn userdata_cell_with_unissued_handle_reads_nil() {
    let mut state = State::with_libs(LibSet::NONE);
    state.vm_mut().push_userdata(0xDEAD_BEEF);
    let v = state.pop_host().unwrap();
    assert!(v.is_nil());

    state.push_light_handle(lunet::Handle::from_raw(0xFEED));
    let v = state.pop_host().unwrap();
    assert!(v.is_nil());
}
