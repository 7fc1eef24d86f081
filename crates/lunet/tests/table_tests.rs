//! Table views, host-container marshalling, and named metatables.

use std::collections::HashMap;

use lunet::{Error, HostKey, HostValue, LibSet, State, TableView, TypeTag};

#[test]
fn can_create_table_with_fields() {
    let mut state = State::with_libs(LibSet::NONE);
    let table = state.create_table(0, 4).unwrap();
    table.set_field(&mut state, "a", 1.0).unwrap();
    table.set_field(&mut state, "b", 2.0).unwrap();
    table.set_field(&mut state, "c", 3.0).unwrap();
    table.set_field(&mut state, "d", 4.0).unwrap();
    assert_eq!(table.get_field_as::<f64>(&mut state, "c").unwrap(), 3.0);
}

#[test]
fn can_get_array_from_top() {
    let mut state = State::with_libs(LibSet::NONE);
    state.do_string("return { 1, 2, 3, 4 }").unwrap();
    let table = TableView::from_top(&state).unwrap();
    assert_eq!(table.raw_len(&state), 4);
}

#[test]
fn can_iterate_over_top() {
    let mut state = State::with_libs(LibSet::NONE);
    state
        .do_string("return { first = 'Hello', second = 'World' }")
        .unwrap();
    let table = TableView::from_top(&state).unwrap();
    let map = table.to_map(&mut state).unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(
        map.get(&HostKey::from("first")),
        Some(&HostValue::Str("Hello".into()))
    );
    assert_eq!(
        map.get(&HostKey::from("second")),
        Some(&HostValue::Str("World".into()))
    );
}

#[test]
fn can_set_field() {
    let mut state = State::with_libs(LibSet::NONE);
    state
        .do_string("return { first = 'Hello', second = 'World' }")
        .unwrap();
    let table = TableView::from_top(&state).unwrap();
    table.set_field(&mut state, "first", "Goodbye").unwrap();
    assert_eq!(
        table.get_field_as::<String>(&mut state, "first").unwrap(),
        "Goodbye"
    );
    assert_eq!(
        table.get_field_as::<String>(&mut state, "second").unwrap(),
        "World"
    );
}

#[test]
fn can_push_host_map() {
    let mut state = State::with_libs(LibSet::NONE);
    let mut table = HashMap::new();
    for (key, value) in [("A", 1.0), ("B", 2.0), ("C", 3.0), ("D", 4.0), ("E", 5.0)] {
        table.insert(key.to_string(), value);
    }
    state.set_global_value("g_test", table).unwrap();
    for (key, value) in [("A", 1.0), ("B", 2.0), ("C", 3.0), ("D", 4.0), ("E", 5.0)] {
        let got: f64 = state
            .do_string_as(&format!("return g_test.{key}"))
            .unwrap();
        assert_eq!(got, value);
    }
}

#[test]
fn can_push_nested_host_map() {
    let mut state = State::with_libs(LibSet::NONE);
    let inner: HashMap<String, f64> =
        [("1".to_string(), 1.0), ("2".to_string(), 2.0)].into();
    let mut outer: HashMap<String, HashMap<String, f64>> = HashMap::new();
    outer.insert("A".to_string(), inner.clone());
    outer.insert("B".to_string(), inner);
    state.set_global_value("g_test", outer).unwrap();

    for path in ["A", "B"] {
        for key in ["1", "2"] {
            let got: f64 = state
                .do_string_as(&format!("return g_test.{path}[\"{key}\"]"))
                .unwrap();
            assert_eq!(got, key.parse::<f64>().unwrap());
        }
    }
}

#[test]
fn can_get_whole_table() {
    let mut state = State::with_libs(LibSet::NONE);
    state
        .do_string("return { first = 'Hello', second = 'World' }")
        .unwrap();
    let map = TableView::from_top(&state)
        .unwrap()
        .to_map(&mut state)
        .unwrap();
    assert_eq!(
        map.get(&HostKey::from("first")),
        Some(&HostValue::Str("Hello".into()))
    );
}

#[test]
fn view_requires_a_table_on_top() {
    let mut state = State::with_libs(LibSet::NONE);
    state.push_string("Not a table");
    let err = TableView::from_top(&state).unwrap_err();
    match err {
        Error::TypeExpected { found, expected } => {
            assert_eq!(found, TypeTag::String);
            assert_eq!(expected, TypeTag::Table);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn can_view_below_the_top() {
    let mut state = State::with_libs(LibSet::NONE);
    let mut map = HashMap::new();
    map.insert("A".to_string(), 1.0);
    map.insert("B".to_string(), 2.0);
    state.push(map).unwrap();
    state.push_string("Not a table");

    let table = state.table_view(-2).unwrap();
    assert_eq!(table.get_field_as::<f64>(&mut state, "A").unwrap(), 1.0);
    assert_eq!(table.get_field_as::<f64>(&mut state, "B").unwrap(), 2.0);
}

#[test]
fn can_set_metatable_by_name() {
    let mut state = State::with_libs(LibSet::NONE);

    let (meta, existed) = state.new_metatable("MetaTest").unwrap();
    assert!(!existed);
    // Dot product via the multiplication metamethod
    meta.set_function(&mut state, "__mul", |st| {
        let lhs = st.table_view(1)?;
        let rhs = st.table_view(2)?;
        let mut dot = 0.0;
        for axis in ["x", "y", "z"] {
            dot += lhs.get_field_as::<f64>(st, axis)? * rhs.get_field_as::<f64>(st, axis)?;
        }
        st.push_number(dot);
        Ok(1)
    })
    .unwrap();
    state.pop(1);
    assert_eq!(state.top(), 0);

    for name in ["a", "b"] {
        let mut fields = HashMap::new();
        fields.insert("x".to_string(), 1.0);
        fields.insert("y".to_string(), 2.0);
        fields.insert("z".to_string(), 3.0);
        state.push(fields).unwrap();
        state.set_named_metatable("MetaTest").unwrap();
        state.set_global(name).unwrap();
        assert_eq!(state.top(), 0);
    }

    let result: f64 = state.do_string_as("return a * b").unwrap();
    assert_eq!(result, 14.0);

    // Second lookup reuses the existing metatable
    let (_, existed) = state.new_metatable("MetaTest").unwrap();
    assert!(existed);
}

#[test]
fn can_push_list_and_read_by_index() {
    let mut state = State::with_libs(LibSet::NONE);
    let items = vec!["a", "b", "c", "d"];
    state.push(items.clone()).unwrap();
    let table = TableView::from_top(&state).unwrap();

    assert_eq!(table.raw_len(&state), 4);
    for (i, expected) in items.iter().enumerate() {
        let got = table.get_index(&mut state, i as i64 + 1).unwrap();
        assert_eq!(got, HostValue::Str(expected.to_string()));
    }
}

#[test]
fn can_set_by_index() {
    let mut state = State::with_libs(LibSet::NONE);
    let table = state.create_table(4, 0).unwrap();
    for (i, value) in ["a", "b", "c", "d"].iter().enumerate() {
        table.set_index(&mut state, i as i64 + 1, *value).unwrap();
    }
    let map = table.to_map(&mut state).unwrap();
    assert_eq!(map.len(), 4);
    assert_eq!(map.get(&HostKey::Int(1)), Some(&HostValue::Str("a".into())));
    assert_eq!(map.get(&HostKey::Int(4)), Some(&HostValue::Str("d".into())));
}
