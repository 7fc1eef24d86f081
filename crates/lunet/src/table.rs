//! Borrowed views of foreign tables.
//!
//! Like `FunctionView`, a `TableView` is a stack-relative borrow: it holds
//! only the slot index and re-checks the slot type before every operation
//! (the table guard), since further stack mutation can invalidate it.

use lunet_engine::TypeTag;

use crate::error::{Error, Result};
use crate::marshal;
use crate::state::State;
use crate::value::{FromLunet, HostMap, HostValue, ToLunet};

/// Non-owning view of a table at a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableView {
    index: i32,
}

impl TableView {
    /// View the table at `idx`, checking the slot type.
    pub fn at_checked(st: &State, idx: i32) -> Result<TableView> {
        let tag = st.type_of(idx);
        if tag != TypeTag::Table {
            return Err(Error::TypeExpected {
                found: tag,
                expected: TypeTag::Table,
            });
        }
        Ok(TableView {
            index: st.absolute(idx)?,
        })
    }

    /// View the table on top of the stack.
    pub fn from_top(st: &State) -> Result<TableView> {
        TableView::at_checked(st, -1)
    }

    /// The absolute stack slot this view denotes.
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Confirm the slot still holds a table.
    fn guard(&self, st: &State) -> Result<()> {
        let tag = st.type_of(self.index);
        if tag != TypeTag::Table {
            return Err(Error::TypeExpected {
                found: tag,
                expected: TypeTag::Table,
            });
        }
        Ok(())
    }

    /// Assign `t[key] = value`.
    pub fn set_field<T: ToLunet>(&self, st: &mut State, key: &str, value: T) -> Result<()> {
        self.guard(st)?;
        st.push(value)?;
        st.vm_mut().set_field(self.index, key).map_err(Into::into)
    }

    /// Assign a host function to `t[key]` (e.g. a metamethod slot).
    pub fn set_function<F>(&self, st: &mut State, key: &str, f: F) -> Result<()>
    where
        F: Fn(&mut State) -> crate::error::Result<usize> + 'static,
    {
        self.guard(st)?;
        st.push_function(f);
        st.vm_mut().set_field(self.index, key).map_err(Into::into)
    }

    /// Read `t[key]` as a host value.
    pub fn get_field(&self, st: &mut State, key: &str) -> Result<HostValue> {
        self.guard(st)?;
        st.vm_mut().get_field(self.index, key)?;
        st.pop_host()
    }

    /// Read `t[key]` as a typed value.
    pub fn get_field_as<T: FromLunet>(&self, st: &mut State, key: &str) -> Result<T> {
        T::from_lunet(self.get_field(st, key)?)
    }

    /// Read `t[i]` (1-based) as a host value.
    pub fn get_index(&self, st: &mut State, i: i64) -> Result<HostValue> {
        self.guard(st)?;
        st.push_integer(i);
        st.vm_mut().get_table(self.index)?;
        st.pop_host()
    }

    /// Assign `t[i] = value` (1-based).
    pub fn set_index<T: ToLunet>(&self, st: &mut State, i: i64, value: T) -> Result<()> {
        self.guard(st)?;
        st.push_integer(i);
        st.push(value)?;
        st.vm_mut().set_table(self.index).map_err(Into::into)
    }

    /// Raw border length.
    pub fn raw_len(&self, st: &State) -> usize {
        st.raw_len(self.index)
    }

    /// Convert the whole table to a host container by full traversal.
    pub fn to_map(&self, st: &mut State) -> Result<HostMap> {
        self.guard(st)?;
        marshal::table_to_map(st, self.index)
    }
}
