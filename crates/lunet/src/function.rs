//! Borrowed views of foreign functions.
//!
//! A `FunctionView` holds only a stack slot index; every operation takes the
//! state it belongs to. It is valid only while that slot keeps holding the
//! function, so it must never be stored past the call scope in which it was
//! obtained.

use lunet_engine::TypeTag;

use crate::error::{Error, Result};
use crate::state::State;
use crate::value::HostValue;

/// Non-owning view of a function at a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionView {
    index: i32,
}

impl FunctionView {
    pub(crate) fn at(index: i32) -> FunctionView {
        FunctionView { index }
    }

    /// View the function at `idx`, checking the slot type.
    pub fn at_checked(st: &State, idx: i32) -> Result<FunctionView> {
        let tag = st.type_of(idx);
        if tag != TypeTag::Function {
            return Err(Error::TypeExpected {
                found: tag,
                expected: TypeTag::Function,
            });
        }
        Ok(FunctionView::at(st.absolute(idx)?))
    }

    /// View the function on top of the stack.
    pub fn from_top(st: &State) -> Result<FunctionView> {
        FunctionView::at_checked(st, -1)
    }

    /// The absolute stack slot this view denotes.
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Whether the slot still holds a function.
    pub fn is_callable(&self, st: &State) -> bool {
        st.type_of(self.index) == TypeTag::Function
    }

    /// Unprotected invocation returning the first result. An error raised by
    /// the script escalates to a host panic, as at every unprotected call
    /// site.
    pub fn invoke(&self, st: &mut State, args: &[HostValue]) -> Result<HostValue> {
        self.push_call(st, args)?;
        st.call(args.len(), 1);
        st.pop_host()
    }

    /// Unprotected invocation collecting a fixed number of results (the
    /// tuple-return path).
    pub fn invoke_multi(
        &self,
        st: &mut State,
        args: &[HostValue],
        nresults: usize,
    ) -> Result<Vec<HostValue>> {
        self.push_call(st, args)?;
        st.call(args.len(), nresults as i32);
        let mut results = Vec::with_capacity(nresults);
        for _ in 0..nresults {
            results.push(st.pop_host()?);
        }
        results.reverse();
        Ok(results)
    }

    /// Unprotected invocation discarding results.
    pub fn invoke_void(&self, st: &mut State, args: &[HostValue]) -> Result<()> {
        self.push_call(st, args)?;
        st.call(args.len(), 0);
        Ok(())
    }

    /// Protected invocation returning the first result; a script error comes
    /// back as `Err(Runtime)` with the stack balanced.
    pub fn invoke_protected(&self, st: &mut State, args: &[HostValue]) -> Result<HostValue> {
        self.push_call(st, args)?;
        st.pcall(args.len(), 1, 0)?;
        st.pop_host()
    }

    fn push_call(&self, st: &mut State, args: &[HostValue]) -> Result<()> {
        let before = st.top() as i32;
        st.push_value(self.index)?;
        for arg in args {
            if let Err(e) = st.push_host(arg) {
                st.set_top(before);
                return Err(e);
            }
        }
        Ok(())
    }
}
