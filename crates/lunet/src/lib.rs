//! Lunet embedding bridge.
//!
//! This crate lets Rust applications host Lunet script environments:
//! create states, exchange values with scripts, expose host objects and
//! methods without hand-written bindings, and let scripts call back into
//! host code.
//!
//! The bridge has four load-bearing pieces:
//!
//! - **Value marshalling**: bidirectional conversion between foreign stack
//!   slots and [`HostValue`]s, with typed ergonomics via [`ToLunet`] /
//!   [`FromLunet`].
//! - **Identity registry**: the [`IdentityRegistry`] maps opaque 64-bit
//!   [`Handle`]s to host objects, the only way a host object crosses into
//!   foreign memory.
//! - **Trampolines**: [`MethodDescriptor`]s synthesize foreign-callable
//!   entry points around host methods, translating every host failure into
//!   a foreign error at the boundary.
//! - **Type bindings**: [`TypeBuilder`] declares a host type's exposed
//!   members; the binder builds the `__index`/`__newindex` metatable
//!   dispatch lazily per state.
//!
//! # Example
//!
//! ```ignore
//! use lunet::{State, TypeBuilder, ParamKind, HostValue};
//!
//! struct Counter { value: parking_lot::Mutex<f64> }
//!
//! let mut state = State::new();
//! state.register_type(
//!     TypeBuilder::<Counter>::new("Counter")
//!         .method("add", &[ParamKind::Number], |c: &Counter, args| {
//!             let n = match args[0] { HostValue::Number(n) => n, _ => 0.0 };
//!             *c.value.lock() += n;
//!             Ok(None)
//!         })
//!         .getter("value", |c: &Counter| Ok(HostValue::Number(*c.value.lock())))
//!         .build(),
//! )?;
//! let counter = state.new_userdata(Counter { value: Default::default() })?;
//! state.set_global("c")?;
//! state.do_string("c:add(5) v = c.value")?;
//! ```

pub mod binding;
pub mod error;
pub mod function;
mod marshal;
pub mod registry;
pub mod state;
pub mod table;
pub mod trampoline;
pub mod value;

pub use binding::{error_on_index_not_found, set_error_on_index_not_found, TypeBuilder, TypeDescriptor};
pub use error::{Error, Result};
pub use function::FunctionView;
pub use registry::{Handle, IdentityRegistry};
pub use state::State;
pub use table::TableView;
pub use trampoline::{MemberKind, MethodDescriptor, ParamKind};
pub use value::{FromLunet, HostKey, HostMap, HostObject, HostValue, ToLunet};

// Engine surface embedders routinely need
pub use lunet_engine::{GcOp, LibSet, TypeTag, MULTRET};
