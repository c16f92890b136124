mod addr;
mod cell;
mod dispatch;
mod error;
mod evaluate;
mod handler;
mod hashed;
mod message;
mod outcome;
mod var;

use std::sync::Weak;

pub use addr::NodeId;
pub use cell::{Cell, CellFn, Parent};
pub use error::{BoxError, CellError};
pub use evaluate::{evaluate, force_error, force_needs_update, update};
pub use outcome::{ErrorMap, Fault, Outcome, Snapshot, Source, Status};
pub use var::Var;

/// Anything a cell can depend on besides another cell: an observable
/// reference with a current value and a way to hear about changes.
/// A handle has no status; its value is always considered current.
pub trait Handle<T>: Send + Sync + 'static {
	/// Stable identity, used to key recorded parent values.
	fn id(&self) -> NodeId;

	/// Read the current concrete value.
	fn current(&self) -> T;

	/// Notify this handle that `watch` started to listen.
	fn watch(&self, watch: Weak<dyn Watch<T>>);

	/// Notify this handle that `watch` stopped to listen.
	fn unwatch(&self, watch: &Weak<dyn Watch<T>>);
}

/// The listening side of the handle protocol.
pub trait Watch<T>: Send + Sync + 'static {
	/// Called with the new value on each distinct change.
	fn changed(&self, value: &T);
}
