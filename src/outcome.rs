use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;

use crate::addr::NodeId;

/// Where a fault was raised: the cell's own update function, or a
/// handle parent that reported it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Source {
	Own,
	Cell(NodeId),
}

/// An error shared across every error map it propagates into.
pub type Fault = Arc<dyn Error + Send + Sync>;

/// Standing faults keyed by the parent that reported them.
pub type ErrorMap = BTreeMap<Source, Fault>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
	NeedsUpdate,
	Updating,
	UpToDate,
	Oblivious,
	Error,
}

impl Status {
	/// A terminal status ends a round of demand: the cell holds
	/// either a value or a fault.
	pub fn is_terminal(self) -> bool {
		matches!(self, Status::UpToDate | Status::Oblivious | Status::Error)
	}
}

#[derive(Clone)]
pub enum Outcome<T> {
	/// No value yet.
	Pending,
	/// The update function's last output.
	Computed(T),
	/// The currently-known faults, by reporting parent.
	Faulted(ErrorMap),
}

impl<T> Outcome<T> {
	pub fn computed(&self) -> Option<&T> {
		match self {
			Outcome::Computed(value) => Some(value),
			_ => None,
		}
	}

	pub fn faults(&self) -> Option<&ErrorMap> {
		match self {
			Outcome::Faulted(faults) => Some(faults),
			_ => None,
		}
	}

	pub fn is_pending(&self) -> bool {
		matches!(self, Outcome::Pending)
	}
}

impl<T> Debug for Outcome<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Outcome::Pending => write!(f, "Pending"),
			Outcome::Computed(value) => f.debug_tuple("Computed").field(value).finish(),
			Outcome::Faulted(faults) => {
				let mut map = f.debug_map();
				for (source, fault) in faults {
					map.entry(source, &format_args!("{}", fault));
				}
				map.finish()
			}
		}
	}
}

/// What external readers observe: a self-consistent pair of status
/// and value, swapped in whole. `Pending` goes with `NeedsUpdate`
/// and `Updating`, `Computed` with `UpToDate` and `Oblivious`,
/// `Faulted` with `Error`.
#[derive(Clone)]
pub struct Snapshot<T> {
	pub status: Status,
	pub value: Outcome<T>,
}

impl<T> Debug for Snapshot<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Snapshot")
			.field("status", &self.status)
			.field("value", &self.value)
			.finish()
	}
}
