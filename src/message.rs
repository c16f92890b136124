use std::fmt::Debug;

use crate::addr::NodeId;
use crate::outcome::Fault;

/// The closed set of events a cell reacts to. Every state transition
/// goes through exactly one of these, applied in arrival order by the
/// cell's mailbox pump.
#[derive(Clone)]
pub(crate) enum Message<T> {
	/// Demand: become up to date.
	Update,
	/// A handle parent reported a new value.
	ParentComputed(NodeId, T),
	/// A handle parent lost its value.
	ParentNeedsUpdate(NodeId),
	/// A handle parent entered the error state.
	ParentError(NodeId, Fault),
	/// A handle parent left the error state.
	ParentRecovered(NodeId),
	/// External write. Only valid on a cell without handle parents;
	/// checked at the API boundary before it is enqueued.
	Set(T),
	ForceNeedsUpdate,
	ForceError,
}

impl<T> Debug for Message<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Message::Update => write!(f, "Update"),
			Message::ParentComputed(parent, _) => write!(f, "ParentComputed({parent:?})"),
			Message::ParentNeedsUpdate(parent) => write!(f, "ParentNeedsUpdate({parent:?})"),
			Message::ParentError(parent, fault) => {
				write!(f, "ParentError({parent:?}, {fault})")
			}
			Message::ParentRecovered(parent) => write!(f, "ParentRecovered({parent:?})"),
			Message::Set(_) => write!(f, "Set"),
			Message::ForceNeedsUpdate => write!(f, "ForceNeedsUpdate"),
			Message::ForceError => write!(f, "ForceError"),
		}
	}
}
