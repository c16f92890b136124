use thiserror::Error;

/// What a cell's update function returns on failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the engine itself, as opposed to faults coming
/// out of user update functions.
#[derive(Debug, Error)]
pub enum CellError {
	/// Rejected before entering the state machine: `set` is only
	/// valid on a cell without handle parents.
	#[error("cell `{cell}` computes from its parents and cannot be set")]
	Dependent {
		/// Name of the cell the write was aimed at.
		cell: &'static str,
	},

	/// The synthetic fault injected by `force_error`.
	#[error("error forced from outside")]
	Forced,

	/// A source cell was demanded while holding no value.
	#[error("source cell demanded before any value was set")]
	Undefined,

	/// An update function panicked instead of returning an error.
	#[error("update function panicked: {reason}")]
	Panicked {
		/// The panic payload, when it was a string.
		reason: String,
	},
}
