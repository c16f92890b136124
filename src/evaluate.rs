use futures::future::join_all;

use crate::cell::Cell;
use crate::outcome::Outcome;

/// Demand every cell in `cells` and wait until each reaches a
/// terminal status, then return their values in argument order.
///
/// A faulted branch completes the wait like any other; the caller
/// gets its error map rather than an error. Dropping the returned
/// future abandons the wait; the dead observers are swept when the
/// cells next settle.
pub async fn evaluate<T>(cells: &[&Cell<T>]) -> Vec<Outcome<T>>
where
	T: Clone + Send + Sync + 'static,
{
	let mut settled = Vec::with_capacity(cells.len());
	for cell in cells {
		// cells already terminal are not waited on
		if let Some(receiver) = cell.observe_settled() {
			settled.push(receiver);
		}
	}

	for cell in cells {
		cell.update();
	}

	// a closed channel means the cell was dropped mid-wait; treat
	// that as settled rather than deadlocking
	let _ = join_all(settled).await;

	cells.iter().map(|cell| cell.value()).collect()
}

/// Demand without waiting.
pub fn update<T>(cells: &[&Cell<T>])
where
	T: Clone + Send + Sync + 'static,
{
	for cell in cells {
		cell.update();
	}
}

/// Reset every cell in `cells` to `NeedsUpdate`, discarding cached
/// values and standing faults.
pub fn force_needs_update<T>(cells: &[&Cell<T>])
where
	T: Clone + Send + Sync + 'static,
{
	for cell in cells {
		cell.force_needs_update();
	}
}

/// Inject a synthetic error into every cell in `cells`.
pub fn force_error<T>(cells: &[&Cell<T>])
where
	T: Clone + Send + Sync + 'static,
{
	for cell in cells {
		cell.force_error();
	}
}
