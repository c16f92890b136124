use std::time::Duration;

use mockall::predicate;
use weft::{evaluate, force_error, Cell, CellFn, Outcome, Parent, Source, Status};

mod mock;

use mock::{Probe, SharedProbe};

fn init_tracing() {
	use std::sync::Once;
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.try_init();
	});
}

fn adder(probe: SharedProbe, name: &'static str) -> CellFn<f64> {
	Box::new(move |args| {
		probe.get().invoked(name);
		Ok(args.iter().sum())
	})
}

fn divider(probe: SharedProbe, name: &'static str) -> CellFn<f64> {
	Box::new(move |args| {
		probe.get().invoked(name);
		if args[1] == 0.0 {
			return Err("divide by zero".into());
		}
		Ok(args[0] / args[1])
	})
}

fn near(outcome: &Outcome<f64>, expected: f64) {
	let value = outcome.computed().expect("computed value");
	assert!((value - expected).abs() < 1e-9, "{value} != {expected}");
}

async fn wait_status<T>(cell: &Cell<T>, status: Status)
where
	T: Clone + Send + Sync + 'static,
{
	tokio::time::timeout(Duration::from_secs(2), async {
		while cell.status() != status {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("cell `{}` never reached {status:?}", cell.name()));
}

async fn wait_for(mut pred: impl FnMut() -> bool, what: &str) {
	tokio::time::timeout(Duration::from_secs(2), async {
		while !pred() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("never observed: {what}"));
}

#[tokio::test(flavor = "multi_thread")]
async fn faults_propagate_down_and_recover() {
	init_tracing();
	let probe = SharedProbe::new();

	let x = Cell::source("x", 0.0);
	let a = Cell::named(
		"a",
		divider(probe.clone(), "a"),
		vec![Parent::constant(1.0), Parent::from(&x)],
	);
	let d = Cell::named(
		"d",
		adder(probe.clone(), "d"),
		vec![Parent::from(&a), Parent::constant(1.0)],
	);

	probe.get().expect_invoked().with(predicate::eq("a")).times(1).return_const(());
	let values = evaluate(&[&a, &d]).await;
	let faults = values[0].faults().expect("a faulted");
	assert_eq!(faults.keys().collect::<Vec<_>>(), vec![&Source::Own]);
	assert!(faults[&Source::Own].to_string().contains("divide by zero"));
	let faults = values[1].faults().expect("d faulted");
	assert_eq!(faults.keys().collect::<Vec<_>>(), vec![&Source::Cell(a.id())]);
	assert!(faults[&Source::Cell(a.id())].to_string().contains("divide by zero"));
	probe.get().checkpoint();

	// a fresh input clears the self-fault and the recovery cascades
	probe.get().expect_invoked().with(predicate::eq("a")).times(1).return_const(());
	probe.get().expect_invoked().with(predicate::eq("d")).times(1).return_const(());
	x.set(2.0).unwrap();
	wait_status(&a, Status::NeedsUpdate).await;
	wait_status(&d, Status::NeedsUpdate).await;
	let values = evaluate(&[&a, &d]).await;
	near(&values[0], 0.5);
	near(&values[1], 1.5);
	probe.get().checkpoint();
}

#[tokio::test(flavor = "multi_thread")]
async fn oblivious_cells_absorb_faults() {
	init_tracing();
	let probe = SharedProbe::new();

	let x = Cell::source("x", 5.0);
	let a = Cell::named(
		"a",
		divider(probe.clone(), "a"),
		vec![Parent::constant(10.0), Parent::from(&x)],
	);
	let memo = Cell::oblivious(
		"memo",
		adder(probe.clone(), "memo"),
		vec![Parent::from(&a), Parent::constant(1.0)],
	);

	probe.get().expect_invoked().with(predicate::eq("a")).times(1).return_const(());
	probe.get().expect_invoked().with(predicate::eq("memo")).times(1).return_const(());
	let values = evaluate(&[&memo]).await;
	near(&values[0], 3.0);
	probe.get().checkpoint();

	// the ancestor faults; the memoized snapshot does not care, and
	// its children keep consuming the cached value
	probe.get().expect_invoked().with(predicate::eq("a")).times(1).return_const(());
	x.set(0.0).unwrap();
	wait_status(&a, Status::NeedsUpdate).await;
	let values = evaluate(&[&a]).await;
	assert!(values[0].faults().is_some());
	assert_eq!(memo.status(), Status::Oblivious);
	near(&memo.value(), 3.0);
	probe.get().checkpoint();

	probe.get().expect_invoked().with(predicate::eq("after")).times(1).return_const(());
	let after = Cell::named(
		"after",
		adder(probe.clone(), "after"),
		vec![Parent::from(&memo), Parent::constant(2.0)],
	);
	let values = evaluate(&[&after]).await;
	near(&values[0], 5.0);
	probe.get().checkpoint();
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_errors_reach_children_and_set_recovers() {
	init_tracing();
	let probe = SharedProbe::new();

	let b = Cell::named(
		"b",
		adder(probe.clone(), "b"),
		vec![Parent::constant(2.0), Parent::constant(3.0)],
	);
	let child = Cell::named(
		"child",
		adder(probe.clone(), "child"),
		vec![Parent::from(&b), Parent::constant(1.0)],
	);

	probe.get().expect_invoked().with(predicate::eq("b")).times(1).return_const(());
	probe.get().expect_invoked().with(predicate::eq("child")).times(1).return_const(());
	let values = evaluate(&[&child]).await;
	near(&values[0], 6.0);
	probe.get().checkpoint();

	force_error(&[&b]);
	wait_status(&b, Status::Error).await;
	wait_status(&child, Status::Error).await;
	let faults = b.value().faults().expect("b faulted").clone();
	assert_eq!(faults[&Source::Own].to_string(), "error forced from outside");
	let faults = child.value().faults().expect("child faulted").clone();
	assert!(faults.contains_key(&Source::Cell(b.id())));

	// a faulted cell ignores demand; evaluate completes over it
	probe.get().expect_invoked().times(0).return_const(());
	let values = evaluate(&[&child]).await;
	assert!(values[0].faults().is_some());
	probe.get().checkpoint();

	// writing the leaf recovers the whole branch
	probe.get().expect_invoked().with(predicate::eq("child")).times(1).return_const(());
	b.set(7.0).unwrap();
	wait_status(&b, Status::UpToDate).await;
	wait_status(&child, Status::NeedsUpdate).await;
	let values = evaluate(&[&child]).await;
	near(&values[0], 8.0);
	probe.get().checkpoint();
}

#[tokio::test(flavor = "multi_thread")]
async fn fault_sources_accumulate_and_recover_one_by_one() {
	init_tracing();
	let probe = SharedProbe::new();

	let p1 = Cell::source("p1", 1.0);
	let p2 = Cell::source("p2", 2.0);
	let child = Cell::named(
		"child",
		adder(probe.clone(), "child"),
		vec![Parent::from(&p1), Parent::from(&p2)],
	);

	probe.get().expect_invoked().with(predicate::eq("child")).times(1).return_const(());
	near(&evaluate(&[&child]).await[0], 3.0);
	probe.get().checkpoint();

	p1.force_error();
	p2.force_error();
	wait_for(
		|| child.value().faults().map(|faults| faults.len()) == Some(2),
		"both fault sources in the child's map",
	)
	.await;
	let faults = child.value().faults().expect("child faulted").clone();
	assert!(faults.contains_key(&Source::Cell(p1.id())));
	assert!(faults.contains_key(&Source::Cell(p2.id())));

	// recovery is per source
	p1.set(10.0).unwrap();
	wait_for(
		|| child.value().faults().map(|faults| faults.len()) == Some(1),
		"one remaining fault source",
	)
	.await;
	assert_eq!(child.status(), Status::Error);

	probe.get().expect_invoked().with(predicate::eq("child")).times(1).return_const(());
	p2.set(20.0).unwrap();
	wait_status(&child, Status::NeedsUpdate).await;
	near(&evaluate(&[&child]).await[0], 30.0);
	probe.get().checkpoint();
}

#[tokio::test(flavor = "multi_thread")]
async fn children_born_under_a_fault_inherit_it() {
	init_tracing();
	let probe = SharedProbe::new();

	let x = Cell::source("x", 0.0);
	let a = Cell::named(
		"a",
		divider(probe.clone(), "a"),
		vec![Parent::constant(1.0), Parent::from(&x)],
	);
	probe.get().expect_invoked().with(predicate::eq("a")).times(1).return_const(());
	evaluate(&[&a]).await;
	assert_eq!(a.status(), Status::Error);
	probe.get().checkpoint();

	// a faulted parent never answers demand, so the fault must be
	// inherited at construction
	let late = Cell::named(
		"late",
		adder(probe.clone(), "late"),
		vec![Parent::from(&a), Parent::constant(1.0)],
	);
	assert_eq!(late.status(), Status::Error);
	probe.get().expect_invoked().times(0).return_const(());
	let values = evaluate(&[&late]).await;
	let faults = values[0].faults().expect("late faulted");
	assert!(faults.contains_key(&Source::Cell(a.id())));
	probe.get().checkpoint();
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_functions_become_faults() {
	init_tracing();
	let boom: CellFn<f64> = Box::new(|_| panic!("boom"));
	let cell = Cell::named("boom", boom, vec![Parent::constant(1.0)]);

	let values = evaluate(&[&cell]).await;
	let faults = values[0].faults().expect("faulted");
	let fault = faults[&Source::Own].to_string();
	assert!(fault.contains("panicked"), "{fault}");
	assert!(fault.contains("boom"), "{fault}");

	// the cell is still alive and can be reset
	cell.force_needs_update();
	wait_status(&cell, Status::NeedsUpdate).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn forced_source_without_value_faults_instead_of_hanging() {
	init_tracing();
	let x = Cell::source("x", 1.0);
	x.force_needs_update();
	wait_status(&x, Status::NeedsUpdate).await;

	let values = evaluate(&[&x]).await;
	let faults = values[0].faults().expect("faulted");
	assert!(faults[&Source::Own].to_string().contains("demanded before any value"));

	// a write brings it back
	x.set(6.0).unwrap();
	wait_status(&x, Status::UpToDate).await;
	near(&x.value(), 6.0);
}
