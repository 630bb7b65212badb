//! Property tests for commit ordering and holder consistency

mod common;

use common::{Recorder, runtime};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tandem::runtime::cell::Modifier;
use tandem::{ListenerId, MutableCell, RuntimeMode};

#[derive(Debug, Clone)]
enum Op {
    Set(i16),
    Modify { delta: i16, force: bool },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i16>().prop_map(Op::Set),
        (-2_i16..=2, any::<bool>()).prop_map(|(delta, force)| Op::Modify { delta, force }),
    ]
}

/// Values the default skip-identical policy is expected to commit
fn expected_commits(initial: i16, ops: &[Op]) -> Vec<i16> {
    let mut current = initial;
    let mut commits = Vec::new();
    for op in ops {
        match op {
            Op::Set(v) => {
                current = *v;
                commits.push(current);
            }
            Op::Modify { delta, force } => {
                let next = current.wrapping_add(*delta);
                if *force || next != current {
                    current = next;
                    commits.push(current);
                }
            }
        }
    }
    commits
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_listeners_observe_exactly_the_committed_sequence(
        initial in any::<i16>(),
        ops in prop::collection::vec(op_strategy(), 0..40),
    ) {
        let runtime = runtime(RuntimeMode::Native);
        let cell = runtime.cell(initial).unwrap();
        let recorder = Recorder::<i16>::new();

        let target = cell.clone();
        let listener = recorder.listener();
        runtime.run_on_realtime(move |scope| {
            scope
                .resolve(&target)
                .unwrap()
                .add_listener(ListenerId(1), listener)
                .unwrap();
        });

        for op in &ops {
            match *op {
                Op::Set(v) => cell.set_value(v).unwrap(),
                Op::Modify { delta, force } => {
                    let modifier: Modifier<i16> = Box::new(move |v: &i16| v.wrapping_add(delta));
                    cell.modify_with(Some(modifier), force).unwrap();
                }
            }
        }
        runtime.flush().unwrap();

        let expected = expected_commits(initial, &ops);
        prop_assert_eq!(recorder.values(), expected.clone());
        prop_assert_eq!(cell.value().unwrap(), expected.last().copied().unwrap_or(initial));
        prop_assert_eq!(cell.committed_version(), Some(expected.len() as u64));
    }

    #[test]
    fn prop_web_and_native_commit_the_same_values(
        ops in prop::collection::vec(op_strategy(), 0..20),
    ) {
        let web = runtime(RuntimeMode::Web);
        let native = runtime(RuntimeMode::Native);
        let web_cell = web.cell(0_i16).unwrap();
        let native_cell = native.cell(0_i16).unwrap();
        let recorder = Recorder::<i16>::new();
        web_cell.add_listener(ListenerId(1), recorder.listener()).unwrap();

        for op in &ops {
            for cell in [&web_cell, &native_cell] {
                match *op {
                    Op::Set(v) => cell.set_value(v).unwrap(),
                    Op::Modify { delta, force } => {
                        let modifier: Modifier<i16> =
                            Box::new(move |v: &i16| v.wrapping_add(delta));
                        cell.modify_with(Some(modifier), force).unwrap();
                    }
                }
            }
        }
        native.flush().unwrap();

        prop_assert_eq!(recorder.values(), expected_commits(0, &ops));
        prop_assert_eq!(web_cell.value().unwrap(), native_cell.value().unwrap());
    }
}

#[test]
fn holder_reads_are_monotonic_while_writes_are_in_flight() {
    const WRITES: u64 = 5_000;

    let runtime = runtime(RuntimeMode::Native);
    let cell = runtime.cell(0_u64).unwrap();
    let holder = cell.holder().unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last_version = 0;
            let mut reads = 0_u64;
            loop {
                let finished = done.load(Ordering::Acquire);
                let snapshot = holder.load();
                // The n-th commit writes n, so value and version agree.
                assert_eq!(snapshot.value, snapshot.version);
                assert!(snapshot.version >= last_version);
                last_version = snapshot.version;
                reads += 1;
                if finished {
                    assert_eq!(last_version, WRITES);
                    break;
                }
            }
            reads
        })
    };

    for v in 1..=WRITES {
        cell.set_value(v).unwrap();
    }
    runtime.flush().unwrap();
    done.store(true, Ordering::Release);

    assert!(reader.join().unwrap() > 0);
    assert_eq!(cell.value().unwrap(), WRITES);
    assert_eq!(cell.committed_version(), Some(WRITES));
}
