//! Exactly one of the racing exiting tasks becomes the reclaim owner, and
//! every address space is torn down exactly once.

mod common;

use std::sync::Barrier;
use std::thread;

use mmreap::{Flags, ReclaimMode, Retired, ShutdownMode, TaskId};

use common::{start, Host, Victim};

fn race(reclaim: ReclaimMode, workers: usize) {
    let host = Host::new();
    let reaper = start(reclaim, workers, &host);

    for tasks in 1..=64u64 {
        let id = reaper.register(Victim { pid: tasks }, tasks as usize).unwrap();
        let barrier = Barrier::new(tasks as usize);

        let outcomes: Vec<Retired> = thread::scope(|scope| {
            let handles: Vec<_> = (0..tasks)
                .map(|task| {
                    let (reaper, barrier) = (&reaper, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        reaper.retire_task(id, TaskId(task)).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        let owners = outcomes.iter().filter(|outcome| outcome.is_owner()).count();
        assert_eq!(owners, 1, "{} tasks: {:?}", tasks, outcomes);
        assert!(outcomes.iter().all(|outcome| *outcome != Retired::AlreadyOwned));
    }

    let report = reaper.shutdown(ShutdownMode::Drain);
    assert!(report.failed.is_empty());
    assert_eq!(reaper.live_handles(), 0);

    let counts = host.counts();
    assert_eq!(counts.len(), 64);
    assert!(counts.values().all(|count| *count == 1), "{:?}", counts);
}

#[test]
fn racing_tasks_deferred() {
    race(ReclaimMode::Enabled, 2);
}

#[test]
fn racing_tasks_inline() {
    race(ReclaimMode::Disabled, 2);
}

#[test]
fn racing_tasks_without_workers() {
    race(ReclaimMode::Enabled, 0);
}

#[test]
fn four_threads_one_owner() {
    let host = Host::new();
    let reaper = start(ReclaimMode::Enabled, 0, &host);
    let id = reaper.register(Victim { pid: 4 }, 4).unwrap();

    for (task, remaining) in [(1, 3), (2, 2), (3, 1)] {
        assert_eq!(
            reaper.retire_task(id, TaskId(task)).unwrap(),
            Retired::Shared { remaining }
        );
        assert_eq!(reaper.snapshot(id).unwrap().owner, None);
    }

    assert_eq!(reaper.retire_task(id, TaskId(4)).unwrap(), Retired::Deferred);
    let snapshot = reaper.snapshot(id).unwrap();
    assert_eq!(snapshot.owner, Some(TaskId(4)));
    assert!(snapshot.flags.contains(Flags::RECLAIM_QUEUED));
    assert!(host.torn_down().is_empty());

    let reaped = reaper.reap_one().unwrap();
    assert_eq!(reaped.id, id);
    assert_eq!(host.torn_down(), vec![4]);
    assert!(reaper.reap_one().is_none());
    assert_eq!(host.torn_down(), vec![4]);
}

#[test]
fn concurrent_owners_are_all_deferred() {
    let host = Host::new();
    let reaper = start(ReclaimMode::Enabled, 1, &host);

    let ids: Vec<_> = (0..32)
        .map(|pid| reaper.register(Victim { pid }, 1).unwrap())
        .collect();

    thread::scope(|scope| {
        for (task, id) in ids.iter().enumerate() {
            let reaper = &reaper;
            scope.spawn(move || {
                assert_eq!(
                    reaper.retire_task(*id, TaskId(task as u64)).unwrap(),
                    Retired::Deferred
                );
            });
        }
    });

    reaper.shutdown(ShutdownMode::Drain);
    let stats = reaper.stats();
    assert_eq!(stats.deferred, 32);
    assert_eq!(stats.reclaimed_deferred, 32);
    assert_eq!(stats.ownership_races_lost, 0);
    assert_eq!(host.counts().len(), 32);
}
