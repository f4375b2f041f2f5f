//! Cells observed from reactions and computed values, and the events they
//! report to a tracer.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::Deferred;
use memo_flow::{
    CommitOutcome, Computed, InvocationId, InvocationKind, Memo, MemoError, Observable,
    Resolution, Runtime, StatusKind, Tracer, TracerMemoKey,
};
use parking_lot::Mutex;

// =============================================================================
// Recording tracer
// =============================================================================

#[derive(Default)]
struct RecordingTracer {
    events: Mutex<Vec<String>>,
}

impl RecordingTracer {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl Tracer for RecordingTracer {
    fn on_memo_created(&self, memo: &TracerMemoKey) {
        self.events.lock().push(format!("created {}", memo));
    }

    fn on_invocation_start(&self, memo: &TracerMemoKey, id: InvocationId, kind: InvocationKind) {
        self.events
            .lock()
            .push(format!("start {} #{} {:?}", memo.name.as_deref().unwrap_or("?"), id.0, kind));
    }

    fn on_commit(&self, memo: &TracerMemoKey, id: InvocationId, outcome: &CommitOutcome) {
        let outcome = match outcome {
            CommitOutcome::Sync => "sync".to_string(),
            CommitOutcome::Complete => "complete".to_string(),
            CommitOutcome::Error { message } => format!("error: {}", message),
        };
        self.events.lock().push(format!(
            "commit {} #{} {}",
            memo.name.as_deref().unwrap_or("?"),
            id.0,
            outcome
        ));
    }

    fn on_stale_dropped(&self, memo: &TracerMemoKey, id: InvocationId, current: InvocationId) {
        self.events.lock().push(format!(
            "stale {} #{} < #{}",
            memo.name.as_deref().unwrap_or("?"),
            id.0,
            current.0
        ));
    }

    fn on_gate_blocked(&self, memo: &TracerMemoKey, dependency: usize, status: StatusKind) {
        self.events.lock().push(format!(
            "blocked {} on {} ({})",
            memo.name.as_deref().unwrap_or("?"),
            dependency,
            status
        ));
    }
}

#[test]
fn test_tracer_sees_lifecycle() {
    let tracer = Arc::new(RecordingTracer::default());
    let runtime = Runtime::builder().tracer(tracer.clone()).build();
    let input = Observable::new(&runtime, 0u32);
    let deferred = Deferred::<u32>::new();
    let memo = {
        let (input, deferred) = (input.clone(), deferred.clone());
        Memo::builder(&runtime)
            .name("price")
            .invoke(move |_| {
                let _ = input.get();
                deferred.next()
            })
            .build()
            .unwrap()
    };
    assert_eq!(tracer.take(), vec![format!("created price#{}", memo.id().0)]);

    memo.status();
    input.set(1);
    memo.status();
    deferred.resolve(2, 20);
    runtime.run_until_stalled();
    deferred.reject(1, "late");
    runtime.run_until_stalled();

    assert_eq!(
        tracer.take(),
        vec![
            "start price #1 Async",
            "start price #2 Async",
            "commit price #2 complete",
            "stale price #1 < #2",
        ]
    );
}

#[test]
fn test_tracer_sees_gate_and_errors() {
    let tracer = Arc::new(RecordingTracer::default());
    let runtime = Runtime::builder().tracer(tracer.clone()).build();
    let upstream: Memo<u32> = Memo::builder(&runtime)
        .name("upstream")
        .invoke(|_| Resolution::rejected(MemoError::msg("refused")))
        .build()
        .unwrap();
    let downstream = {
        let upstream = upstream.clone();
        Memo::builder(&runtime)
            .name("downstream")
            .await_deps(move || vec![upstream.dependency()])
            .invoke(|resolve| {
                resolve.resolve(1u32);
                Resolution::ready(2)
            })
            .build()
            .unwrap()
    };
    tracer.take();

    assert_eq!(downstream.status(), StatusKind::Pending);
    runtime.run_until_stalled();
    assert_eq!(downstream.status(), StatusKind::Error);

    assert_eq!(
        tracer.take(),
        vec![
            "start upstream #1 Async",
            "blocked downstream on 0 (pending)",
            "commit upstream #1 error: producer rejected: refused",
            "blocked downstream on 0 (error)",
        ]
    );
}

#[test]
fn test_peek_and_debug_report_nothing() {
    let tracer = Arc::new(RecordingTracer::default());
    let runtime = Runtime::builder().tracer(tracer.clone()).build();
    let upstream: Memo<u32> = Memo::builder(&runtime)
        .name("upstream")
        .invoke(|_| Resolution::ready(1))
        .build()
        .unwrap();
    let downstream = {
        let upstream = upstream.clone();
        Memo::builder(&runtime)
            .name("downstream")
            .await_deps(move || vec![upstream.dependency()])
            .invoke(|_| Resolution::ready(2u32))
            .build()
            .unwrap()
    };
    tracer.take();

    assert_eq!(downstream.peek_status(), StatusKind::Pending);
    assert_eq!(downstream.peek_status(), StatusKind::Pending);
    assert!(upstream.invocation().is_none());

    let runs = Arc::new(AtomicUsize::new(0));
    let _reaction = {
        let (dependency, runs) = (upstream.dependency(), runs.clone());
        runtime.autorun(move || {
            let _ = format!("{:?}", dependency);
            runs.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert_eq!(
        format!("{:?}", upstream.dependency()),
        format!("Dependency(upstream#{})", upstream.id().0)
    );

    assert_eq!(upstream.status(), StatusKind::Complete);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        tracer.take(),
        vec!["start upstream #1 Sync", "commit upstream #1 sync"]
    );
}

// =============================================================================
// Cells reading cells
// =============================================================================

#[test]
fn test_producer_reading_sync_cell_runs_once_per_change() {
    let runtime = Runtime::new();
    let input = Observable::new(&runtime, 1u32);
    let upstream_calls = Arc::new(AtomicUsize::new(0));
    let downstream_calls = Arc::new(AtomicUsize::new(0));
    let upstream = {
        let (input, calls) = (input.clone(), upstream_calls.clone());
        Memo::builder(&runtime)
            .invoke(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Resolution::ready(input.get() * 10)
            })
            .build()
            .unwrap()
    };
    let downstream = {
        let (upstream, calls) = (upstream.clone(), downstream_calls.clone());
        Memo::builder(&runtime)
            .invoke(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Resolution::ready(upstream.result().unwrap_or(0) + 1)
            })
            .build()
            .unwrap()
    };

    assert_eq!(downstream.result(), Some(11));
    input.set(2);
    for _ in 0..3 {
        assert_eq!(downstream.result(), Some(21));
        assert_eq!(downstream.status(), StatusKind::Complete);
    }
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 2);
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_producer_reading_async_cell_under_autorun() {
    let runtime = Runtime::new();
    let input = Observable::new(&runtime, 1u32);
    let upstream_calls = Arc::new(AtomicUsize::new(0));
    let downstream_calls = Arc::new(AtomicUsize::new(0));
    let upstream = {
        let (input, calls) = (input.clone(), upstream_calls.clone());
        Memo::builder(&runtime)
            .invoke(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let value = input.get() * 10;
                Resolution::future(async move { Ok::<_, MemoError>(value) })
            })
            .build()
            .unwrap()
    };
    let downstream = {
        let (upstream, calls) = (upstream.clone(), downstream_calls.clone());
        Memo::builder(&runtime)
            .invoke(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let value = upstream.result().unwrap_or(0) + 1;
                Resolution::future(async move { Ok::<_, MemoError>(value) })
            })
            .build()
            .unwrap()
    };
    let _reaction = {
        let downstream = downstream.clone();
        runtime.autorun(move || {
            downstream.status();
        })
    };
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 1);

    // Once more when the upstream result arrives.
    runtime.run_until_stalled();
    assert_eq!(downstream.result(), Some(11));
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 1);
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 2);

    // Once for the change, once more when the new upstream result arrives.
    input.set(2);
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 2);
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 3);
    runtime.run_until_stalled();
    assert_eq!(downstream.result(), Some(21));
    assert_eq!(upstream_calls.load(Ordering::SeqCst), 2);
    assert_eq!(downstream_calls.load(Ordering::SeqCst), 4);
}

// =============================================================================
// Reactions
// =============================================================================

#[test]
fn test_autorun_follows_status() {
    let runtime = Runtime::new();
    let input = Observable::new(&runtime, 0u32);
    let deferred = Deferred::<u32>::new();
    let memo = {
        let (input, deferred) = (input.clone(), deferred.clone());
        Memo::builder(&runtime)
            .invoke(move |_| {
                let _ = input.get();
                deferred.next()
            })
            .build()
            .unwrap()
    };

    let seen = Arc::new(Mutex::new(Vec::new()));
    let reaction = {
        let (memo, seen) = (memo.clone(), seen.clone());
        runtime.autorun(move || {
            let snapshot = memo.snapshot();
            seen.lock().push((snapshot.kind(), snapshot.into_result()));
        })
    };
    // The reaction invoked the producer.
    assert_eq!(deferred.calls(), 1);

    deferred.resolve(1, 5);
    runtime.run_until_stalled();

    // The reaction re-invokes the producer as soon as the input changes.
    input.set(1);
    assert_eq!(deferred.calls(), 2);
    deferred.resolve(2, 6);
    runtime.run_until_stalled();

    let mut seen = std::mem::take(&mut *seen.lock());
    seen.dedup();
    assert_eq!(
        seen,
        vec![
            (StatusKind::Pending, None),
            (StatusKind::Complete, Some(5)),
            (StatusKind::Pending, Some(5)),
            (StatusKind::Complete, Some(6)),
        ]
    );

    reaction.dispose();
    input.set(2);
    assert_eq!(deferred.calls(), 2);
}

#[test]
fn test_unobserved_cell_is_not_recomputed() {
    let runtime = Runtime::new();
    let input = Observable::new(&runtime, 0u32);
    let calls = Arc::new(AtomicUsize::new(0));
    let memo = {
        let (input, calls) = (input.clone(), calls.clone());
        Memo::builder(&runtime)
            .invoke(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Resolution::ready(input.get() * 2)
            })
            .build()
            .unwrap()
    };

    assert_eq!(memo.result(), Some(0));
    for value in 1..=5 {
        input.set(value);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(memo.result(), Some(10));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_batched_changes_deliver_one_callback() {
    let runtime = Runtime::new();
    let left = Observable::new(&runtime, 1u32);
    let right = Observable::new(&runtime, 1u32);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let memo = {
        let (left, right, delivered) = (left.clone(), right.clone(), delivered.clone());
        Memo::builder(&runtime)
            .invoke(move |_| Resolution::ready(left.get() + right.get()))
            .on_result(move |sum| delivered.lock().push(sum))
            .build()
            .unwrap()
    };
    let _reaction = {
        let memo = memo.clone();
        runtime.autorun(move || {
            memo.status();
        })
    };
    runtime.run_until_stalled();
    assert_eq!(*delivered.lock(), vec![2]);

    runtime.batch(|| {
        left.set(10);
        right.set(20);
    });
    runtime.run_until_stalled();
    assert_eq!(*delivered.lock(), vec![2, 30]);
}

#[test]
fn test_computed_over_memo_result() {
    let runtime = Runtime::new();
    let memo = Memo::from_fn(&runtime, || async { Ok::<_, MemoError>(vec![3, 1, 2]) });
    let largest = {
        let memo = memo.clone();
        Computed::new(&runtime, move || {
            memo.result().and_then(|items| items.into_iter().max())
        })
    };

    assert_eq!(largest.get(), None);
    runtime.run_until_stalled();
    assert!(largest.is_dirty());
    assert_eq!(largest.get(), Some(3));
}

// =============================================================================
// Driving from an executor
// =============================================================================

#[test]
fn test_settle_from_executor() {
    let runtime = Runtime::new();
    let (tx, rx) = futures::channel::oneshot::channel::<String>();
    let memo = Memo::from_future(&runtime, rx);
    assert!(memo.is_pending());

    std::thread::spawn(move || {
        let _ = tx.send("done".to_string());
    });
    futures::executor::block_on(runtime.settle());

    assert_eq!(memo.result().as_deref(), Some("done"));
    assert_eq!(runtime.pending_tasks(), 0);
}
