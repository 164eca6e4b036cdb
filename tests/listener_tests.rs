#![allow(clippy::unwrap_used, clippy::expect_used)]

use service_common::queue::memory::{MemoryLedger, MemoryMessage, Outcome};
use service_common::queue::{handler_fn, Listener, ListenerError, ListenerState};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_workers_three_messages() {
    let gate = Arc::new(Notify::new());
    let third_done = Arc::new(AtomicBool::new(false));

    let handler = {
        let gate = Arc::clone(&gate);
        let third_done = Arc::clone(&third_done);
        handler_fn(move |_ctx, _md, payload: Vec<u8>| {
            let gate = Arc::clone(&gate);
            let third_done = Arc::clone(&third_done);
            async move {
                match payload.as_slice() {
                    b"first" => Ok(()),
                    b"second" => anyhow::bail!("cannot process second"),
                    _ => {
                        gate.notified().await;
                        third_done.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                }
            }
        })
    };

    let listener = Listener::<MemoryMessage>::builder()
        .name("scenario")
        .worker_count(2)
        .handler(handler)
        .build()
        .unwrap();

    let ledger = MemoryLedger::new();
    let (tx, rx) = mpsc::channel(8);
    listener.listen(CancellationToken::new(), rx).unwrap();
    assert_eq!(listener.state(), ListenerState::Listening);

    for (id, payload) in [("1", "first"), ("2", "second"), ("3", "third")] {
        tx.send(ledger.message(id, payload.as_bytes().to_vec()))
            .await
            .unwrap();
    }
    drop(tx);

    // the third handler is parked on the gate, so Done must not fire yet
    wait_until(|| ledger.len() == 2).await;
    assert!(
        tokio::time::timeout(Duration::from_millis(100), listener.done())
            .await
            .is_err(),
        "done fired before the third message completed"
    );

    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(5), listener.done())
        .await
        .expect("listener did not finish");

    assert!(third_done.load(Ordering::SeqCst));
    assert_eq!(ledger.acked(), 2);
    assert_eq!(ledger.nacked(), 1);
    assert_eq!(ledger.outcome("2"), Some(Outcome::Nacked));
    assert_eq!(ledger.duplicates(), 0);
    assert_eq!(listener.state(), ListenerState::Done);

    let metrics = listener.metrics();
    assert_eq!(metrics.get_received(), 3);
    assert_eq!(metrics.get_acked(), 2);
    assert_eq!(metrics.get_nacked(), 1);
    assert_eq!(metrics.get_in_flight(), 0);
}

#[tokio::test]
async fn test_done_before_listen() {
    let listener = Listener::<MemoryMessage>::builder()
        .worker_count(3)
        .handler(handler_fn(|_ctx, _md, _payload| async { Ok(()) }))
        .build()
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), listener.done())
        .await
        .expect("done must fire immediately when never started");
    assert_eq!(listener.state(), ListenerState::Created);

    // the early signal does not keep the listener from starting
    let ledger = MemoryLedger::new();
    let (tx, rx) = mpsc::channel(1);
    listener.listen(CancellationToken::new(), rx).unwrap();
    tx.send(ledger.message("after-done", b"x".to_vec()))
        .await
        .unwrap();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), listener.done())
        .await
        .expect("listener did not finish");
    assert_eq!(ledger.outcome("after-done"), Some(Outcome::Acked));

    let (_tx, rx) = mpsc::channel(1);
    assert_eq!(
        listener.listen(CancellationToken::new(), rx),
        Err(ListenerError::AlreadyStarted)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_done_requested_concurrently_with_listen() {
    let listener = Arc::new(
        Listener::<MemoryMessage>::builder()
            .worker_count(2)
            .handler(handler_fn(|_ctx, _md, _payload| async { Ok(()) }))
            .build()
            .unwrap(),
    );

    let ledger = MemoryLedger::new();
    let (tx, rx) = mpsc::channel(4);
    let early = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.done().await })
    };
    let start = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.listen(CancellationToken::new(), rx) })
    };

    start.await.unwrap().unwrap();
    early.await.unwrap();

    tx.send(ledger.message("m", b"x".to_vec())).await.unwrap();
    drop(tx);
    tokio::time::timeout(Duration::from_secs(5), listener.done())
        .await
        .expect("listener did not finish");
    assert_eq!(ledger.outcome("m"), Some(Outcome::Acked));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_drains_in_flight() {
    let gate = Arc::new(Notify::new());
    let started = Arc::new(AtomicUsize::new(0));

    let handler = {
        let gate = Arc::clone(&gate);
        let started = Arc::clone(&started);
        handler_fn(move |_ctx, _md, _payload| {
            let gate = Arc::clone(&gate);
            let started = Arc::clone(&started);
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(())
            }
        })
    };

    let listener = Listener::<MemoryMessage>::builder()
        .name("drain")
        .worker_count(2)
        .handler(handler)
        .build()
        .unwrap();

    let ledger = MemoryLedger::new();
    let token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(8);
    listener.listen(token.clone(), rx).unwrap();

    tx.send(ledger.message("in-flight", b"a".to_vec())).await.unwrap();
    wait_until(|| started.load(Ordering::SeqCst) == 1).await;

    token.cancel();
    wait_until(|| listener.state() == ListenerState::Draining).await;

    // accepted by the channel but never picked up
    tx.send(ledger.message("late", b"b".to_vec())).await.unwrap();

    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(5), listener.done())
        .await
        .expect("listener did not drain");

    assert_eq!(ledger.outcome("in-flight"), Some(Outcome::Acked));
    assert_eq!(ledger.outcome("late"), None);
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(listener.state(), ListenerState::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_message_settled_exactly_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = Arc::clone(&calls);
        handler_fn(move |_ctx, _md, payload: Vec<u8>| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                if payload[0] % 3 == 0 {
                    anyhow::bail!("multiple of three");
                }
                Ok(())
            }
        })
    };

    let listener = Listener::<MemoryMessage>::builder()
        .name("bulk")
        .worker_count(4)
        .handler(handler)
        .build()
        .unwrap();

    let ledger = MemoryLedger::new();
    let (tx, rx) = mpsc::channel(16);
    listener.listen(CancellationToken::new(), rx).unwrap();

    for i in 0..120_u8 {
        tx.send(ledger.message(format!("m{i}"), vec![i])).await.unwrap();
    }
    drop(tx);

    tokio::time::timeout(Duration::from_secs(10), listener.done())
        .await
        .expect("listener did not finish");

    assert_eq!(ledger.len(), 120);
    assert_eq!(ledger.duplicates(), 0);
    assert_eq!(ledger.nacked(), 40);
    assert_eq!(ledger.acked(), 80);

    // no callback starts once Done has fired
    let after_done = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_done);
    assert_eq!(after_done, 120);
}

#[tokio::test]
async fn test_done_is_shared_by_concurrent_waiters() {
    let listener = Listener::<MemoryMessage>::builder()
        .worker_count(1)
        .handler(handler_fn(|_ctx, _md, _payload| async { Ok(()) }))
        .build()
        .unwrap();

    let (tx, rx) = mpsc::channel(1);
    listener.listen(CancellationToken::new(), rx).unwrap();

    let a = listener.done();
    let b = listener.done();
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(a, b);
    })
    .await
    .expect("waiters not released");
    listener.done().await;
}
