use super::helpers::{local_sessions, run_workers};
use rankcall::{Backend, Kwargs, RpcError, Session, Value};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_operations_before_initialize_fail() {
    let sessions = local_sessions(1).await;
    let s = &sessions[0];

    assert!(!s.is_initialized());
    assert!(matches!(
        s.rpc_sync("worker0", "echo", vec![], Kwargs::new()).await,
        Err(RpcError::NotInitialized)
    ));
    assert!(matches!(
        s.rpc_async("worker0", "echo", vec![], Kwargs::new()).await,
        Err(RpcError::NotInitialized)
    ));
    assert!(matches!(s.barrier_sync().await, Err(RpcError::NotInitialized)));
    assert!(matches!(s.resolve_worker_id(None), Err(RpcError::NotInitialized)));
    assert!(matches!(s.agent(), Err(RpcError::NotInitialized)));

    // Joining an uninitialized session is a no-op.
    s.shutdown_and_join().await.unwrap();
}

#[tokio::test]
async fn test_double_initialize() {
    let sessions = local_sessions(1).await;
    let s = &sessions[0];

    s.initialize("worker0", Backend::ProcessGroup).await.unwrap();
    assert!(s.is_initialized());
    let err = s
        .initialize("worker0", Backend::ProcessGroup)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::AlreadyInitialized));

    // A second session on the same group cannot attach another agent.
    let other = Session::new(Arc::clone(s.group()));
    let err = other
        .initialize("again", Backend::ProcessGroup)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::AlreadyInitialized));
    assert!(!other.is_initialized());

    s.shutdown_and_join().await.unwrap();
}

#[tokio::test]
async fn test_join_then_reinitialize() {
    let sessions = local_sessions(2).await;

    let mut handles = Vec::new();
    for s in &sessions {
        let s = Arc::clone(s);
        handles.push(tokio::spawn(async move {
            let rank = s.group().rank();
            s.initialize(&format!("first{rank}"), Backend::ProcessGroup)
                .await
                .unwrap();
            let agent = s.agent().unwrap();
            s.shutdown_and_join().await.unwrap();

            assert!(!s.is_initialized());
            assert!(!s.group().has_agent());
            assert!(matches!(
                s.rpc_sync("first0", "echo", vec![], Kwargs::new()).await,
                Err(RpcError::NotInitialized)
            ));
            // A stale agent handle refuses new work too.
            assert!(matches!(
                agent
                    .call(&"first0".into(), "echo", vec![], Kwargs::new())
                    .await,
                Err(RpcError::NotInitialized)
            ));

            s.initialize(&format!("second{rank}"), Backend::ProcessGroup)
                .await
                .unwrap();
            let peer = format!("second{}", 1 - rank);
            let out = s
                .rpc_sync(peer.as_str(), "echo", vec![Value::Int(rank as i64)], Kwargs::new())
                .await
                .unwrap();
            assert_eq!(out, Value::Int(rank as i64));
            s.shutdown_and_join().await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn test_barrier_sync_waits_for_outstanding_calls() {
    run_workers(2, |s| async move {
        if s.group().rank() == 0 {
            let handle = s
                .rpc_async(
                    "worker1",
                    "sleep_then_echo",
                    vec![Value::Int(300), Value::Int(1)],
                    Kwargs::new(),
                )
                .await
                .unwrap();
            s.barrier_sync().await.unwrap();
            assert!(handle.is_completed());
        } else {
            s.barrier_sync().await.unwrap();
        }
    })
    .await;
}

#[tokio::test]
async fn test_concurrent_sync_rejected() {
    run_workers(2, |s| async move {
        if s.group().rank() == 0 {
            let first = {
                let s = Arc::clone(&s);
                tokio::spawn(async move { s.barrier_sync().await })
            };
            // Rank 1 holds back, so the first sync is still waiting here.
            tokio::time::sleep(Duration::from_millis(100)).await;
            let err = s.barrier_sync().await.unwrap_err();
            assert!(matches!(err, RpcError::ConcurrentSync));
            first.await.unwrap().unwrap();
        } else {
            tokio::time::sleep(Duration::from_millis(400)).await;
            s.barrier_sync().await.unwrap();
        }
    })
    .await;
}

#[tokio::test]
async fn test_unknown_backend_rejected() {
    let err = "gloo".parse::<Backend>().unwrap_err();
    assert!(matches!(err, RpcError::InvalidArgument(_)));
}
