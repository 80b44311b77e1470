use super::helpers::{initialize_all, local_sessions, local_sessions_with, run_workers, run_workers_with};
use rankcall::{Kwargs, RpcConfig, RpcError, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_responses_not_held_up_by_busy_executor() {
    let config = RpcConfig {
        max_inflight_requests: 1,
        ..RpcConfig::default()
    };
    run_workers_with(2, config, |s| async move {
        if s.group().rank() == 1 {
            // Fill worker0's only execution slot and queue one more behind it.
            let mut handles = Vec::new();
            for tag in ["first", "second"] {
                let h = s
                    .rpc_async(
                        "worker0",
                        "sleep_then_echo",
                        vec![Value::Int(1500), Value::from(tag)],
                        Kwargs::new(),
                    )
                    .await
                    .unwrap();
                handles.push((tag, h));
            }
            for (tag, h) in handles {
                assert_eq!(h.wait().await.unwrap(), Value::from(tag));
            }
        } else {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let start = Instant::now();
            let out = s
                .rpc_sync("worker1", "echo", vec![Value::Int(3)], Kwargs::new())
                .await
                .unwrap();
            assert_eq!(out, Value::Int(3));
            assert!(
                start.elapsed() < Duration::from_millis(1000),
                "response waited {:?}",
                start.elapsed()
            );
        }
    })
    .await;
}

#[tokio::test]
async fn test_oversized_result_fails_the_call() {
    let config = RpcConfig {
        max_message_size: 4096,
        ..RpcConfig::default()
    };
    run_workers_with(2, config, |s| async move {
        if s.group().rank() == 0 {
            let handle = s
                .rpc_async("worker1", "blob", vec![Value::Int(8192)], Kwargs::new())
                .await
                .unwrap();
            let err = tokio::time::timeout(Duration::from_secs(10), handle.wait())
                .await
                .expect("oversized result never reported")
                .unwrap_err();
            assert!(matches!(
                err,
                RpcError::RemoteExecution { ref message, .. } if message.contains("too large")
            ));

            let out = s
                .rpc_sync("worker1", "blob", vec![Value::Int(16)], Kwargs::new())
                .await
                .unwrap();
            assert_eq!(out, Value::Bytes(vec![0; 16]));
        }
    })
    .await;
}

#[tokio::test]
async fn test_failed_send_fails_only_its_own_call() {
    let config = RpcConfig {
        max_message_size: 4096,
        ..RpcConfig::default()
    };
    run_workers_with(2, config, |s| async move {
        if s.group().rank() == 0 {
            let other = s
                .rpc_async(
                    "worker1",
                    "sleep_then_echo",
                    vec![Value::Int(200), Value::from("still here")],
                    Kwargs::new(),
                )
                .await
                .unwrap();

            let err = s
                .rpc_sync("worker1", "echo", vec![Value::Bytes(vec![1; 8192])], Kwargs::new())
                .await
                .unwrap_err();
            assert!(matches!(err, RpcError::EncodeFailed(_)));

            assert_eq!(other.wait().await.unwrap(), Value::from("still here"));
            assert_eq!(s.agent().unwrap().pending_calls().unwrap(), 0);
            let out = s
                .rpc_sync("worker1", "echo", vec![Value::Int(1)], Kwargs::new())
                .await
                .unwrap();
            assert_eq!(out, Value::Int(1));
        }
    })
    .await;
}

#[tokio::test]
async fn test_join_keeps_serving_until_every_worker_joins() {
    run_workers(2, |s| async move {
        // worker1 goes straight to shutdown_and_join; worker0 still calls it.
        if s.group().rank() == 0 {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            let out = s
                .rpc_sync("worker1", "echo", vec![Value::Int(7)], Kwargs::new())
                .await
                .unwrap();
            assert_eq!(out, Value::Int(7));
        }
    })
    .await;
}

#[tokio::test]
async fn test_join_can_be_retried_after_barrier_timeout() {
    let config = RpcConfig {
        barrier_timeout: Some(Duration::from_millis(200)),
        ..RpcConfig::default()
    };
    let sessions = local_sessions_with(2, config).await;
    initialize_all(&sessions).await;

    let mut handles = Vec::new();
    for s in &sessions {
        let s = Arc::clone(s);
        handles.push(tokio::spawn(async move {
            if s.group().rank() == 1 {
                let err = s.shutdown_and_join().await.unwrap_err();
                assert!(matches!(err, RpcError::BarrierTimeout { .. }));
                assert!(s.is_initialized());
            } else {
                tokio::time::sleep(Duration::from_millis(600)).await;
                let out = s
                    .rpc_sync("worker1", "echo", vec![Value::Int(7)], Kwargs::new())
                    .await
                    .unwrap();
                assert_eq!(out, Value::Int(7));
            }

            let mut attempts = 0;
            loop {
                match s.shutdown_and_join().await {
                    Ok(()) => break,
                    Err(RpcError::BarrierTimeout { .. }) => attempts += 1,
                    Err(e) => panic!("join failed: {e}"),
                }
                assert!(attempts < 50, "join never completed");
            }
            assert!(!s.is_initialized());
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

#[tokio::test]
async fn test_peer_loss_fails_outstanding_calls() {
    let sessions = local_sessions(2).await;
    initialize_all(&sessions).await;

    let handle = sessions[0]
        .rpc_async(
            "worker1",
            "sleep_then_echo",
            vec![Value::Int(1000), Value::Int(1)],
            Kwargs::new(),
        )
        .await
        .unwrap();

    sessions[1].group().peer(0).unwrap().close("worker1 going away");

    let err = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("lost peer never reported")
        .unwrap_err();
    assert!(matches!(err, RpcError::Transport { .. }));
    assert_eq!(sessions[0].agent().unwrap().pending_calls().unwrap(), 0);
}
