use super::helpers::run_workers;
use rankcall::{CallResult, Kwargs, RpcError, Target, Value};
use std::time::Duration;

#[tokio::test]
async fn test_builtin_add_on_peer() {
    run_workers(2, |s| async move {
        if s.group().rank() == 0 {
            let out = s
                .rpc_sync(
                    "worker1",
                    "aten::add",
                    vec![Value::Tensor(vec![1.0, 1.0]), Value::Int(3)],
                    Kwargs::new(),
                )
                .await
                .unwrap();
            assert_eq!(out, Value::Tensor(vec![4.0, 4.0]));
        }
    })
    .await;
}

#[tokio::test]
async fn test_builtin_kwargs_cross_the_wire() {
    run_workers(2, |s| async move {
        if s.group().rank() == 1 {
            let mut kwargs = Kwargs::new();
            kwargs.insert("alpha".into(), Value::Int(10));
            let out = s
                .rpc_sync(0u32, "aten::sub", vec![Value::Int(100), Value::Int(3)], kwargs)
                .await
                .unwrap();
            assert_eq!(out, Value::Int(70));
        }
    })
    .await;
}

#[tokio::test]
async fn test_async_result_matches_sync() {
    run_workers(2, |s| async move {
        if s.group().rank() == 0 {
            let args = vec![Value::Int(6), Value::Int(7)];

            let sync = s
                .call("worker1", "aten::mul", args.clone(), Kwargs::new(), false)
                .await
                .unwrap()
                .into_value()
                .unwrap();

            let handle = s
                .call("worker1", "aten::mul", args, Kwargs::new(), true)
                .await
                .unwrap()
                .into_handle()
                .unwrap();
            assert_eq!(handle.target().name, "worker1");
            assert_eq!(handle.wait().await.unwrap(), sync);
            assert_eq!(sync, Value::Int(42));
        }
    })
    .await;
}

#[tokio::test]
async fn test_user_function_with_kwargs() {
    run_workers(2, |s| async move {
        if s.group().rank() == 0 {
            let mut kwargs = Kwargs::new();
            kwargs.insert("sep".into(), Value::from("-"));
            let out = s
                .rpc_sync(
                    "worker1",
                    "join",
                    vec![Value::from("a"), Value::from("b"), Value::from("c")],
                    kwargs,
                )
                .await
                .unwrap();
            assert_eq!(out, Value::Str("a-b-c".into()));
        }
    })
    .await;
}

#[tokio::test]
async fn test_responses_resolve_out_of_order() {
    run_workers(2, |s| async move {
        if s.group().rank() == 0 {
            let slow = s
                .rpc_async(
                    "worker1",
                    "sleep_then_echo",
                    vec![Value::Int(1000), Value::from("slow")],
                    Kwargs::new(),
                )
                .await
                .unwrap();
            let fast = s
                .rpc_async(
                    "worker1",
                    "sleep_then_echo",
                    vec![Value::Int(0), Value::from("fast")],
                    Kwargs::new(),
                )
                .await
                .unwrap();
            assert!(fast.request_id() > slow.request_id());

            assert_eq!(fast.wait().await.unwrap(), Value::from("fast"));
            assert!(!slow.is_completed());
            assert_eq!(slow.wait().await.unwrap(), Value::from("slow"));
        }
    })
    .await;
}

#[tokio::test]
async fn test_call_by_id_and_self_call() {
    run_workers(3, |s| async move {
        let rank = s.group().rank();
        let next = (rank + 1) % 3;

        let out = s
            .rpc_sync(next, "echo", vec![Value::Int(rank as i64)], Kwargs::new())
            .await
            .unwrap();
        assert_eq!(out, Value::Int(rank as i64));

        // Calling ourselves runs locally.
        let me = s.resolve_worker_id(None).unwrap();
        let out = s
            .rpc_sync(&me, "aten::neg", vec![Value::Int(5)], Kwargs::new())
            .await
            .unwrap();
        assert_eq!(out, Value::Int(-5));
    })
    .await;
}

#[tokio::test]
async fn test_remote_failures_reach_the_caller() {
    run_workers(2, |s| async move {
        if s.group().rank() == 0 {
            let err = s
                .rpc_sync("worker1", "fail", vec![], Kwargs::new())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                RpcError::RemoteExecution { ref worker, ref message }
                    if worker == "worker1" && message == "requested failure"
            ));

            let err = s
                .rpc_sync("worker1", "explode", vec![], Kwargs::new())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                RpcError::RemoteExecution { ref message, .. } if message.contains("explode was called")
            ));

            // Built-in argument errors come back the same way.
            let err = s
                .rpc_sync("worker1", "aten::add", vec![Value::Int(1)], Kwargs::new())
                .await
                .unwrap_err();
            assert!(matches!(err, RpcError::RemoteExecution { .. }));

            // The agent is still usable.
            let out = s
                .rpc_sync("worker1", "echo", vec![Value::Bool(true)], Kwargs::new())
                .await
                .unwrap();
            assert_eq!(out, Value::Bool(true));
        }
    })
    .await;
}

#[tokio::test]
async fn test_dispatch_errors_before_io() {
    run_workers(2, |s| async move {
        let err = s
            .rpc_sync("worker1", "not_registered", vec![], Kwargs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidArgument(_)));

        let err = s
            .rpc_sync("worker1", "", vec![], Kwargs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidArgument(_)));

        let err = s
            .rpc_sync("ghost", "echo", vec![], Kwargs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::NotFound { .. }));

        let err = s
            .rpc_sync(Target::Id(9), "echo", vec![], Kwargs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidRank { rank: 9, world_size: 2 }));

        assert_eq!(s.agent().unwrap().pending_calls().unwrap(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_many_concurrent_calls_between_all_ranks() {
    run_workers(4, |s| async move {
        let rank = s.group().rank();
        let mut handles = Vec::new();
        for peer in 0..4u32 {
            for i in 0..8i64 {
                let h = s
                    .rpc_async(
                        peer,
                        "aten::add",
                        vec![Value::Int(rank as i64 * 100), Value::Int(i)],
                        Kwargs::new(),
                    )
                    .await
                    .unwrap();
                handles.push((i, h));
            }
        }
        for (i, h) in handles {
            let out = tokio::time::timeout(Duration::from_secs(30), h.wait())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(out, Value::Int(rank as i64 * 100 + i));
        }
    })
    .await;
}

#[tokio::test]
async fn test_call_result_accessors() {
    run_workers(1, |s| async move {
        let result = s
            .call("worker0", "echo", vec![Value::Int(1)], Kwargs::new(), true)
            .await
            .unwrap();
        assert!(matches!(result, CallResult::Pending(_)));
        let handle = result.into_handle().unwrap();
        assert_eq!(handle.wait().await.unwrap(), Value::Int(1));
    })
    .await;
}
