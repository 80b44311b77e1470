use rankcall::{Backend, Kwargs, RpcConfig, RpcError, SyncSession, Value};

fn register(session: &SyncSession) {
    session
        .register_function("square", |args: &[Value], _: &Kwargs| {
            let x = args.first().and_then(Value::as_f64).ok_or("need a number")?;
            Ok(Value::Float(x * x))
        })
        .unwrap();
}

#[test]
fn test_sync_session_from_native_threads() {
    let sessions = SyncSession::bootstrap_local(3, RpcConfig::default()).unwrap();
    for s in &sessions {
        register(s);
    }

    std::thread::scope(|scope| {
        for s in &sessions {
            scope.spawn(move || {
                let rank = s.session().group().rank();
                s.initialize(&format!("native{rank}"), Backend::ProcessGroup)
                    .unwrap();

                let next = format!("native{}", (rank + 1) % 3);
                let out = s
                    .rpc_sync(next.as_str(), "square", vec![Value::Int(rank as i64 + 1)], Kwargs::new())
                    .unwrap();
                assert_eq!(out, Value::Float(((rank + 1) * (rank + 1)) as f64));

                let handle = s
                    .rpc_async(next.as_str(), "aten::ones", vec![Value::Int(2)], Kwargs::new())
                    .unwrap();
                assert_eq!(handle.wait_blocking().unwrap(), Value::Tensor(vec![1.0, 1.0]));

                assert_eq!(s.resolve_worker_id(None).unwrap().name, format!("native{rank}"));
                s.barrier_sync().unwrap();
                s.shutdown_and_join().unwrap();
            });
        }
    });
}

#[test]
fn test_sync_session_not_initialized() {
    let sessions = SyncSession::bootstrap_local(1, RpcConfig::default()).unwrap();
    let err = sessions[0]
        .rpc_sync(0u32, "aten::neg", vec![Value::Int(1)], Kwargs::new())
        .unwrap_err();
    assert!(matches!(err, RpcError::NotInitialized));
    sessions[0].shutdown_and_join().unwrap();
}
