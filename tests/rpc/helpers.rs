use rankcall::{Backend, Kwargs, ProcessGroup, RpcConfig, Session, Value};
use std::sync::Arc;
use std::time::Duration;

/// Register the functions every test worker exposes.
pub fn register_test_functions(session: &Session) {
    session
        .register_function("echo", |args: &[Value], _: &Kwargs| {
            Ok(args.first().cloned().unwrap_or(Value::None))
        })
        .unwrap();

    // sleep_then_echo(ms, value)
    session
        .register_function("sleep_then_echo", |args: &[Value], _: &Kwargs| {
            let ms = args
                .first()
                .and_then(Value::as_i64)
                .ok_or("first argument must be a delay in ms")?;
            std::thread::sleep(Duration::from_millis(ms as u64));
            Ok(args.get(1).cloned().unwrap_or(Value::None))
        })
        .unwrap();

    session
        .register_function("fail", |_: &[Value], _: &Kwargs| {
            Err("requested failure".to_string())
        })
        .unwrap();

    session
        .register_function("explode", |_: &[Value], _: &Kwargs| -> Result<Value, String> {
            panic!("explode was called")
        })
        .unwrap();

    // blob(n): n zero bytes
    session
        .register_function("blob", |args: &[Value], _: &Kwargs| {
            let n = args.first().and_then(Value::as_i64).ok_or("need a length")?;
            Ok(Value::Bytes(vec![0; n as usize]))
        })
        .unwrap();

    // join(*parts, sep=...)
    session
        .register_function("join", |args: &[Value], kwargs: &Kwargs| {
            let sep = kwargs.get("sep").and_then(Value::as_str).unwrap_or(",");
            let parts: Vec<&str> = args.iter().filter_map(Value::as_str).collect();
            Ok(Value::Str(parts.join(sep)))
        })
        .unwrap();
}

/// Name used for rank `r` by `run_workers`.
pub fn worker_name(rank: u32) -> String {
    format!("worker{rank}")
}

/// Bootstrap `world_size` sessions, one per rank, without initializing them.
pub async fn local_sessions(world_size: u32) -> Vec<Arc<Session>> {
    local_sessions_with(world_size, RpcConfig::default()).await
}

pub async fn local_sessions_with(world_size: u32, config: RpcConfig) -> Vec<Arc<Session>> {
    ProcessGroup::bootstrap_local(world_size, config)
        .await
        .unwrap()
        .into_iter()
        .map(|group| {
            let session = Session::new(Arc::new(group));
            register_test_functions(&session);
            Arc::new(session)
        })
        .collect()
}

/// Initialize every session as `worker{rank}`, concurrently.
pub async fn initialize_all(sessions: &[Arc<Session>]) {
    let mut handles = Vec::new();
    for s in sessions {
        let s = Arc::clone(s);
        handles.push(tokio::spawn(async move {
            let name = worker_name(s.group().rank());
            s.initialize(&name, Backend::ProcessGroup).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
}

/// Run `f` on every rank of a fresh group: initialize as `worker{rank}`,
/// run the body, then shut down. Keeps all sessions alive until every task
/// completes.
pub async fn run_workers<F, Fut>(world_size: u32, f: F)
where
    F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    run_workers_with(world_size, RpcConfig::default(), f).await;
}

pub async fn run_workers_with<F, Fut>(world_size: u32, config: RpcConfig, f: F)
where
    F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let sessions = local_sessions_with(world_size, config).await;

    let f = Arc::new(f);
    let mut handles = Vec::new();
    for s in &sessions {
        let s = Arc::clone(s);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move {
            let name = worker_name(s.group().rank());
            s.initialize(&name, Backend::ProcessGroup).await.unwrap();
            f(Arc::clone(&s)).await;
            s.shutdown_and_join().await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}
