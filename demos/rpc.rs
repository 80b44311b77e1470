//! Remote procedure calls between named workers.
//!
//! Two workers in one process. Each registers a "scale" function; worker0
//! calls a built-in and the user function on worker1, then both join.
//!
//! ```bash
//! RUST_LOG=rankcall=debug cargo run --example rpc
//! ```

use rankcall::{Backend, Kwargs, ProcessGroup, RpcConfig, Session, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> rankcall::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let sessions: Vec<Arc<Session>> = ProcessGroup::bootstrap_local(2, RpcConfig::default())
        .await?
        .into_iter()
        .map(|group| Arc::new(Session::new(Arc::new(group))))
        .collect();

    let mut workers = Vec::new();
    for session in &sessions {
        let session = Arc::clone(session);
        workers.push(tokio::spawn(async move { run_worker(session).await }));
    }
    for worker in workers {
        worker
            .await
            .map_err(|e| rankcall::RpcError::transport(format!("worker panicked: {e}")))??;
    }
    Ok(())
}

async fn run_worker(session: Arc<Session>) -> rankcall::Result<()> {
    // scale(tensor, factor=2.0)
    session.register_function("scale", |args: &[Value], kwargs: &Kwargs| {
        let t = args.first().and_then(Value::as_tensor).ok_or("need a tensor")?;
        let factor = kwargs.get("factor").and_then(Value::as_f64).unwrap_or(2.0);
        Ok(Value::Tensor(t.iter().map(|x| x * factor).collect()))
    })?;

    let rank = session.group().rank();
    session
        .initialize(&format!("worker{rank}"), Backend::ProcessGroup)
        .await?;

    if rank == 0 {
        let sum = session
            .rpc_sync(
                "worker1",
                "aten::add",
                vec![Value::Tensor(vec![1.0, 1.0]), Value::Int(3)],
                Kwargs::new(),
            )
            .await?;
        println!("worker0 called aten::add([1, 1], 3) on worker1 => {sum:?}");
        // Output: worker0 called aten::add([1, 1], 3) on worker1 => Tensor([4.0, 4.0])

        let mut kwargs = Kwargs::new();
        kwargs.insert("factor".into(), Value::Float(10.0));
        let scaled = session
            .rpc_sync("worker1", "scale", vec![Value::Tensor(vec![0.5, 1.5])], kwargs)
            .await?;
        println!("worker0 called scale([0.5, 1.5], factor=10) on worker1 => {scaled:?}");
    }

    session.shutdown_and_join().await
}
