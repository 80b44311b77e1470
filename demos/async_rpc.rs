//! Asynchronous calls: fire several requests, collect them as they finish.
//!
//! Four workers. Every worker sends one slow and one fast call to its right
//! neighbour, waits on the fast one first, then the slow one. All workers
//! serve incoming calls while waiting on their own.
//!
//! ```bash
//! cargo run --example async_rpc
//! ```

use rankcall::{Backend, Kwargs, ProcessGroup, RpcConfig, Session, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const WORLD_SIZE: u32 = 4;

#[tokio::main]
async fn main() -> rankcall::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let groups = ProcessGroup::bootstrap_local(WORLD_SIZE, RpcConfig::default()).await?;

    let mut workers = Vec::new();
    for group in groups {
        let session = Arc::new(Session::new(Arc::new(group)));
        workers.push(tokio::spawn(run_worker(session)));
    }
    for worker in workers {
        worker
            .await
            .map_err(|e| rankcall::RpcError::transport(format!("worker panicked: {e}")))??;
    }
    Ok(())
}

async fn run_worker(session: Arc<Session>) -> rankcall::Result<()> {
    session.register_function("nap", |args: &[Value], _: &Kwargs| {
        let ms = args.first().and_then(Value::as_i64).ok_or("need a duration")?;
        std::thread::sleep(Duration::from_millis(ms as u64));
        Ok(Value::Int(ms))
    })?;

    let rank = session.group().rank();
    session
        .initialize(&format!("worker{rank}"), Backend::ProcessGroup)
        .await?;

    let right = (rank + 1) % WORLD_SIZE;
    let start = Instant::now();
    let slow = session
        .rpc_async(right, "nap", vec![Value::Int(500)], Kwargs::new())
        .await?;
    let fast = session
        .rpc_async(right, "nap", vec![Value::Int(50)], Kwargs::new())
        .await?;
    println!("worker{rank}: two requests sent in {:?}", start.elapsed());

    let v = fast.wait().await?;
    println!(
        "worker{rank}: fast call #{} => {v:?} after {:?} (slow done: {})",
        fast.request_id(),
        start.elapsed(),
        slow.is_completed()
    );
    let v = slow.wait().await?;
    println!("worker{rank}: slow call #{} => {v:?} after {:?}", slow.request_id(), start.elapsed());

    session.shutdown_and_join().await
}
