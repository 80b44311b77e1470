use super::helpers::{local_sessions, run_workers, worker_name};
use rankcall::{Backend, RpcError, WorkerId};
use std::sync::Arc;

#[tokio::test]
async fn test_two_workers_resolve_each_other() {
    run_workers(2, |s| async move {
        assert_eq!(s.resolve_worker_id(Some("worker0")).unwrap(), WorkerId::new("worker0", 0));
        assert_eq!(s.resolve_worker_id(Some("worker1")).unwrap(), WorkerId::new("worker1", 1));

        let me = s.resolve_worker_id(None).unwrap();
        assert_eq!(me.id, s.group().rank());
        assert_eq!(me.name, worker_name(s.group().rank()));
    })
    .await;
}

#[tokio::test]
async fn test_unknown_name_not_found() {
    run_workers(2, |s| async move {
        let err = s.resolve_worker_id(Some("worker7")).unwrap_err();
        assert!(matches!(err, RpcError::NotFound { ref name } if name == "worker7"));
    })
    .await;
}

#[tokio::test]
async fn test_name_tables_identical_on_every_rank() {
    // Uneven lengths, an empty name and a multi-byte name.
    let names = ["trainer", "", "parameter-server-ü", "ps1"];
    let sessions = local_sessions(4).await;

    let mut handles = Vec::new();
    for s in &sessions {
        let s = Arc::clone(s);
        handles.push(tokio::spawn(async move {
            let name = names[s.group().rank() as usize];
            s.initialize(name, Backend::ProcessGroup).await.unwrap();
            let table: Vec<(String, u32)> = s
                .agent()
                .unwrap()
                .workers()
                .iter()
                .map(|w| (w.name.clone(), w.id))
                .collect();
            s.shutdown_and_join().await.unwrap();
            table
        }));
    }

    let expected: Vec<(String, u32)> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.to_string(), i as u32))
        .collect();
    for h in handles {
        assert_eq!(h.await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_duplicate_names_last_rank_wins() {
    let sessions = local_sessions(3).await;

    let mut handles = Vec::new();
    for s in &sessions {
        let s = Arc::clone(s);
        handles.push(tokio::spawn(async move {
            let name = if s.group().rank() == 1 { "solo" } else { "dup" };
            s.initialize(name, Backend::ProcessGroup).await.unwrap();
            let resolved = s.resolve_worker_id(Some("dup")).unwrap();
            s.shutdown_and_join().await.unwrap();
            resolved
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap(), WorkerId::new("dup", 2));
    }
}
