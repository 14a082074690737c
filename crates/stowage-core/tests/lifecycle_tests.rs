//! Orchestrator lifecycle tests: duplicate starts, cancellation, pause and
//! shutdown.

mod common;

use common::{assert_quiet, source, until_terminal, wait_idle, Harness, ScriptedTransport};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::{CatalogStore, DownloadEvent, SourceLocator, StartOutcome, StowageError};
use tokio::sync::Notify;

fn held_harness(gate: Arc<Notify>) -> Harness {
    Harness::new(
        ScriptedTransport::delivering(200_000)
            .with_chunk_size(200_000)
            .held(gate),
    )
}

/// Wait until every scripted transfer has cleaned up its temp file.
async fn wait_incoming_empty(harness: &Harness) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !harness.incoming_files().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("temp files were not removed");
}

async fn first_progress(events: &mut stowage_core::Subscription) {
    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, DownloadEvent::Progress { .. }), "{:?}", event);
}

#[tokio::test]
async fn test_second_start_is_idempotent() {
    let gate = Arc::new(Notify::new());
    let harness = held_harness(gate.clone());
    let source = source("model.gguf");
    let mut events = harness.orchestrator.subscribe_to(source.clone());

    let first = harness.orchestrator.start(&source).unwrap();
    let second = harness.orchestrator.start(&source).unwrap();

    assert!(first.is_new());
    assert_eq!(second, StartOutcome::AlreadyActive(first.task_id().clone()));
    assert_eq!(harness.orchestrator.list().count(), 1);

    gate.notify_one();
    let (_, terminal) = until_terminal(&mut events).await;
    assert!(matches!(terminal, DownloadEvent::Completed { .. }));
    assert_eq!(harness.transport.calls(), 1);
    assert_quiet(&mut events).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_create_one_task() {
    let gate = Arc::new(Notify::new());
    let harness = held_harness(gate);
    let source = source("model.gguf");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let orchestrator = Arc::clone(&harness.orchestrator);
        let source = source.clone();
        handles.push(tokio::spawn(async move { orchestrator.start(&source) }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(outcomes.iter().filter(|o| o.is_new()).count(), 1);
    let id = outcomes[0].task_id();
    assert!(outcomes.iter().all(|o| o.task_id() == id));
    assert_eq!(harness.orchestrator.active_count(), 1);

    assert!(harness.orchestrator.cancel(&source));
}

#[tokio::test]
async fn test_distinct_sources_run_side_by_side() {
    let gate = Arc::new(Notify::new());
    let harness = held_harness(gate);
    let a = source("a.gguf");
    let b = source("b.gguf");

    assert!(harness.orchestrator.start(&a).unwrap().is_new());
    assert!(harness.orchestrator.start(&b).unwrap().is_new());

    let listed: Vec<_> = harness.orchestrator.list().map(|s| s.source).collect();
    assert_eq!(listed, vec![a, b]);
}

#[tokio::test]
async fn test_sources_sharing_a_file_name_do_not_race() {
    let gate = Arc::new(Notify::new());
    let harness = held_harness(gate.clone());
    let primary = SourceLocator::parse("https://primary.example/x/model.gguf").unwrap();
    let backup = SourceLocator::parse("https://backup.example/y/model.gguf").unwrap();
    let mut events = harness.orchestrator.subscribe();

    assert!(harness.orchestrator.start(&primary).unwrap().is_new());
    match harness.orchestrator.start(&backup) {
        Err(StowageError::DestinationBusy {
            path,
            active_source,
        }) => {
            assert_eq!(path, harness.models_dir().join("model.gguf"));
            assert_eq!(active_source, primary.to_string());
        }
        other => panic!("expected DestinationBusy, got {:?}", other),
    }
    assert_eq!(harness.orchestrator.active_count(), 1);

    gate.notify_one();
    let (_, terminal) = until_terminal(&mut events).await;
    let artifact_id = match terminal {
        DownloadEvent::Completed {
            source,
            artifact_id,
            ..
        } => {
            assert_eq!(source, primary);
            artifact_id
        }
        other => panic!("unexpected terminal event {:?}", other),
    };

    let records = harness.orchestrator.catalog().list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, artifact_id);

    // Once the primary is done the backup may reinstall the file.
    assert!(harness.orchestrator.start(&backup).unwrap().is_new());
    assert!(harness.orchestrator.cancel(&backup));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_completion_leaves_no_orphans() {
    let gate = Arc::new(Notify::new());
    let harness = held_harness(gate.clone());
    let catalog = harness.orchestrator.catalog().clone();
    let mut completed = Vec::new();

    for i in 0..20 {
        let name = format!("model-{}.gguf", i);
        let source = source(&name);
        let mut events = harness.orchestrator.subscribe_to(source.clone());

        harness.orchestrator.start(&source).unwrap();
        first_progress(&mut events).await;
        gate.notify_one();
        for _ in 0..i {
            tokio::task::yield_now().await;
        }

        if !harness.orchestrator.cancel(&source) {
            let (_, terminal) = until_terminal(&mut events).await;
            let artifact_id = match terminal {
                DownloadEvent::Completed { artifact_id, .. } => artifact_id,
                other => panic!("unexpected terminal event {:?}", other),
            };
            assert_eq!(catalog.query_by_name(&name).unwrap().unwrap().id, artifact_id);
            completed.push(name);
        }
    }
    completed.sort();

    // Cancelled installs are rolled back by their drivers in the background.
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut catalogued: Vec<String> =
                catalog.list().unwrap().into_iter().map(|r| r.name).collect();
            catalogued.sort();
            let mut on_disk: Vec<String> = std::fs::read_dir(harness.models_dir())
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            on_disk.sort();
            if catalogued == completed && on_disk == completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cancelled installs left files or records behind");
}

#[tokio::test]
async fn test_cancel_installs_nothing() {
    let gate = Arc::new(Notify::new());
    let harness = held_harness(gate);
    let source = source("model.gguf");
    let mut events = harness.orchestrator.subscribe_to(source.clone());

    harness.orchestrator.start(&source).unwrap();
    first_progress(&mut events).await;

    assert!(harness.orchestrator.cancel(&source));
    assert_eq!(
        events.recv().await,
        Some(DownloadEvent::Cancelled {
            source: source.clone(),
            paused: false,
        })
    );
    assert!(!harness.orchestrator.is_active(&source));
    assert!(!harness.orchestrator.cancel(&source));

    wait_incoming_empty(&harness).await;
    assert_quiet(&mut events).await;
    assert!(!harness.models_dir().join("model.gguf").exists());
    assert!(harness.orchestrator.catalog().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_no_progress_after_cancel() {
    let harness = Harness::new(ScriptedTransport::delivering(5_000_000).with_chunk_size(10_000));
    let source = source("model.gguf");
    let mut events = harness.orchestrator.subscribe_to(source.clone());

    harness.orchestrator.start(&source).unwrap();
    first_progress(&mut events).await;
    harness.orchestrator.cancel(&source);

    let (_, terminal) = until_terminal(&mut events).await;
    assert!(matches!(terminal, DownloadEvent::Cancelled { .. }));
    wait_incoming_empty(&harness).await;
    assert_quiet(&mut events).await;
    assert!(harness.orchestrator.catalog().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_pause_then_restart_from_zero() {
    let gate = Arc::new(Notify::new());
    let harness = held_harness(gate.clone());
    let source = source("model.gguf");
    let mut events = harness.orchestrator.subscribe_to(source.clone());

    let first = harness.orchestrator.start(&source).unwrap();
    first_progress(&mut events).await;

    assert!(harness.orchestrator.pause(&source));
    assert_eq!(
        events.recv().await,
        Some(DownloadEvent::Cancelled {
            source: source.clone(),
            paused: true,
        })
    );
    wait_incoming_empty(&harness).await;

    let second = harness.orchestrator.start(&source).unwrap();
    assert!(second.is_new());
    assert_ne!(first.task_id(), second.task_id());
    first_progress(&mut events).await;

    gate.notify_one();
    let (_, terminal) = until_terminal(&mut events).await;
    assert!(matches!(terminal, DownloadEvent::Completed { .. }));
    assert_eq!(harness.transport.calls(), 2);
}

#[tokio::test]
async fn test_shutdown_cancels_and_refuses_new_work() {
    let gate = Arc::new(Notify::new());
    let harness = held_harness(gate);
    let a = source("a.gguf");
    let b = source("b.gguf");
    let mut events = harness.orchestrator.subscribe();

    harness.orchestrator.start(&a).unwrap();
    harness.orchestrator.start(&b).unwrap();
    first_progress(&mut events).await;
    first_progress(&mut events).await;

    harness.orchestrator.shutdown().await;

    let mut cancelled = Vec::new();
    while let Some(event) = events.try_recv() {
        match event {
            DownloadEvent::Cancelled { source, paused } => {
                assert!(!paused);
                cancelled.push(source);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    cancelled.sort();
    assert_eq!(cancelled, vec![a.clone(), b]);

    assert!(harness.orchestrator.is_shut_down());
    assert_eq!(harness.orchestrator.active_count(), 0);
    assert!(harness.incoming_files().is_empty());
    assert!(matches!(
        harness.orchestrator.start(&a),
        Err(StowageError::ShutDown)
    ));

    // A second shutdown is a no-op.
    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_failed_task_leaves_active_set() {
    let harness = Harness::new(ScriptedTransport::delivering(200_000).failing("reset"));
    let source = source("model.gguf");

    harness.orchestrator.start(&source).unwrap();
    wait_idle(&harness.orchestrator).await;

    assert!(harness.orchestrator.start(&source).unwrap().is_new());
}

#[test]
fn test_start_outside_runtime_is_rejected() {
    let harness = Harness::new(ScriptedTransport::delivering(200_000));
    let err = harness.orchestrator.start(&source("model.gguf")).unwrap_err();
    assert!(matches!(err, StowageError::Config { .. }));
}
