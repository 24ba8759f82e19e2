use bytes::Bytes;
use chrono::{DateTime, Utc};
use durable_core::codec::{Decoder, Encoder};
use durable_core::journal::{FunctionKind, Step};
use durable_core::registry::{FunctionRegistry, WorkflowRegistry};
use durable_core::workflow::{LogLevel, Outcome, WorkflowState, WorkflowStatus};
use durable_core::{JsonCodec, StepContext, StepError, WorkflowId};
use durable_persistence::InMemoryStore;
use durable_runtime::{
    Clock, Engine, EngineConfig, EngineError, HANDLER_PANIC_MESSAGE, Heartbeat, InMemoryScheduler,
    ManualClock, PollResult, ScheduledJob, ScheduledStatus, Scheduler, TRANSIENT_FAILURE_MESSAGE,
    Worker,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

struct Harness {
    engine: Engine<InMemoryStore>,
    worker: Worker<InMemoryStore>,
    clock: ManualClock,
    scheduler: InMemoryScheduler,
    store: InMemoryStore,
}

fn functions() -> FunctionRegistry {
    FunctionRegistry::with_codec(Arc::new(JsonCodec))
        .transactional("add_one", |n: u32| async move { anyhow::Ok(n + 1) })
        .transactional("double", |n: u32| async move { anyhow::Ok(n * 2) })
        .transactional("echo", |s: String| async move { anyhow::Ok(s) })
        .untransacted("flaky", |_: u32| async move {
            if true {
                panic!("worker lost");
            }
            anyhow::Ok(0u32)
        })
        .untransacted("notify", |n: u32| async move { anyhow::Ok(n) })
        .build()
}

fn workflows() -> WorkflowRegistry {
    WorkflowRegistry::with_codec(Arc::new(JsonCodec))
        .register_fn("order", |ctx: StepContext<JsonCodec>, n: u32| async move {
            let a: u32 = ctx.run_transactional("add_one", &n).await?;
            ctx.sleep(Duration::from_millis(500)).await?;
            let b: u32 = ctx.run_transactional("double", &a).await?;
            anyhow::Ok(b)
        })
        .register_fn("recovering", |ctx: StepContext<JsonCodec>, n: u32| async move {
            let reply: Result<u32, StepError> = ctx.run_untransacted("flaky", &n).await;
            anyhow::Ok(match reply {
                Ok(v) => format!("ok {}", v),
                Err(e) => format!("recovered: {}", e),
            })
        })
        .register_fn("notify", |ctx: StepContext<JsonCodec>, n: u32| async move {
            let sent: u32 = ctx.run_untransacted("notify", &n).await?;
            anyhow::Ok(sent)
        })
        .register_fn("big", |ctx: StepContext<JsonCodec>, len: usize| async move {
            let payload = "x".repeat(len);
            let reply: Result<String, StepError> = ctx.run_transactional("echo", &payload).await;
            match reply {
                Ok(_) => Ok("journaled".to_string()),
                Err(StepError::JournalOverflow { .. }) => Ok("overflow".to_string()),
                Err(e) => Err(anyhow::Error::from(e)),
            }
        })
        .register_fn("boom", |_ctx: StepContext<JsonCodec>, _: u32| async move {
            if true {
                panic!("handler bug");
            }
            anyhow::Ok(0u32)
        })
        .register_fn("wrong_kind", |ctx: StepContext<JsonCodec>, n: u32| async move {
            let v: u32 = ctx.run_read_only("add_one", &n).await?;
            anyhow::Ok(v)
        })
        .register_fn("clock", |ctx: StepContext<JsonCodec>, _: u32| async move {
            let before = ctx.now();
            ctx.sleep(Duration::from_secs(60)).await?;
            let after = ctx.now();
            anyhow::Ok((before, after))
        })
        .build()
}

fn harness_with(config: EngineConfig) -> Harness {
    let clock = ManualClock::default();
    let scheduler = InMemoryScheduler::new();
    let store = InMemoryStore::new();
    let engine = Engine::new(store.clone(), scheduler.clone(), functions(), workflows())
        .with_clock(clock.clone())
        .with_config(config);
    let worker = Worker::new("test-worker", engine.clone());
    Harness {
        engine,
        worker,
        clock,
        scheduler,
        store,
    }
}

fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

fn args<T: serde::Serialize + 'static>(value: &T) -> Bytes {
    JsonCodec.encode(value).unwrap()
}

async fn output<T>(engine: &Engine<InMemoryStore>, id: &WorkflowId) -> T
where
    JsonCodec: durable_core::codec::sealed::DecodeValue<T>,
{
    match engine.load(id).await.unwrap().state {
        WorkflowState::Completed {
            outcome: Outcome::Success { result, .. },
            ..
        } => JsonCodec.decode(Bytes::from(result)).unwrap(),
        other => panic!("workflow did not succeed: {:?}", other),
    }
}

#[tokio::test]
async fn test_three_step_workflow_completes() {
    let h = harness();
    let id = h.engine.start("order", args(&4u32)).await.unwrap();

    h.worker.run_until_idle().await.unwrap();
    assert_eq!(h.engine.status(&id).await.unwrap(), WorkflowStatus::InProgress);
    let entries = h.engine.entries(&id).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(matches!(&entries[1].step, Step::Sleep(sleep) if sleep.in_progress));

    h.clock.advance(Duration::from_millis(500));
    h.worker.run_until_idle().await.unwrap();

    assert_eq!(h.engine.status(&id).await.unwrap(), WorkflowStatus::Completed);
    assert_eq!(output::<u32>(&h.engine, &id).await, 10);

    let entries = h.engine.entries(&id).await.unwrap();
    let numbers: Vec<_> = entries.iter().map(|e| e.step_number).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    assert!(entries.iter().all(|e| !e.step.in_progress()));
    assert_eq!(h.engine.load(&id).await.unwrap().generation_number, 0);
    assert!(h.scheduler.pending_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn test_sleep_waits_for_deadline() {
    let h = harness();
    let started = h.clock.now();
    let id = h.engine.start("order", args(&1u32)).await.unwrap();
    h.worker.run_until_idle().await.unwrap();
    assert_eq!(
        h.scheduler.next_deadline().unwrap(),
        Some(started + chrono::TimeDelta::milliseconds(500))
    );

    h.clock.advance(Duration::from_millis(499));
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 0);
    assert_eq!(h.engine.status(&id).await.unwrap(), WorkflowStatus::InProgress);

    h.clock.advance(Duration::from_millis(1));
    h.worker.run_until_idle().await.unwrap();
    assert_eq!(h.engine.status(&id).await.unwrap(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_logical_clock_follows_journal() {
    let h = harness();
    let started = h.clock.now();
    let id = h.engine.start("clock", args(&0u32)).await.unwrap();
    h.worker.run_until_idle().await.unwrap();

    h.clock.advance(Duration::from_secs(90));
    h.worker.run_until_idle().await.unwrap();

    let (before, after): (DateTime<Utc>, DateTime<Utc>) = output(&h.engine, &id).await;
    assert_eq!(before, started);
    assert_eq!(after, started + chrono::TimeDelta::seconds(60));
}

#[tokio::test]
async fn test_watchdog_fails_lost_untransacted_step() {
    let h = harness();
    let id = h.engine.start("recovering", args(&1u32)).await.unwrap();

    h.worker.run_until_idle().await.unwrap();
    let entry = h.engine.entries(&id).await.unwrap().remove(0);
    let Step::Function(step) = &entry.step else {
        panic!("expected a function step");
    };
    assert_eq!(step.kind, FunctionKind::Untransacted);
    assert!(step.in_progress);
    assert!(step.recovery_handle.is_some());
    assert_eq!(h.engine.status(&id).await.unwrap(), WorkflowStatus::InProgress);

    h.clock.advance(Duration::from_secs(10));
    h.worker.run_until_idle().await.unwrap();

    let workflow = h.engine.load(&id).await.unwrap();
    assert_eq!(workflow.generation_number, 1);
    assert_eq!(workflow.status(), WorkflowStatus::Completed);
    assert_eq!(
        output::<String>(&h.engine, &id).await,
        format!("recovered: {}", TRANSIENT_FAILURE_MESSAGE)
    );

    let entry = h.engine.entries(&id).await.unwrap().remove(0);
    let Step::Function(step) = &entry.step else {
        panic!("expected a function step");
    };
    assert_eq!(step.outcome, Some(Outcome::error(TRANSIENT_FAILURE_MESSAGE)));
    assert!(step.recovery_handle.is_none());
}

#[tokio::test]
async fn test_heartbeat_canceled_when_untransacted_step_finishes() {
    let h = harness();
    let id = h.engine.start("notify", args(&7u32)).await.unwrap();

    // Capture the heartbeat before the worker runs the step.
    assert!(matches!(h.engine.poll(&id, 0).await.unwrap(), PollResult::Suspended(_)));
    let entry = h.engine.entries(&id).await.unwrap().remove(0);
    let Step::Function(step) = &entry.step else {
        panic!("expected a function step");
    };
    let heartbeat = step.recovery_handle.clone().unwrap();

    h.worker.run_until_idle().await.unwrap();

    assert_eq!(output::<u32>(&h.engine, &id).await, 7);
    assert_eq!(
        h.scheduler.status(&heartbeat).await.unwrap(),
        Some(ScheduledStatus::Canceled)
    );
    assert_eq!(h.engine.load(&id).await.unwrap().generation_number, 0);
}

fn run_of(scheduler: &InMemoryScheduler) -> durable_core::ScheduledId {
    scheduler
        .pending_jobs()
        .unwrap()
        .into_iter()
        .find_map(|(id, _, job)| matches!(job, ScheduledJob::RunFunction { .. }).then_some(id))
        .expect("no pending run")
}

#[tokio::test]
async fn test_heartbeat_rescheduled_while_run_is_live() {
    let h = harness();
    let id = h.engine.start("notify", args(&3u32)).await.unwrap();
    let PollResult::Suspended(entry) = h.engine.poll(&id, 0).await.unwrap() else {
        panic!("expected the poll to suspend");
    };
    let run_id = run_of(&h.scheduler);

    let Heartbeat::Rescheduled(next) = h.engine.recover(&id, 0, &entry.id, &run_id).await.unwrap()
    else {
        panic!("expected the heartbeat to be rescheduled");
    };
    let entry = h.engine.entries(&id).await.unwrap().remove(0);
    let Step::Function(step) = &entry.step else {
        panic!("expected a function step");
    };
    assert_eq!(step.recovery_handle, Some(next.clone()));
    assert!(step.in_progress);

    h.worker.run_until_idle().await.unwrap();
    assert_eq!(output::<u32>(&h.engine, &id).await, 3);
    assert_eq!(h.scheduler.status(&next).await.unwrap(), Some(ScheduledStatus::Canceled));
    assert_eq!(h.engine.load(&id).await.unwrap().generation_number, 0);

    // The first heartbeat still fires and finds nothing to do.
    h.clock.advance(Duration::from_secs(10));
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);
    assert_eq!(h.engine.status(&id).await.unwrap(), WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_heartbeat_stops_when_run_is_unknown() {
    let h = harness();
    let id = h.engine.start("notify", args(&3u32)).await.unwrap();
    let PollResult::Suspended(entry) = h.engine.poll(&id, 0).await.unwrap() else {
        panic!("expected the poll to suspend");
    };
    let run_id = run_of(&h.scheduler);
    h.scheduler.forget(&run_id).unwrap();

    let before = h.engine.entries(&id).await.unwrap();
    let heartbeat = h.engine.recover(&id, 0, &entry.id, &run_id).await.unwrap();
    assert_eq!(heartbeat, Heartbeat::RunMissing);

    assert_eq!(h.engine.entries(&id).await.unwrap(), before);
    let workflow = h.engine.load(&id).await.unwrap();
    assert_eq!(workflow.generation_number, 0);
    assert_eq!(workflow.status(), WorkflowStatus::InProgress);
}

#[tokio::test]
async fn test_journal_overflow_is_catchable() {
    let h = harness_with(EngineConfig::default().with_max_journal_size(128));
    let id = h.engine.start("big", args(&200usize)).await.unwrap();

    h.worker.run_until_idle().await.unwrap();

    assert_eq!(output::<String>(&h.engine, &id).await, "overflow");
    assert!(h.engine.entries(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_small_payload_fits_journal() {
    let h = harness_with(EngineConfig::default().with_max_journal_size(1024));
    let id = h.engine.start("big", args(&10usize)).await.unwrap();

    h.worker.run_until_idle().await.unwrap();

    assert_eq!(output::<String>(&h.engine, &id).await, "journaled");
    assert_eq!(h.engine.entries(&id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_turns_pending_continuations_into_no_ops() {
    let h = harness();
    let id = h.engine.start("order", args(&1u32)).await.unwrap();
    h.worker.run_until_idle().await.unwrap();

    h.engine.cancel(&id).await.unwrap();
    let workflow = h.engine.load(&id).await.unwrap();
    assert_eq!(workflow.generation_number, 1);
    assert_eq!(workflow.status(), WorkflowStatus::Canceled);

    h.clock.advance(Duration::from_secs(1));
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);

    assert_eq!(h.engine.status(&id).await.unwrap(), WorkflowStatus::Canceled);
    let sleep = h.engine.entries(&id).await.unwrap().remove(1);
    assert!(sleep.step.in_progress());

    let again = h.engine.cancel(&id).await;
    assert!(matches!(again, Err(EngineError::InvalidState(_))));

    let late = h
        .engine
        .complete(&id, 0, Outcome::success(b"1".to_vec()), Utc::now())
        .await;
    assert!(matches!(late, Err(EngineError::InvalidState(_))));
}

#[tokio::test]
async fn test_cleanup_requires_terminal_workflow() {
    let h = harness();
    let id = h.engine.start("order", args(&1u32)).await.unwrap();
    h.worker.run_until_idle().await.unwrap();

    assert!(!h.engine.cleanup(&id).await.unwrap());
    assert_eq!(h.store.workflow_count().unwrap(), 1);
    assert_eq!(h.store.entry_count().unwrap(), 2);

    h.clock.advance(Duration::from_secs(1));
    h.worker.run_until_idle().await.unwrap();
    assert_eq!(h.engine.status(&id).await.unwrap(), WorkflowStatus::Completed);

    assert!(h.engine.cleanup(&id).await.unwrap());
    assert_eq!(h.store.workflow_count().unwrap(), 0);
    assert_eq!(h.store.entry_count().unwrap(), 0);

    assert!(!h.engine.cleanup(&id).await.unwrap());
    assert!(matches!(h.engine.status(&id).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_cleanup_of_canceled_workflow() {
    let h = harness();
    let id = h.engine.start("order", args(&1u32)).await.unwrap();
    h.engine.cancel(&id).await.unwrap();

    assert!(h.engine.cleanup(&id).await.unwrap());
    assert_eq!(h.store.workflow_count().unwrap(), 0);
}

#[tokio::test]
async fn test_jobs_for_cleaned_up_workflow_are_no_ops() {
    let h = harness();
    let id = h.engine.start("order", args(&1u32)).await.unwrap();
    h.worker.run_until_idle().await.unwrap();
    let (sleep_job, _, _) = h
        .scheduler
        .pending_jobs()
        .unwrap()
        .into_iter()
        .find(|(_, _, job)| matches!(job, ScheduledJob::CompleteSleep { .. }))
        .unwrap();

    h.engine.cancel(&id).await.unwrap();
    assert!(h.engine.cleanup(&id).await.unwrap());

    h.clock.advance(Duration::from_secs(1));
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);
    assert_eq!(
        h.scheduler.status(&sleep_job).await.unwrap(),
        Some(ScheduledStatus::Succeeded)
    );
    assert_eq!(h.store.workflow_count().unwrap(), 0);
    assert_eq!(h.store.entry_count().unwrap(), 0);

    let poll = ScheduledJob::Poll {
        workflow_id: id.clone(),
        generation_number: 1,
    };
    h.engine.execute(&poll).await.unwrap();
}

#[tokio::test]
async fn test_nondeterministic_handler_is_a_replay_mismatch() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let workflows = WorkflowRegistry::with_codec(Arc::new(JsonCodec))
        .register_fn("counter", move |ctx: StepContext<JsonCodec>, _: u32| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let v: u32 = ctx.run_transactional("add_one", &n).await?;
                anyhow::Ok(v)
            }
        })
        .build();
    let engine = Engine::new(InMemoryStore::new(), InMemoryScheduler::new(), functions(), workflows)
        .with_clock(ManualClock::default());

    let id = engine.start("counter", args(&0u32)).await.unwrap();
    let PollResult::Suspended(entry) = engine.poll(&id, 0).await.unwrap() else {
        panic!("expected the poll to suspend");
    };

    let result = engine.run_function(&id, 0, &entry.id).await;
    assert!(matches!(result, Err(EngineError::ReplayMismatch { step_number: 0, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_redundant_polls_are_no_ops() {
    let h = harness();
    let id = h.engine.start("order", args(&1u32)).await.unwrap();

    let workflow = h.engine.load(&id).await.unwrap();
    assert_eq!(h.engine.poll(&id, 3).await.unwrap(), PollResult::StaleGeneration);
    assert_eq!(h.engine.load(&id).await.unwrap(), workflow);
    assert_eq!(h.store.entry_count().unwrap(), 0);
    assert_eq!(h.scheduler.pending_jobs().unwrap().len(), 1);

    let PollResult::Suspended(entry) = h.engine.poll(&id, 0).await.unwrap() else {
        panic!("expected the poll to suspend");
    };
    assert_eq!(h.engine.poll(&id, 0).await.unwrap(), PollResult::Outstanding(entry.id.clone()));

    // The first poll job is still queued; it must not add a second step.
    h.worker.run_until_idle().await.unwrap();
    let entries = h.engine.entries(&id).await.unwrap();
    let in_progress = entries.iter().filter(|e| e.step.in_progress()).count();
    assert_eq!(in_progress, 1);

    h.engine.cancel(&id).await.unwrap();
    assert_eq!(h.engine.poll(&id, 1).await.unwrap(), PollResult::Terminal);
}

#[tokio::test]
async fn test_stale_step_completion_is_dropped() {
    let h = harness();
    let id = h.engine.start("order", args(&1u32)).await.unwrap();
    let PollResult::Suspended(entry) = h.engine.poll(&id, 0).await.unwrap() else {
        panic!("expected the poll to suspend");
    };

    h.engine.run_function(&id, 0, &entry.id).await.unwrap();
    let twice = h.engine.run_function(&id, 0, &entry.id).await;
    assert!(matches!(twice, Err(EngineError::InvalidState(_))));

    let missing = h.engine.poll(&WorkflowId::new("missing"), 0).await;
    assert!(matches!(missing, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_handler_panic_fails_workflow() {
    let h = harness();
    let id = h.engine.start("boom", args(&0u32)).await.unwrap();

    h.worker.run_until_idle().await.unwrap();

    assert_eq!(
        h.engine.status(&id).await.unwrap(),
        WorkflowStatus::Failed(HANDLER_PANIC_MESSAGE.to_string())
    );
}

#[tokio::test]
async fn test_kind_mismatch_fails_workflow() {
    let h = harness();
    let id = h.engine.start("wrong_kind", args(&1u32)).await.unwrap();

    h.worker.run_until_idle().await.unwrap();

    match h.engine.status(&id).await.unwrap() {
        WorkflowStatus::Failed(message) => {
            assert!(message.contains("registered as transactional but was called as readOnly"))
        }
        other => panic!("expected a failure, got {}", other),
    }
}

#[tokio::test]
async fn test_start_validation() {
    let h = harness();

    let unknown = h.engine.start("missing", args(&1u32)).await;
    assert!(matches!(unknown, Err(EngineError::Validation(_))));

    let bad_args = h.engine.start("order", Bytes::from_static(b"not json")).await;
    assert!(matches!(bad_args, Err(EngineError::Validation(_))));

    let bad_level = h.engine.create("order", args(&1u32), Some("loud")).await;
    assert!(matches!(bad_level, Err(EngineError::Validation(_))));

    assert_eq!(h.store.workflow_count().unwrap(), 0);
    assert!(h.scheduler.pending_jobs().unwrap().is_empty());

    let id = h.engine.create("order", args(&1u32), Some("debug")).await.unwrap();
    let workflow = h.engine.load(&id).await.unwrap();
    assert_eq!(workflow.log_level, LogLevel::Debug);
    assert_eq!(workflow.generation_number, 0);
    assert_eq!(h.scheduler.pending_jobs().unwrap().len(), 1);
}
