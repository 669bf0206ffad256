//! Job queue actor: FIFO dispatch, failure capture and events.

mod common;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    CancellationToken, EntityHandle, FnProcessor, JOB_QUEUE_KEY, JobActor, JobQueueActor,
    JobQueueConfig, JobQueueState, ProcessorRegistry, ProcessorResult, RuntimeConfig, job_key,
};
use chrono::Utc;
use common::{TestResult, quiet_config, with_queue};
use serde_json::json;
use tenancy_core::{Job, JobEvent, JobId, JobRequest, JobStatus, StateKey, StateStore, TenantId};

fn recording_registry(seen: Arc<Mutex<Vec<String>>>) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::new();
    registry
        .register(FnProcessor::new("record", move |job, _| {
            let seen = seen.clone();
            Box::pin(async move {
                let name = job.payload["name"].as_str().unwrap_or_default().to_string();
                seen.lock().unwrap().push(name);
                Ok::<_, String>(())
            })
        }))
        .register(FnProcessor::new("fail", |job, _| {
            Box::pin(async move {
                Err::<(), _>(format!(
                    "cannot handle {}",
                    job.payload["name"].as_str().unwrap_or_default()
                ))
            })
        }))
        .register(FnProcessor::new("panic", |job, _| Box::pin(explode(job))));
    registry
}

async fn explode(_job: Job) -> ProcessorResult {
    panic!("processor exploded")
}

async fn queue(fixture: &common::Fixture) -> Result<EntityHandle<JobQueueActor>, actors::ActorError> {
    fixture
        .runtime
        .get_or_activate::<JobQueueActor>(JOB_QUEUE_KEY)
        .await
}

#[tokio::test]
async fn jobs_run_in_enqueue_order() -> TestResult {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (fixture, _) = with_queue(recording_registry(seen.clone()));
    let queue = queue(&fixture).await?;
    let tenant = TenantId::new();

    let mut ids = Vec::new();
    for name in ["A", "B", "C"] {
        ids.push(
            queue
                .enqueue(JobRequest::new("record", tenant, json!({ "name": name })))
                .await?,
        );
    }
    let queued = queue.get_jobs(tenant).await?;
    assert!(queued.iter().all(|job| job.status == JobStatus::Queued));

    for expected in &ids {
        assert_eq!(queue.process_next().await?, Some(*expected));
    }
    assert_eq!(queue.process_next().await?, None);

    assert_eq!(*seen.lock().unwrap(), vec!["A", "B", "C"]);
    let jobs = queue.get_jobs(tenant).await?;
    assert_eq!(jobs.iter().map(|j| j.id).collect::<Vec<_>>(), ids);
    for job in &jobs {
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
    }

    let stats = queue.stats().await?;
    assert_eq!((stats.queued, stats.processed), (0, 3));
    Ok(())
}

#[tokio::test]
async fn get_jobs_lists_processed_before_queued() -> TestResult {
    let (fixture, _) = with_queue(recording_registry(Arc::default()));
    let queue = queue(&fixture).await?;
    let tenant = TenantId::new();

    let first = queue
        .enqueue(JobRequest::new("record", tenant, json!({ "name": "first" })))
        .await?;
    let second = queue
        .enqueue(JobRequest::new("record", tenant, json!({ "name": "second" })))
        .await?;
    queue.process_next().await?;

    let jobs = queue.get_jobs(tenant).await?;
    assert_eq!(jobs.len(), 2);
    assert_eq!((jobs[0].id, &jobs[0].status), (first, &JobStatus::Completed));
    assert_eq!((jobs[1].id, &jobs[1].status), (second, &JobStatus::Queued));
    Ok(())
}

#[tokio::test]
async fn processor_errors_are_recorded_verbatim() -> TestResult {
    let (fixture, _) = with_queue(recording_registry(Arc::default()));
    let queue = queue(&fixture).await?;
    let tenant = TenantId::new();

    let failing = queue
        .enqueue(JobRequest::new("fail", tenant, json!({ "name": "report" })))
        .await?;
    let after = queue
        .enqueue(JobRequest::new("record", tenant, json!({ "name": "next" })))
        .await?;
    queue.process_next().await?;
    queue.process_next().await?;

    let job = queue.get_job(failing).await?.ok_or("job missing")?;
    assert_eq!(
        job.status,
        JobStatus::Failed {
            error: "cannot handle report".into()
        }
    );
    // One failure does not stop the queue.
    let next = queue.get_job(after).await?.ok_or("job missing")?;
    assert_eq!(next.status, JobStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn unknown_job_type_fails_the_job() -> TestResult {
    let (fixture, _) = with_queue(ProcessorRegistry::new());
    let queue = queue(&fixture).await?;

    let id = queue
        .enqueue(JobRequest::new("mystery", TenantId::new(), json!({})))
        .await?;
    assert_eq!(queue.process_next().await?, Some(id));

    let job = queue.get_job(id).await?.ok_or("job missing")?;
    assert_eq!(
        job.status.error(),
        Some("no processor registered for job type 'mystery'")
    );
    assert_eq!(queue.stats().await?.processed, 1);
    Ok(())
}

#[tokio::test]
async fn panicking_processor_fails_only_its_job() -> TestResult {
    let (fixture, _) = with_queue(recording_registry(Arc::default()));
    let queue = queue(&fixture).await?;

    let id = queue
        .enqueue(JobRequest::new("panic", TenantId::new(), json!({})))
        .await?;
    queue.process_next().await?;

    let job = queue.get_job(id).await?.ok_or("job missing")?;
    assert_eq!(job.status.error(), Some("Job panicked: processor exploded"));
    assert_eq!(queue.stats().await?.queued, 0);
    Ok(())
}

#[tokio::test]
async fn slow_processor_times_out() -> TestResult {
    let mut registry = ProcessorRegistry::new();
    registry.register(FnProcessor::new("slow", |_, _| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, String>(())
        })
    }));
    let fixture = common::entities();
    fixture.runtime.register(JobQueueActor::new(
        Arc::new(registry),
        JobQueueConfig {
            poll_interval: Duration::from_secs(3600),
            job_timeout: Duration::from_millis(50),
        },
    ));
    let queue = queue(&fixture).await?;

    let id = queue
        .enqueue(JobRequest::new("slow", TenantId::new(), json!({})))
        .await?;
    queue.process_next().await?;

    let job = queue.get_job(id).await?.ok_or("job missing")?;
    assert_eq!(job.status.error(), Some("Job timed out"));
    Ok(())
}

#[tokio::test]
async fn get_jobs_filters_by_tenant() -> TestResult {
    let (fixture, _) = with_queue(recording_registry(Arc::default()));
    let queue = queue(&fixture).await?;
    let ours = TenantId::new();
    let theirs = TenantId::new();

    queue
        .enqueue(JobRequest::new("record", ours, json!({ "name": "1" })))
        .await?;
    queue
        .enqueue(JobRequest::new("record", theirs, json!({ "name": "2" })))
        .await?;
    queue
        .enqueue(JobRequest::new("record", ours, json!({ "name": "3" })))
        .await?;

    let jobs = queue.get_jobs(ours).await?;
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|job| job.tenant_id == ours));
    assert!(queue.get_jobs(TenantId::new()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn lifecycle_events_are_broadcast() -> TestResult {
    let (fixture, events) = with_queue(recording_registry(Arc::default()));
    let mut rx = events.subscribe();
    let queue = queue(&fixture).await?;
    let tenant = TenantId::new();

    let ok = queue
        .enqueue(JobRequest::new("record", tenant, json!({ "name": "x" })))
        .await?;
    let bad = queue
        .enqueue(JobRequest::new("fail", tenant, json!({ "name": "y" })))
        .await?;
    queue.process_next().await?;
    queue.process_next().await?;

    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        received.push(event);
    }
    assert_eq!(received.len(), 6);
    assert!(matches!(&received[0], JobEvent::JobEnqueued { job, .. } if job.id == ok));
    assert!(matches!(&received[1], JobEvent::JobEnqueued { job, .. } if job.id == bad));
    assert!(matches!(&received[2], JobEvent::JobStarted { job_id, .. } if *job_id == ok));
    assert!(matches!(&received[3], JobEvent::JobCompleted { job_id, .. } if *job_id == ok));
    assert!(matches!(&received[4], JobEvent::JobStarted { job_id, .. } if *job_id == bad));
    assert!(
        matches!(&received[5], JobEvent::JobFailed { job_id, error, .. } if *job_id == bad && error == "cannot handle y")
    );
    assert!(received.iter().all(|event| event.tenant_id() == tenant));
    Ok(())
}

#[tokio::test]
async fn queue_survives_reactivation() -> TestResult {
    let (fixture, _) = with_queue(recording_registry(Arc::default()));
    let queue = queue(&fixture).await?;
    let tenant = TenantId::new();

    let id = queue
        .enqueue(JobRequest::new("record", tenant, json!({ "name": "later" })))
        .await?;
    assert!(queue.deactivate().await?);

    assert_eq!(queue.stats().await?.queued, 1);
    assert_eq!(queue.process_next().await?, Some(id));
    assert_eq!(
        queue.get_job(id).await?.ok_or("job missing")?.status,
        JobStatus::Completed
    );
    Ok(())
}

#[tokio::test]
async fn timer_drains_the_queue() -> TestResult {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let fixture = common::entities();
    fixture.runtime.register(JobQueueActor::new(
        Arc::new(recording_registry(seen.clone())),
        JobQueueConfig {
            poll_interval: Duration::from_millis(10),
            job_timeout: Duration::from_secs(5),
        },
    ));
    let queue = queue(&fixture).await?;
    let tenant = TenantId::new();
    for name in ["A", "B"] {
        queue
            .enqueue(JobRequest::new("record", tenant, json!({ "name": name })))
            .await?;
    }

    let mut waited = Duration::ZERO;
    while queue.stats().await?.processed < 2 {
        assert!(waited < Duration::from_secs(5), "timer never drained the queue");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert_eq!(*seen.lock().unwrap(), vec!["A", "B"]);
    Ok(())
}

#[tokio::test]
async fn empty_job_type_is_rejected() -> TestResult {
    let (fixture, _) = with_queue(ProcessorRegistry::new());
    let queue = queue(&fixture).await?;
    assert!(matches!(
        queue
            .enqueue(JobRequest::new("  ", TenantId::new(), json!({})))
            .await,
        Err(actors::ActorError::Validation(_))
    ));
    Ok(())
}

/// Store a job record with `status` and a queue whose only entry is that
/// job, as an earlier process would have left them.
async fn seed_interrupted_job(
    fixture: &common::Fixture,
    status: JobStatus,
) -> Result<JobId, Box<dyn std::error::Error>> {
    let job = Job::new(
        JobId::new(),
        JobRequest::new("record", TenantId::new(), json!({ "name": "again" })),
        Utc::now(),
    );
    let id = job.id;
    let record = fixture.runtime.get_or_activate::<JobActor>(job_key(id)).await?;
    record.initialize(job).await?;
    record.update_status(JobStatus::Running).await?;
    if status != JobStatus::Running {
        record.update_status(status).await?;
    }

    let state = JobQueueState {
        queued: VecDeque::from([id]),
        processed: Vec::new(),
    };
    fixture
        .store
        .write(
            &StateKey::new("job-queue", JOB_QUEUE_KEY, "state"),
            serde_json::to_vec(&state)?,
            None,
        )
        .await?;
    Ok(id)
}

#[tokio::test]
async fn job_left_running_is_dispatched_again() -> TestResult {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (fixture, _) = with_queue(recording_registry(seen.clone()));
    let id = seed_interrupted_job(&fixture, JobStatus::Running).await?;

    let queue = queue(&fixture).await?;
    assert_eq!(queue.stats().await?.queued, 1);
    assert_eq!(queue.process_next().await?, Some(id));

    assert_eq!(*seen.lock().unwrap(), vec!["again"]);
    assert_eq!(
        queue.get_job(id).await?.ok_or("job missing")?.status,
        JobStatus::Completed
    );
    let stats = queue.stats().await?;
    assert_eq!((stats.queued, stats.processed), (0, 1));
    Ok(())
}

#[tokio::test]
async fn job_with_recorded_outcome_is_only_moved() -> TestResult {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (fixture, _) = with_queue(recording_registry(seen.clone()));
    let failed = JobStatus::Failed {
        error: "disk full".into(),
    };
    let id = seed_interrupted_job(&fixture, failed.clone()).await?;

    let queue = queue(&fixture).await?;
    assert_eq!(queue.process_next().await?, Some(id));

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(queue.get_job(id).await?.ok_or("job missing")?.status, failed);
    let stats = queue.stats().await?;
    assert_eq!((stats.queued, stats.processed), (0, 1));
    assert_eq!(queue.process_next().await?, None);
    Ok(())
}

#[tokio::test]
async fn queue_is_never_deactivated_for_idleness() -> TestResult {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let fixture = common::runtime(RuntimeConfig {
        idle_timeout: Some(Duration::from_millis(50)),
        idle_check_interval: Duration::from_millis(10),
        ..quiet_config()
    });
    let actor = JobQueueActor::new(
        Arc::new(recording_registry(seen.clone())),
        JobQueueConfig {
            poll_interval: Duration::from_millis(100),
            job_timeout: Duration::from_secs(5),
        },
    );
    let mut events = actor.events().subscribe();
    fixture.runtime.register(JobActor).register(actor);

    let queue = queue(&fixture).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fixture.runtime.deactivate_idle().await, 0);
    assert_eq!(fixture.runtime.active_count().await, 1);

    let id = queue
        .enqueue(JobRequest::new("record", TenantId::new(), json!({ "name": "tick" })))
        .await?;
    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(JobEvent::JobCompleted { job_id, .. }) = events.recv().await {
                return job_id;
            }
        }
    })
    .await?;
    assert_eq!(completed, id);
    assert_eq!(*seen.lock().unwrap(), vec!["tick"]);
    Ok(())
}

#[tokio::test]
async fn shutdown_cancels_a_running_processor() -> TestResult {
    let observed = Arc::new(AtomicBool::new(false));
    let mut registry = ProcessorRegistry::new();
    registry.register(FnProcessor::new("wait", {
        let observed = observed.clone();
        move |_job, cancel: CancellationToken| {
            let observed = observed.clone();
            Box::pin(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        observed.store(true, Ordering::SeqCst);
                        Err::<(), _>("cancelled".to_string())
                    }
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
                }
            })
        }
    }));
    let (fixture, _) = with_queue(registry);
    let queue = queue(&fixture).await?;
    queue
        .enqueue(JobRequest::new("wait", TenantId::new(), json!({})))
        .await?;

    let dispatch = tokio::spawn(async move { queue.process_next().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    tokio::time::timeout(Duration::from_secs(5), fixture.runtime.shutdown()).await?;

    assert!(observed.load(Ordering::SeqCst));
    // Whether the outcome was recorded depends on which activation stopped first.
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatch).await?;
    Ok(())
}
