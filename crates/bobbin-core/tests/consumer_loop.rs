//! Consumer loop behaviour against a recording source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bobbin_core::impls::DeliveryState;
use bobbin_core::{
    Consumer, ConsumerConfig, InMemorySource, SourceError, Task, TaskError, TaskErrorKind,
    TaskId, TaskSource, handler_fn,
};
use rstest::rstest;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Receive,
    Ack(TaskId),
    Requeue(TaskId, TaskError),
}

/// Replays a script of tasks, then end-of-stream, logging every call.
struct RecordingSource {
    script: Mutex<Vec<Task>>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingSource {
    fn new(tasks: Vec<Task>) -> Self {
        let mut script = tasks;
        script.reverse();
        Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// (acks, requeues) per task.
    fn settlements(&self) -> HashMap<TaskId, (usize, usize)> {
        let mut out: HashMap<TaskId, (usize, usize)> = HashMap::new();
        for call in self.calls() {
            match call {
                Call::Ack(id) => out.entry(id).or_default().0 += 1,
                Call::Requeue(id, _) => out.entry(id).or_default().1 += 1,
                Call::Receive => {}
            }
        }
        out
    }
}

#[async_trait]
impl TaskSource for RecordingSource {
    async fn receive(&self) -> Result<Option<Task>, SourceError> {
        self.calls.lock().unwrap().push(Call::Receive);
        Ok(self.script.lock().unwrap().pop())
    }

    async fn acknowledge(&self, id: TaskId) -> Result<(), SourceError> {
        self.calls.lock().unwrap().push(Call::Ack(id));
        Ok(())
    }

    async fn requeue(&self, id: TaskId, error: &TaskError) -> Result<(), SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Requeue(id, error.clone()));
        Ok(())
    }
}

/// Fails every task named `bad-job`.
fn fail_bad_jobs() -> impl bobbin_core::TaskHandler {
    handler_fn(|task: Arc<Task>| async move {
        if task.name() == "bad-job" {
            return Err(TaskError::new(format!("cannot process {}", task.name())));
        }
        Ok(())
    })
}

#[tokio::test]
async fn successful_task_is_acked_once_then_next_task_is_requested() {
    let task = Task::new("send-email", b"{\"to\":\"a@b.c\"}".to_vec())
        .with_queue("default")
        .with_driver("memory");
    let consumer = Consumer::new(RecordingSource::new(vec![task.clone()]));

    let stats = consumer.run(fail_bad_jobs()).await.unwrap();

    assert_eq!(stats.received, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.requeued, 0);
    assert_eq!(
        consumer.source().calls(),
        vec![Call::Receive, Call::Ack(task.id()), Call::Receive]
    );
}

#[tokio::test]
async fn failing_task_is_requeued_once_with_the_error() {
    let task = Task::new("bad-job", Vec::new());
    let consumer = Consumer::new(RecordingSource::new(vec![task.clone()]));

    let stats = consumer.run(fail_bad_jobs()).await.unwrap();

    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.acked, 0);
    let calls = consumer.source().calls();
    assert_eq!(calls.len(), 3);
    match &calls[1] {
        Call::Requeue(id, err) => {
            assert_eq!(*id, task.id());
            assert_eq!(err.kind(), TaskErrorKind::Failed);
            assert_eq!(err.message(), "cannot process bad-job");
        }
        other => panic!("expected requeue, got {other:?}"),
    }
}

#[tokio::test]
async fn immediate_end_of_stream_processes_nothing() {
    let consumer = Consumer::new(RecordingSource::new(Vec::new()));

    let stats = consumer
        .run(handler_fn(|task: Arc<Task>| async move {
            Err::<(), TaskError>(TaskError::new(format!("handler ran for {}", task.id())))
        }))
        .await
        .unwrap();

    assert_eq!(stats, Default::default());
    assert_eq!(consumer.source().calls(), vec![Call::Receive]);
}

#[rstest]
#[case::all_good(&["a", "b", "c"])]
#[case::all_bad(&["bad-job", "bad-job"])]
#[case::mixed(&["a", "bad-job", "b", "bad-job", "c"])]
#[tokio::test]
async fn every_task_is_settled_exactly_once(#[case] names: &[&str]) {
    let tasks: Vec<Task> = names.iter().map(|n| Task::new(*n, Vec::new())).collect();
    let consumer = Consumer::new(RecordingSource::new(tasks.clone()));

    let stats = consumer.run(fail_bad_jobs()).await.unwrap();

    let settlements = consumer.source().settlements();
    assert_eq!(settlements.len(), tasks.len());
    for task in &tasks {
        let (acks, requeues) = settlements[&task.id()];
        if task.name() == "bad-job" {
            assert_eq!((acks, requeues), (0, 1), "task {}", task.id());
        } else {
            assert_eq!((acks, requeues), (1, 0), "task {}", task.id());
        }
    }
    assert_eq!(stats.received, tasks.len() as u64);
    assert_eq!(stats.acked + stats.requeued, stats.received);
    // one receive per task plus the end-of-stream one
    let receives = consumer
        .source()
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Receive))
        .count();
    assert_eq!(receives, tasks.len() + 1);
}

#[tokio::test]
async fn receive_error_stops_the_loop() {
    struct BrokenSource;

    #[async_trait]
    impl TaskSource for BrokenSource {
        async fn receive(&self) -> Result<Option<Task>, SourceError> {
            Err(SourceError::Backend("connection reset".into()))
        }
        async fn acknowledge(&self, _id: TaskId) -> Result<(), SourceError> {
            Ok(())
        }
        async fn requeue(&self, _id: TaskId, _error: &TaskError) -> Result<(), SourceError> {
            Ok(())
        }
    }

    let err = Consumer::new(BrokenSource)
        .run(fail_bad_jobs())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        bobbin_core::ConsumerError::Receive(SourceError::Backend(_))
    ));
}

#[tokio::test]
async fn in_memory_source_end_to_end() {
    let config = ConsumerConfig::from_json_str(r#"{"name": "e2e", "memory": {"max_deliveries": 3}}"#)
        .unwrap();
    let source = Arc::new(InMemorySource::from_config(&config.memory));
    let consumer = Consumer::with_config(Arc::clone(&source), &config);

    let producer = tokio::spawn({
        let source = Arc::clone(&source);
        async move {
            let good = source.push(Task::new("send-email", Vec::new())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            let bad = source.push(Task::new("bad-job", Vec::new())).await.unwrap();
            source.close().await;
            (good, bad)
        }
    });

    let stats = tokio::time::timeout(Duration::from_secs(5), consumer.run(fail_bad_jobs()))
        .await
        .unwrap()
        .unwrap();
    let (good, bad) = producer.await.unwrap();

    assert_eq!(stats.acked, 1);
    // bad-job is delivered max_deliveries times, requeued each time
    assert_eq!(stats.requeued, 3);
    assert_eq!(stats.received, 4);

    assert_eq!(source.record(good).await.unwrap().state, DeliveryState::Acked);
    let dead = source.record(bad).await.unwrap();
    assert_eq!(dead.state, DeliveryState::Dead);
    assert_eq!(dead.deliveries, 3);

    let counts = source.counts().await;
    assert_eq!(counts.acked, 1);
    assert_eq!(counts.dead, 1);
    assert_eq!(counts.queued + counts.in_flight, 0);
}
