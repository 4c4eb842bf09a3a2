use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskId;

/// Priority given to tasks that do not carry one.
pub const DEFAULT_PRIORITY: i64 = 10;

/// Name/pipeline used when a raw message does not say.
pub const UNNAMED: &str = "unnamed";

/// Reserved metadata keys understood by [`Task::from_raw`].
pub mod meta {
    pub const JOB: &str = "job";
    pub const PIPELINE: &str = "pipeline";
    pub const PRIORITY: &str = "priority";
}

/// A unit of work handed out by a task source.
///
/// Immutable once received: the consumer only reads it. Builders (`with_*`)
/// exist for the producing side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    name: String,
    queue: String,
    driver: String,
    pipeline: String,
    priority: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, Vec<String>>,
    payload: Vec<u8>,
    /// Broker partition/offset, when the task came off a partitioned log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<LogPosition>,
    /// 配送回数。source が配送のたびに設定する（未配送なら 0）
    attempt: u32,
    enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: TaskId::generate(),
            name: name.into(),
            queue: "default".to_string(),
            driver: "memory".to_string(),
            pipeline: "default".to_string(),
            priority: DEFAULT_PRIORITY,
            headers: BTreeMap::new(),
            payload: payload.into(),
            position: None,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = pipeline.into();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Append a header value (headers are multi-valued).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Set the delivery attempt. Sources call this on every delivery.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_position(mut self, position: LogPosition) -> Self {
        self.position = Some(position);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn headers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.headers
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn position(&self) -> Option<LogPosition> {
        self.position
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Delivery metadata as a JSON document (everything except the payload).
    pub fn context(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.to_string(),
            "job": self.name,
            "driver": self.driver,
            "queue": self.queue,
            "topic": self.queue,
            "partition": self.position.map(|p| p.partition),
            "offset": self.position.map(|p| p.offset),
            "pipeline": self.pipeline,
            "priority": self.priority,
            "attempt": self.attempt,
            "headers": self.headers,
        })
    }

    /// Decode a broker message (metadata map + body) into a task.
    ///
    /// `job`, `pipeline` and `priority` are reserved metadata keys; every
    /// other key becomes a single-valued header. `priority` is a
    /// little-endian u64 and is ignored when shorter than 8 bytes.
    pub fn from_raw(raw: RawMessage, driver: impl Into<String>) -> Self {
        let mut name = UNNAMED.to_string();
        let mut pipeline = UNNAMED.to_string();
        let mut priority = DEFAULT_PRIORITY;
        let mut headers = BTreeMap::new();

        for (key, value) in raw.metadata {
            match key.as_str() {
                meta::JOB => name = String::from_utf8_lossy(&value).into_owned(),
                meta::PIPELINE => pipeline = String::from_utf8_lossy(&value).into_owned(),
                meta::PRIORITY => {
                    if let Some(bytes) = value.get(..8)
                        && let Ok(bytes) = <[u8; 8]>::try_from(bytes)
                    {
                        priority = u64::from_le_bytes(bytes) as i64;
                    }
                }
                _ => {
                    headers.insert(key, vec![String::from_utf8_lossy(&value).into_owned()]);
                }
            }
        }

        Self {
            id: TaskId::generate(),
            name,
            queue: raw.topic,
            driver: driver.into(),
            pipeline,
            priority,
            headers,
            payload: raw.body,
            position: raw.position,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Where a message sits in a partitioned log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub partition: i32,
    pub offset: i64,
}

/// A message as read off a broker topic, before it becomes a [`Task`].
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub topic: String,
    pub metadata: HashMap<String, Vec<u8>>,
    pub body: Vec<u8>,
    pub position: Option<LogPosition>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            metadata: HashMap::new(),
            body: body.into(),
            position: None,
        }
    }

    pub fn at(mut self, partition: i32, offset: i64) -> Self {
        self.position = Some(LogPosition { partition, offset });
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_has_defaults() {
        let task = Task::new("send-email", b"{}".to_vec());
        assert_eq!(task.name(), "send-email");
        assert_eq!(task.queue(), "default");
        assert_eq!(task.driver(), "memory");
        assert_eq!(task.priority(), DEFAULT_PRIORITY);
        assert_eq!(task.attempt(), 0);
        assert_eq!(task.payload(), b"{}");
    }

    #[test]
    fn headers_are_multi_valued() {
        let task = Task::new("t", Vec::new())
            .with_header("trace", "a")
            .with_header("trace", "b");
        assert_eq!(task.headers()["trace"], vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn context_omits_payload() {
        let task = Task::new("send-email", b"secret".to_vec())
            .with_queue("mail")
            .with_attempt(2);
        let ctx = task.context();
        assert_eq!(ctx["job"], "send-email");
        assert_eq!(ctx["queue"], "mail");
        assert_eq!(ctx["attempt"], 2);
        assert_eq!(ctx["id"], task.id().to_string());
        assert!(ctx.get("payload").is_none());
        assert!(ctx["partition"].is_null());
    }

    #[test]
    fn from_raw_keeps_log_position_in_context() {
        let raw = RawMessage::new("orders", Vec::new())
            .with_metadata(meta::JOB, "ship-order")
            .at(4, 1287);

        let task = Task::from_raw(raw, "ydb");
        assert_eq!(
            task.position(),
            Some(LogPosition {
                partition: 4,
                offset: 1287
            })
        );
        let ctx = task.context();
        assert_eq!(ctx["topic"], "orders");
        assert_eq!(ctx["partition"], 4);
        assert_eq!(ctx["offset"], 1287);
    }

    #[test]
    fn from_raw_reads_reserved_metadata() {
        let raw = RawMessage::new("orders", b"body".to_vec())
            .with_metadata(meta::JOB, "ship-order")
            .with_metadata(meta::PIPELINE, "fast")
            .with_metadata(meta::PRIORITY, 3u64.to_le_bytes().to_vec())
            .with_metadata("x-tenant", "acme");

        let task = Task::from_raw(raw, "ydb");
        assert_eq!(task.name(), "ship-order");
        assert_eq!(task.pipeline(), "fast");
        assert_eq!(task.priority(), 3);
        assert_eq!(task.queue(), "orders");
        assert_eq!(task.driver(), "ydb");
        assert_eq!(task.payload(), b"body");
        assert_eq!(task.headers()["x-tenant"], vec!["acme".to_string()]);
        assert!(!task.headers().contains_key(meta::JOB));
    }

    #[test]
    fn from_raw_falls_back_to_defaults() {
        let raw = RawMessage::new("orders", Vec::new()).with_metadata(meta::PRIORITY, vec![1, 2]);

        let task = Task::from_raw(raw, "ydb");
        assert_eq!(task.name(), UNNAMED);
        assert_eq!(task.pipeline(), UNNAMED);
        assert_eq!(task.priority(), DEFAULT_PRIORITY);
        assert!(task.headers().is_empty());
    }
}
