use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use bobbin_core::{Consumer, ConsumerConfig, InMemorySource, Task, TaskError, TaskHandler};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Dead-letter limit used when neither the config nor the flags set one,
/// so a task that always fails cannot keep the demo running forever.
const DEFAULT_MAX_DELIVERIES: u32 = 3;

/// Run the consumer loop over tasks loaded from a JSON file.
#[derive(Debug, Parser)]
#[command(name = "bobbin", version)]
struct Args {
    /// JSON array of tasks: [{"name": "...", "queue": "...", "payload": ...}]
    #[arg(long)]
    tasks: PathBuf,

    /// Consumer config (JSON). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Task names whose processing fails (repeatable).
    #[arg(long = "fail", value_name = "NAME")]
    fail: Vec<String>,

    /// Override memory.max_deliveries from the config.
    #[arg(long)]
    max_deliveries: Option<u32>,
}

/// One entry of the tasks file.
#[derive(Debug, Deserialize)]
struct TaskInput {
    name: String,
    queue: Option<String>,
    driver: Option<String>,
    pipeline: Option<String>,
    priority: Option<i64>,
    /// Strings are taken as-is, anything else is stored as JSON.
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    headers: BTreeMap<String, Vec<String>>,
}

impl TaskInput {
    fn into_task(self) -> Result<Task, serde_json::Error> {
        let payload = match self.payload {
            serde_json::Value::Null => Vec::new(),
            serde_json::Value::String(s) => s.into_bytes(),
            other => serde_json::to_vec(&other)?,
        };

        let mut task = Task::new(self.name, payload);
        if let Some(queue) = self.queue {
            task = task.with_queue(queue);
        }
        if let Some(driver) = self.driver {
            task = task.with_driver(driver);
        }
        if let Some(pipeline) = self.pipeline {
            task = task.with_pipeline(pipeline);
        }
        if let Some(priority) = self.priority {
            task = task.with_priority(priority);
        }
        for (key, values) in self.headers {
            for value in values {
                task = task.with_header(key.clone(), value);
            }
        }
        Ok(task)
    }
}

/// Fails the task names given with `--fail`, acks everything else.
struct DemoHandler {
    fail: HashSet<String>,
}

#[async_trait]
impl TaskHandler for DemoHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        tracing::info!(
            name = %task.name(),
            queue = %task.queue(),
            driver = %task.driver(),
            payload_len = task.payload().len(),
            "processing"
        );
        if self.fail.contains(task.name()) {
            return Err(TaskError::new(format!("{} is configured to fail", task.name())));
        }
        Ok(())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn run(args: Args) -> Result<(), BoxError> {
    let mut config = match &args.config {
        Some(path) => ConsumerConfig::from_path(path)?,
        None => ConsumerConfig::default(),
    };
    config.memory.max_deliveries = args
        .max_deliveries
        .or(config.memory.max_deliveries)
        .or(Some(DEFAULT_MAX_DELIVERIES));
    config.validate()?;

    let raw = std::fs::read_to_string(&args.tasks)?;
    let inputs: Vec<TaskInput> = serde_json::from_str(&raw)?;

    let source = Arc::new(InMemorySource::from_config(&config.memory));
    for input in inputs {
        source.push(input.into_task()?).await?;
    }
    // end-of-stream once the file is drained
    source.close().await;

    let consumer = Consumer::with_config(Arc::clone(&source), &config);
    let stats = consumer
        .run(DemoHandler {
            fail: args.fail.into_iter().collect(),
        })
        .await?;

    let report = serde_json::json!({
        "consumer": stats,
        "source": source.counts().await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "bobbin failed");
            ExitCode::FAILURE
        }
    }
}
