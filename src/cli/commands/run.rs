//! Run command implementation.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, ValueEnum};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::cli::output::{RunMode, RunReport, get_formatter};
use crate::models::{BatchJobConfig, BatchResult, Config, OutputFormat, sort_by_index};
use crate::services::{Dispatcher, Processor, StreamProcessor};

/// Built-in per-batch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    /// Parse every line as an integer and add them up
    Sum,
    /// Count the lines in each batch
    Count,
    /// Join the lines of each batch with commas
    Concat,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::Sum => "sum",
            Operation::Count => "count",
            Operation::Concat => "concat",
        }
    }

    fn apply(self, batch: &[String]) -> Result<Value> {
        match self {
            Operation::Sum => {
                let mut total: i64 = 0;
                for line in batch {
                    let n: i64 = line
                        .trim()
                        .parse()
                        .with_context(|| format!("not a number: {line}"))?;
                    total = total
                        .checked_add(n)
                        .ok_or_else(|| anyhow::anyhow!("sum overflowed"))?;
                }
                Ok(Value::from(total))
            }
            Operation::Count => Ok(Value::from(batch.len())),
            Operation::Concat => Ok(Value::from(batch.join(","))),
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Input file, one item per line ("-" or omitted reads stdin)
    #[arg(long, short = 'i')]
    pub input: Option<PathBuf>,

    /// Operation applied to each batch
    #[arg(long, value_enum, default_value_t = Operation::Sum)]
    pub op: Operation,

    /// Consume the input as a stream instead of reading it all first
    #[arg(long)]
    pub stream: bool,

    /// Items per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum batches in flight
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Items per second (disabled when omitted)
    #[arg(long)]
    pub rate_limit: Option<f64>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Total attempts per batch
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Maximum items waiting for batch assembly in stream mode
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Artificial work per batch in milliseconds
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,
}

impl RunArgs {
    fn job_config(&self, config: &Config) -> Result<BatchJobConfig> {
        let mut engine = config.engine.clone();
        if let Some(v) = self.batch_size {
            engine.batch_size = v;
        }
        if let Some(v) = self.max_concurrent {
            engine.max_concurrent_batches = v;
        }
        if let Some(v) = self.rate_limit {
            engine.rate_limit_per_second = Some(v);
        }
        if let Some(v) = self.timeout_ms {
            engine.timeout_ms = v;
        }
        if let Some(v) = self.retries {
            engine.retry_attempts = v;
        }
        if let Some(v) = self.retry_delay_ms {
            engine.retry_delay_ms = v;
        }
        engine
            .to_job_config()
            .context("invalid engine configuration")
    }
}

pub async fn handle_run(
    args: RunArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let job = args.job_config(config)?;
    let buffer_size = args.buffer_size.unwrap_or(config.stream.buffer_size);

    if verbose {
        eprintln!(
            "batch_size={} max_concurrent={} rate_limit={:?} timeout={}ms attempts={}",
            job.batch_size,
            job.max_concurrent_batches,
            job.rate_limit_per_second,
            job.timeout_per_batch.as_millis(),
            job.retry_attempts
        );
    }

    let dispatcher = Dispatcher::new(build_processor(args.op, args.delay_ms), job)?;
    let reader = open_input(args.input.as_ref()).await?;

    let started_at = Utc::now();
    let start_time = Instant::now();

    let (mode, mut results) = if args.stream {
        let results = run_stream(&dispatcher, reader, buffer_size).await?;
        (RunMode::Stream, results)
    } else {
        let results = run_bulk(&dispatcher, reader).await?;
        (RunMode::Bulk, results)
    };

    dispatcher.close().await;
    sort_by_index(&mut results);

    let report = RunReport {
        mode,
        operation: args.op.name().to_string(),
        started_at,
        duration_ms: start_time.elapsed().as_millis() as u64,
        results,
        stats: dispatcher.stats(),
    };
    print!("{}", formatter.format_run_report(&report));
    if format == OutputFormat::Json {
        println!();
    }

    Ok(())
}

fn build_processor(op: Operation, delay_ms: u64) -> Processor<String, Value> {
    Processor::blocking(move |batch: Vec<String>| {
        if delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(delay_ms));
        }
        op.apply(&batch)
    })
}

async fn open_input(input: Option<&PathBuf>) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
    match input {
        Some(path) if path.as_os_str() != "-" => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Box::new(file))
        }
        _ => Ok(Box::new(tokio::io::stdin())),
    }
}

async fn run_bulk(
    dispatcher: &Dispatcher<String, Value>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
) -> Result<Vec<BatchResult<Value>>> {
    let mut lines = BufReader::new(reader).lines();
    let mut items = Vec::new();
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        if !line.trim().is_empty() {
            items.push(line);
        }
    }
    debug!(items = items.len(), "input loaded");

    let pb = ProgressBar::new(items.len().div_ceil(dispatcher.config().batch_size) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let results = dispatcher
        .process_all_with_progress(items, |done, _total| pb.set_position(done as u64))
        .await?;
    pb.finish_and_clear();

    Ok(results)
}

async fn run_stream(
    dispatcher: &Dispatcher<String, Value>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    buffer_size: usize,
) -> Result<Vec<BatchResult<Value>>> {
    let processor = StreamProcessor::new(dispatcher.clone(), buffer_size)?;
    let (tx, rx) = mpsc::channel(buffer_size);

    let producer = tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(line).await.is_err() {
                break;
            }
        }
        anyhow::Ok(())
    });

    let mut stream = processor.run(tokio_stream::wrappers::ReceiverStream::new(rx))?;
    let mut results = Vec::new();
    while let Some(result) = stream.next().await {
        debug!(batch = result.batch_index, ok = result.is_success(), "batch reported");
        results.push(result);
    }

    producer
        .await
        .context("input reader task failed")?
        .context("failed to read input")?;

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_operation_sum() {
        let value = Operation::Sum.apply(&lines(&["1", " 2 ", "-4"])).unwrap();
        assert_eq!(value, Value::from(-1));
    }

    #[test]
    fn test_operation_sum_rejects_garbage() {
        let err = Operation::Sum.apply(&lines(&["1", "two"])).unwrap_err();
        assert!(format!("{err:#}").contains("not a number: two"));
    }

    #[test]
    fn test_operation_count_and_concat() {
        let batch = lines(&["a", "b", "c"]);
        assert_eq!(Operation::Count.apply(&batch).unwrap(), Value::from(3));
        assert_eq!(Operation::Concat.apply(&batch).unwrap(), Value::from("a,b,c"));
    }

    #[test]
    fn test_cli_args_override_config() {
        let args = RunArgs {
            input: None,
            op: Operation::Count,
            stream: false,
            batch_size: Some(3),
            max_concurrent: None,
            rate_limit: Some(5.0),
            timeout_ms: None,
            retries: Some(1),
            retry_delay_ms: None,
            buffer_size: None,
            delay_ms: 0,
        };
        let job = args.job_config(&Config::default()).unwrap();
        assert_eq!(job.batch_size, 3);
        assert_eq!(job.retry_attempts, 1);
        assert_eq!(job.rate_limit_per_second, Some(5.0));
    }

    #[tokio::test]
    async fn test_stream_mode_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        let content: Vec<String> = (1..=23).map(|n| n.to_string()).collect();
        std::fs::write(&path, content.join("\n")).unwrap();

        let job = BatchJobConfig::new(5).with_retry_attempts(1);
        let dispatcher = Dispatcher::new(build_processor(Operation::Sum, 0), job).unwrap();
        let reader = open_input(Some(&path)).await.unwrap();

        let results = run_stream(&dispatcher, reader, 16).await.unwrap();
        let total: i64 = results.iter().filter_map(|r| r.value()?.as_i64()).sum();
        assert_eq!(results.len(), 5);
        assert_eq!(total, 276);
        dispatcher.close().await;
    }

    #[tokio::test]
    async fn test_missing_input_file() {
        let path = PathBuf::from("/definitely/not/here.txt");
        assert!(open_input(Some(&path)).await.is_err());
    }
}
