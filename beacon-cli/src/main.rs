// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::cli::{Command, FieldPairs, Options};
use async_trait::async_trait;
use beacon_client_common::file_system::RealFileSystem;
use beacon_log::SwapLogger;
use beacon_logger::config::CrashReportingMode;
use beacon_logger::{
  AttemptStore,
  CrashConsent,
  CrashReport,
  PipelineHandle,
  QUEUE_DIRECTORY,
  Tags,
  TelemetryManager,
};
use beacon_queue::{DurableQueue, QueueConfig};
use beacon_stats::Collector;
use clap::Parser;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

mod cli;

// Asks on the terminal before sending each crash report.
struct PromptConsent;

#[async_trait]
impl CrashConsent for PromptConsent {
  async fn should_send(&self, report: &CrashReport) -> bool {
    eprint!(
      "send crash report {} ({})? [y/N] ",
      report.file_name, report.reason
    );
    let _ignored = std::io::stderr().flush();

    let mut answer = String::new();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    if stdin.read_line(&mut answer).await.is_err() {
      return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  SwapLogger::initialize();
  let args = Options::parse();
  log::debug!("running {:?}", args.command);

  if matches!(args.command, Command::Status) {
    return status(&args.sdk_directory).await;
  }

  let builder = args.config_builder()?;
  let ask = builder.build()?.crash_reporting == CrashReportingMode::AlwaysAsk;
  std::fs::create_dir_all(&args.sdk_directory)?;
  let mut manager = TelemetryManager::new(&args.sdk_directory, builder);
  if ask {
    manager = manager.with_crash_consent(Arc::new(PromptConsent));
  }

  let handle = manager.start().await?;
  let result = track(&handle, args.command);
  if result.is_ok() {
    let timeout = Duration::from_secs(args.flush_timeout);
    tokio::select! {
      flushed = tokio::time::timeout(timeout, handle.flush_and_wait()) => {
        if flushed.is_err() {
          eprintln!("delivery did not finish within {timeout:?}, the rest is sent next run");
        }
      },
      () = beacon_shutdown::ctrl_c() => {
        eprintln!("interrupted, the rest is sent on the next run");
      },
    }
  }
  manager.shutdown().await;
  for (name, value) in manager.stats().snapshot() {
    log::debug!("{name}: {value}");
  }

  result
}

fn track(handle: &PipelineHandle, command: Command) -> anyhow::Result<()> {
  match command {
    Command::TrackEvent(cmd) => {
      handle.track_event(&cmd.category, &cmd.name, Tags::from(FieldPairs(cmd.tag)))?;
    },
    Command::Screen(cmd) => {
      if cmd.disappearing {
        handle.track_screen_disappearing(&cmd.title, Tags::from(FieldPairs(cmd.tag)))?;
      } else {
        handle.track_screen_appearing(&cmd.title, Tags::from(FieldPairs(cmd.tag)))?;
      }
    },
    Command::NonFatal(cmd) => {
      handle.report_non_fatal(
        cmd.reason.as_deref(),
        cmd.error.as_deref(),
        Tags::from(FieldPairs(cmd.info)),
      )?;
    },
    Command::Log(cmd) => {
      handle.log(cmd.level.into(), &cmd.message, Tags::from(FieldPairs(cmd.field)))?;
    },
    Command::Flush | Command::Status => {},
  }
  Ok(())
}

async fn status(sdk_directory: &Path) -> anyhow::Result<()> {
  let collector = Collector::default();
  let queue = DurableQueue::open(
    &sdk_directory.join(QUEUE_DIRECTORY),
    QueueConfig::default(),
    &collector.scope("beacon"),
  )?;
  println!("queued events: {}", queue.peek_size());
  if let Some(oldest) = queue.oldest_timestamp() {
    println!("oldest event: {}", oldest.wall);
  }

  let restored = AttemptStore::new(Arc::new(RealFileSystem::new(sdk_directory.to_path_buf())))
    .load()
    .await?;
  println!("batches awaiting delivery: {}", restored.attempts.len());
  for attempt in &restored.attempts {
    println!(
      "  batch {}: {} events, {} failed attempts, next attempt at {}",
      attempt.sequence(),
      attempt.batch().len(),
      attempt.attempt_count(),
      attempt.next_eligible_at()
    );
  }
  println!("next sequence: {}", restored.next_sequence);

  Ok(())
}
