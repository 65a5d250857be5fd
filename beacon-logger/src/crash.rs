// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./crash_test.rs"]
mod crash_test;

use crate::config::CrashReportingMode;
use async_trait::async_trait;
use beacon_client_common::file_system::FileSystem;
use beacon_events::{Event, EventTimestamp};
use beacon_time::TimeProvider;
use mockall::automock;
use serde_json::Value;
use std::path::Path;

/// Where the crash detector leaves reports for the next start, relative to the SDK directory.
pub const NEW_REPORTS_DIRECTORY: &str = "reports/new";

const UNKNOWN_REASON: &str = "unknown";

//
// CrashConsent
//

/// Asks the user whether a crash from a previous run may be sent.
#[automock]
#[async_trait]
pub trait CrashConsent: Send + Sync {
  async fn should_send(&self, report: &CrashReport) -> bool;
}

//
// CrashReport
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
  pub file_name: String,
  pub reason: String,
  pub body: String,
}

/// Looks for a string at one of the candidate paths. The report is either a single JSON object or
/// one object per line; anything else yields `None`.
fn guess_crash_reason(report: &[u8], candidate_paths: &[&[&str]]) -> Option<String> {
  if report.first() != Some(&b'{') {
    return None;
  }

  let report = std::str::from_utf8(report).ok()?;
  let candidates: Vec<Value> = match serde_json::from_str(report) {
    Ok(json) => vec![json],
    Err(_) => report
      .lines()
      .filter(|line| !line.trim().is_empty())
      .map(serde_json::from_str)
      .collect::<Result<_, _>>()
      .ok()?,
  };

  candidate_paths.iter().find_map(|path| {
    candidates.iter().find_map(|candidate| {
      path
        .iter()
        .try_fold(candidate, |value, key| value.get(key))
        .and_then(Value::as_str)
        .filter(|reason| !reason.is_empty())
        .map(ToString::to_string)
    })
  })
}

/// Reads and deletes every report in the new reports directory. A missing directory means there
/// is nothing to do.
pub async fn take_new_reports(fs: &dyn FileSystem) -> Vec<CrashReport> {
  let directory = Path::new(NEW_REPORTS_DIRECTORY);
  let files = match fs.list_files(directory).await {
    Ok(files) => files,
    Err(e) => {
      if fs.exists(directory).await.unwrap_or(false) {
        log::warn!("failed to read crash report directory: {e:#}");
      } else {
        log::debug!("crash report directory does not exist");
      }
      return vec![];
    },
  };

  let mut reports = Vec::with_capacity(files.len());
  for file_name in files {
    let path = directory.join(&file_name);
    log::info!("processing crash report {file_name}");

    let contents = fs.read_file(&path).await;
    if let Err(e) = fs.delete_file(&path).await {
      log::warn!("failed to remove crash report {file_name}: {e:#}");
    }

    match contents {
      Ok(contents) => {
        let reason = guess_crash_reason(&contents, &[&["crash", "reason"], &["reason"]])
          .unwrap_or_else(|| UNKNOWN_REASON.to_string());
        reports.push(CrashReport {
          file_name,
          reason,
          body: String::from_utf8_lossy(&contents).into_owned(),
        });
      },
      Err(e) => log::warn!("failed to read crash report {file_name}: {e:#}"),
    }
  }

  reports
}

/// Turns the reports left by a previous run into crash events according to `mode`. Reports are
/// consumed either way.
pub async fn collect_crash_events(
  fs: &dyn FileSystem,
  mode: CrashReportingMode,
  consent: Option<&dyn CrashConsent>,
  time_provider: &dyn TimeProvider,
) -> Vec<Event> {
  let reports = take_new_reports(fs).await;
  if reports.is_empty() {
    return vec![];
  }

  let mut events = Vec::new();
  for report in reports {
    let send = match (mode, consent) {
      (CrashReportingMode::Disabled, _) => false,
      (CrashReportingMode::AlwaysSend, _) => true,
      (CrashReportingMode::AlwaysAsk, Some(consent)) => consent.should_send(&report).await,
      (CrashReportingMode::AlwaysAsk, None) => {
        log::warn!("crash reporting asks for consent but nothing can ask, discarding report");
        false
      },
    };

    if !send {
      log::debug!("discarding crash report {}", report.file_name);
      continue;
    }

    match Event::crash(
      report.reason,
      report.body,
      EventTimestamp::now(time_provider),
    ) {
      Ok(event) => events.push(event),
      Err(e) => log::warn!("discarding crash report {}: {e}", report.file_name),
    }
  }

  events
}
