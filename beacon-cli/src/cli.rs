// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./cli_test.rs"]
mod cli_test;

use anyhow::Context as _;
use beacon_logger::config::{ConfigBuilder, CrashReportingMode, LogDestination};
use beacon_logger::{LogLevel, Tags};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliLogLevel {
  Debug,
  Info,
  Warning,
  Error,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliLogDestination {
  None,
  Console,
  Remote,
  Both,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliCrashReporting {
  Disabled,
  AlwaysAsk,
  AlwaysSend,
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Options {
  /// Collector base URL
  #[clap(env = "BEACON_URL", long)]
  pub url: Option<String>,

  /// Project identifier sent with every batch
  #[clap(env = "BEACON_PROJECT", long)]
  pub project: Option<String>,

  /// Directory holding the queue, pending batches and crash reports
  #[clap(
    env = "BEACON_SDK_DIRECTORY",
    long,
    required = false,
    default_value = ".beacon"
  )]
  pub sdk_directory: PathBuf,

  /// Configuration object as a host runtime would pass it, e.g. '{"logType": "both"}'
  #[clap(env = "BEACON_CONFIG", long)]
  pub config: Option<String>,

  /// How crash reports left in the SDK directory are handled
  #[clap(long, value_enum)]
  pub crash_reporting: Option<CliCrashReporting>,

  /// Where log lines go
  #[clap(long, value_enum)]
  pub log_destination: Option<CliLogDestination>,

  /// Accept any server certificate
  #[clap(long)]
  pub no_validate_certificates: bool,

  /// Raise the SDK's own logging to debug
  #[clap(long)]
  pub debug: bool,

  /// Seconds to wait for delivery before leaving the rest for the next run
  #[clap(long, required = false, default_value = "30")]
  pub flush_timeout: u64,

  /// Command to run
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
  /// Track an application event
  TrackEvent(TrackEventCommand),

  /// Track a screen appearing or disappearing
  Screen(ScreenCommand),

  /// Report a non-fatal issue
  NonFatal(NonFatalCommand),

  /// Emit a log line
  Log(LogCommand),

  /// Deliver everything pending, then exit
  Flush,

  /// Print the queue depth and the batches awaiting delivery
  Status,
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct TrackEventCommand {
  pub category: String,

  pub name: String,

  /// Tag(s) to send with the event
  #[clap(long, num_args=2, value_names=["key", "value"], action=ArgAction::Append)]
  pub tag: Vec<String>,
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct ScreenCommand {
  /// Screen title
  pub title: String,

  /// Track the screen disappearing instead of appearing
  #[clap(long)]
  pub disappearing: bool,

  /// Tag(s) to send with the event
  #[clap(long, num_args=2, value_names=["key", "value"], action=ArgAction::Append)]
  pub tag: Vec<String>,
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct NonFatalCommand {
  #[clap(long)]
  pub reason: Option<String>,

  /// Error description
  #[clap(long)]
  pub error: Option<String>,

  /// Additional user info
  #[clap(long, num_args=2, value_names=["key", "value"], action=ArgAction::Append)]
  pub info: Vec<String>,
}

#[derive(Args, Debug, PartialEq, Eq)]
pub struct LogCommand {
  /// Severity level of the log
  #[clap(long, required = false, value_enum, default_value = "info")]
  pub level: CliLogLevel,

  /// Additional field(s) to send with the log
  #[clap(long, num_args=2, value_names=["key", "value"], action=ArgAction::Append)]
  pub field: Vec<String>,

  /// Log message
  pub message: String,
}

impl From<CliLogLevel> for LogLevel {
  fn from(value: CliLogLevel) -> Self {
    match value {
      CliLogLevel::Debug => Self::Debug,
      CliLogLevel::Info => Self::Info,
      CliLogLevel::Warning => Self::Warning,
      CliLogLevel::Error => Self::Error,
    }
  }
}

impl From<CliLogDestination> for LogDestination {
  fn from(value: CliLogDestination) -> Self {
    match value {
      CliLogDestination::None => Self::None,
      CliLogDestination::Console => Self::Console,
      CliLogDestination::Remote => Self::Remote,
      CliLogDestination::Both => Self::Both,
    }
  }
}

impl From<CliCrashReporting> for CrashReportingMode {
  fn from(value: CliCrashReporting) -> Self {
    match value {
      CliCrashReporting::Disabled => Self::Disabled,
      CliCrashReporting::AlwaysAsk => Self::AlwaysAsk,
      CliCrashReporting::AlwaysSend => Self::AlwaysSend,
    }
  }
}

/// Flat `key value key value ...` arguments as collected by clap.
pub struct FieldPairs<T>(pub Vec<T>);
impl From<FieldPairs<String>> for Tags {
  fn from(value: FieldPairs<String>) -> Self {
    value
      .0
      .chunks_exact(2)
      .map(|pair| (pair[0].clone(), pair[1].clone()))
      .collect()
  }
}

impl Options {
  /// The pipeline configuration: the `--config` object first, then explicit flags on top.
  pub fn config_builder(&self) -> anyhow::Result<ConfigBuilder> {
    let url = self
      .url
      .clone()
      .context("a collector url is required (--url or BEACON_URL)")?;
    let project = self
      .project
      .clone()
      .context("a project is required (--project or BEACON_PROJECT)")?;

    let mut builder = ConfigBuilder::new(url, project);
    if let Some(config) = &self.config {
      builder.apply_bridge_json(config)?;
    }
    if let Some(mode) = self.crash_reporting {
      builder.crash_reporting(mode.into());
    }
    if let Some(destination) = self.log_destination {
      builder.log_destination(destination.into());
    } else if self.config.is_none() {
      // Logging from the command line is pointless without a destination.
      builder.log_destination(LogDestination::Remote);
    }
    if self.no_validate_certificates {
      builder.validate_certificates(false);
    }
    if self.debug {
      builder.debug_log(true);
    }

    Ok(builder)
  }
}
