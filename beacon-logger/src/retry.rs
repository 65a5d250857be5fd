// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./retry_test.rs"]
mod retry_test;

use crate::config::Tuning;
use backoff::backoff::Backoff;
use beacon_delivery::{Ack, DeliveryError};
use beacon_events::Batch;
use beacon_stats::{Counter, Scope, labels};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

//
// DropReason
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
  /// The collector refused the batch with a non-retryable status.
  Rejected(u16),
  CertificateInvalid,
  InvalidRequest,
  AttemptsExhausted,
  Expired,
}

impl DropReason {
  const fn as_str(self) -> &'static str {
    match self {
      Self::Rejected(_) => "rejected",
      Self::CertificateInvalid => "certificate_invalid",
      Self::InvalidRequest => "invalid_request",
      Self::AttemptsExhausted => "attempts_exhausted",
      Self::Expired => "expired",
    }
  }

  const fn is_permanent_failure(self) -> bool {
    matches!(
      self,
      Self::Rejected(_) | Self::CertificateInvalid | Self::InvalidRequest
    )
  }
}

//
// AttemptState
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttemptState {
  #[default]
  Pending,
  InFlight,
  Retrying,
  Delivered,
  Dropped(DropReason),
}

impl AttemptState {
  #[must_use]
  pub const fn is_terminal(self) -> bool {
    matches!(self, Self::Delivered | Self::Dropped(_))
  }
}

//
// DeliveryAttempt
//

/// A sealed batch on its way to the collector. Everything but the state is persisted, so an
/// attempt interrupted by a restart resumes as `Pending` with its count and schedule intact.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
  batch: Batch,
  attempt_count: u32,
  created_at: OffsetDateTime,
  next_eligible_at: OffsetDateTime,
  #[serde(skip)]
  state: AttemptState,
}

impl DeliveryAttempt {
  #[must_use]
  pub const fn new(batch: Batch, now: OffsetDateTime) -> Self {
    Self {
      batch,
      attempt_count: 0,
      created_at: now,
      next_eligible_at: now,
      state: AttemptState::Pending,
    }
  }

  #[must_use]
  pub const fn batch(&self) -> &Batch {
    &self.batch
  }

  #[must_use]
  pub const fn sequence(&self) -> u64 {
    self.batch.sequence
  }

  #[must_use]
  pub const fn attempt_count(&self) -> u32 {
    self.attempt_count
  }

  /// When the batch was sealed.
  #[must_use]
  pub const fn created_at(&self) -> OffsetDateTime {
    self.created_at
  }

  #[must_use]
  pub const fn state(&self) -> AttemptState {
    self.state
  }

  #[must_use]
  pub const fn next_eligible_at(&self) -> OffsetDateTime {
    self.next_eligible_at
  }

  #[must_use]
  pub fn is_due(&self, now: OffsetDateTime) -> bool {
    now >= self.next_eligible_at
  }
}

//
// RetryPolicy
//

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub base: Duration,
  pub cap: Duration,
  pub jitter: Duration,
  pub max_attempts: u32,
  pub max_age: time::Duration,
}

impl RetryPolicy {
  #[must_use]
  pub fn from_tuning(tuning: &Tuning) -> Self {
    Self {
      base: tuning.retry_base.unsigned_abs(),
      cap: tuning.retry_cap.unsigned_abs(),
      jitter: tuning.retry_jitter.unsigned_abs(),
      max_attempts: tuning.max_attempts,
      max_age: tuning.max_attempt_age,
    }
  }

  fn backoff(&self) -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
      .with_initial_interval(self.base)
      .with_max_interval(self.cap)
      .with_multiplier(2.0)
      .with_randomization_factor(0.0)
      .with_max_elapsed_time(None)
      .build()
  }

  /// `min(base * 2^failures, cap)`, before jitter.
  #[must_use]
  pub fn delay(&self, failures: u32) -> Duration {
    let mut backoff = self.backoff();
    for _ in 0 .. failures {
      if backoff.current_interval >= self.cap {
        break;
      }
      backoff.next_backoff();
    }
    backoff.next_backoff().unwrap_or(self.cap).min(self.cap)
  }

  fn jitter(&self) -> Duration {
    let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
      return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0 ..= max_ms))
  }
}

struct Stats {
  delivered_batches: Counter,
  retries: Counter,
  permanent_failures: Counter,
  retry_limit_exceeded: Counter,
  dropped_events: Counter,
  scope: Scope,
}

//
// RetryController
//

/// Drives attempts through `Pending -> InFlight -> {Delivered | Retrying | Dropped}`.
pub struct RetryController {
  policy: RetryPolicy,
  stats: Stats,
}

impl RetryController {
  #[must_use]
  pub fn new(policy: RetryPolicy, scope: &Scope) -> Self {
    let scope = scope.scope("retry");
    Self {
      policy,
      stats: Stats {
        delivered_batches: scope.counter("delivered_batches"),
        retries: scope.counter("retries"),
        permanent_failures: scope.counter("permanent_failures"),
        retry_limit_exceeded: scope.counter("retry_limit_exceeded"),
        dropped_events: scope.counter("dropped_events"),
        scope,
      },
    }
  }

  /// Moves the attempt in flight. Returns false, with the attempt dropped, if it is already past
  /// the age ceiling.
  pub fn begin(&self, attempt: &mut DeliveryAttempt, now: OffsetDateTime) -> bool {
    debug_assert!(!attempt.state.is_terminal());
    if now - attempt.created_at >= self.policy.max_age {
      self.drop_attempt(attempt, DropReason::Expired);
      return false;
    }
    attempt.state = AttemptState::InFlight;
    true
  }

  /// Applies the outcome of a send and returns the new state.
  pub fn complete(
    &self,
    attempt: &mut DeliveryAttempt,
    result: &Result<Ack, DeliveryError>,
    now: OffsetDateTime,
  ) -> AttemptState {
    debug_assert_eq!(attempt.state, AttemptState::InFlight);

    let error = match result {
      Ok(ack) => {
        log::debug!(
          "batch {} delivered with status {}",
          attempt.sequence(),
          ack.status
        );
        attempt.state = AttemptState::Delivered;
        self.stats.delivered_batches.inc();
        return attempt.state;
      },
      Err(e) => e,
    };

    let permanent = match error {
      DeliveryError::Network(_) | DeliveryError::ServerError(_) => None,
      DeliveryError::ServerRejected(429) => None,
      DeliveryError::ServerRejected(status) => Some(DropReason::Rejected(*status)),
      DeliveryError::CertificateInvalid(_) => Some(DropReason::CertificateInvalid),
      DeliveryError::InvalidRequest(_) => Some(DropReason::InvalidRequest),
    };
    if let Some(reason) = permanent {
      log::warn!("batch {} failed permanently: {error}", attempt.sequence());
      self.drop_attempt(attempt, reason);
      return attempt.state;
    }

    attempt.attempt_count += 1;
    if attempt.attempt_count >= self.policy.max_attempts {
      log::warn!(
        "batch {} failed {} times, giving up: {error}",
        attempt.sequence(),
        attempt.attempt_count
      );
      self.stats.retry_limit_exceeded.inc();
      self.drop_attempt(attempt, DropReason::AttemptsExhausted);
      return attempt.state;
    }
    if now - attempt.created_at >= self.policy.max_age {
      self.drop_attempt(attempt, DropReason::Expired);
      return attempt.state;
    }

    let delay = self.policy.delay(attempt.attempt_count - 1) + self.policy.jitter();
    log::debug!(
      "batch {} failed ({error}), attempt {} retrying in {}ms",
      attempt.sequence(),
      attempt.attempt_count,
      delay.as_millis()
    );
    attempt.next_eligible_at = now + delay;
    attempt.state = AttemptState::Retrying;
    self.stats.retries.inc();
    attempt.state
  }

  fn drop_attempt(&self, attempt: &mut DeliveryAttempt, reason: DropReason) {
    attempt.state = AttemptState::Dropped(reason);
    if reason.is_permanent_failure() {
      self.stats.permanent_failures.inc();
    }
    self
      .stats
      .scope
      .counter_with_labels("dropped_batches", labels!("reason" => reason.as_str()))
      .inc();
    self.stats.dropped_events.inc_by(attempt.batch.len() as u64);
  }
}
