//! Retry strategies for backend calls.
//!
//! Two cadences exist: [`Exponential`] for short API calls and
//! [`CustomGap`] for attach and detach polling. Both drive a closure that
//! reports each attempt as an [`Attempt`]; the closure decides what counts
//! as done, retryable or final.

use crate::error::{is_terminal, BackendError};
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
  Done(T),
  Retry(E),
  Stop(E),
}

impl<T> Attempt<T, BackendError> {
  /// Classify a backend result. Terminal codes stop, everything else is
  /// retried.
  pub fn classify(result: Result<T, BackendError>, iks: bool) -> Self {
    match result {
      Ok(v) => Attempt::Done(v),
      Err(e) if is_terminal(&e, iks) => Attempt::Stop(e),
      Err(e) => Attempt::Retry(e),
    }
  }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
  /// The attempt asked to stop.
  Stopped { error: E, attempts: u32 },
  /// Every allowed attempt failed.
  Exhausted { error: E, attempts: u32 },
}

impl<E> RetryError<E> {
  pub fn into_inner(self) -> E {
    match self {
      RetryError::Stopped { error, .. } | RetryError::Exhausted { error, .. } => error,
    }
  }

  pub fn attempts(&self) -> u32 {
    match self {
      RetryError::Stopped { attempts, .. } | RetryError::Exhausted { attempts, .. } => *attempts,
    }
  }

  pub fn is_exhausted(&self) -> bool {
    matches!(self, RetryError::Exhausted { .. })
  }
}

pub trait Policy {
  fn max_attempts(&self) -> u32;

  /// Pause after the given (1 based) failed attempt.
  fn gap(&self, attempt: u32) -> Duration;
}

/// Doubling gaps starting at `initial`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
  pub initial: Duration,
  pub max: Duration,
  pub cap_attempts: u32,
}

impl Default for Exponential {
  fn default() -> Self {
    Exponential {
      initial: Duration::from_secs(10),
      max: Duration::from_secs(60),
      cap_attempts: 10,
    }
  }
}

impl Policy for Exponential {
  fn max_attempts(&self) -> u32 {
    self.cap_attempts
  }

  fn gap(&self, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    self
      .initial
      .checked_mul(factor)
      .map_or(self.max, |gap| gap.min(self.max))
  }
}

/// Polling cadence: `min_gap` seconds for the first `min_gap_attempts`,
/// twice that (at most 10s) for twice as many, then 10s until
/// `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomGap {
  pub min_gap: u64,
  pub min_gap_attempts: u32,
  pub max_attempts: u32,
}

const CUSTOM_GAP_CAP: u64 = 10;

impl Default for CustomGap {
  fn default() -> Self {
    CustomGap {
      min_gap: 3,
      min_gap_attempts: 3,
      max_attempts: 46,
    }
  }
}

impl Policy for CustomGap {
  fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  fn gap(&self, attempt: u32) -> Duration {
    let secs = if attempt <= self.min_gap_attempts {
      self.min_gap
    } else if attempt <= self.min_gap_attempts * 3 {
      (self.min_gap * 2).min(CUSTOM_GAP_CAP)
    } else {
      CUSTOM_GAP_CAP
    };

    Duration::from_secs(secs)
  }
}

/// Run `f` until it is done, asks to stop or the policy runs out of
/// attempts. `f` receives the 1 based attempt number.
pub async fn retry<P, F, Fut, T, E>(policy: &P, mut f: F) -> Result<T, RetryError<E>>
where
  P: Policy + ?Sized,
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Attempt<T, E>>,
  E: std::fmt::Display,
{
  let max_attempts = policy.max_attempts().max(1);
  let mut attempt = 1;

  loop {
    match f(attempt).await {
      Attempt::Done(v) => return Ok(v),
      Attempt::Stop(error) => {
        debug!(attempt, %error, "Retry stopped");
        return Err(RetryError::Stopped {
          error,
          attempts: attempt,
        });
      }
      Attempt::Retry(error) if attempt >= max_attempts => {
        warn!(attempt, %error, "Retry attempts exhausted");
        return Err(RetryError::Exhausted {
          error,
          attempts: attempt,
        });
      }
      Attempt::Retry(error) => {
        let gap = policy.gap(attempt);
        debug!(attempt, ?gap, %error, "Retrying");
        tokio::time::sleep(gap).await;
        attempt += 1;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;
  use test_case::test_case;

  #[test_case(1, 10)]
  #[test_case(2, 20)]
  #[test_case(3, 40)]
  #[test_case(4, 60)]
  #[test_case(9, 60)]
  #[test_case(40, 60)]
  fn exponential_gaps(attempt: u32, secs: u64) {
    assert_eq!(Exponential::default().gap(attempt), Duration::from_secs(secs));
  }

  #[test]
  fn custom_gap_schedule_covers_about_seven_minutes() {
    let policy = CustomGap::default();
    let gaps: Vec<u64> = (1..=12).map(|a| policy.gap(a).as_secs()).collect();
    assert_eq!(gaps, vec![3, 3, 3, 6, 6, 6, 6, 6, 6, 10, 10, 10]);

    let total: u64 = (1..policy.max_attempts).map(|a| policy.gap(a).as_secs()).sum();
    assert!(total >= 400 && total <= 420, "total {}", total);
  }

  #[test]
  fn custom_gap_is_capped() {
    let policy = CustomGap {
      min_gap: 8,
      min_gap_attempts: 1,
      max_attempts: 5,
    };
    assert_eq!(policy.gap(2), Duration::from_secs(10));
  }

  #[tokio::test(start_paused = true)]
  async fn terminal_code_halts_after_one_attempt() {
    let calls = Cell::new(0);
    let result: Result<(), _> = retry(&Exponential::default(), |_| {
      calls.set(calls.get() + 1);
      async {
        Attempt::classify(
          Err(BackendError::api(404, "volume_not_found", "gone", None)),
          false,
        )
      }
    })
    .await;

    let err = result.unwrap_err();
    assert!(!err.is_exhausted());
    assert_eq!(err.attempts(), 1);
    assert_eq!(calls.get(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn non_terminal_code_retries_up_to_the_bound() {
    let policy = Exponential {
      cap_attempts: 4,
      ..Default::default()
    };
    let calls = Cell::new(0);
    let started = tokio::time::Instant::now();

    let result: Result<(), _> = retry(&policy, |_| {
      calls.set(calls.get() + 1);
      async {
        Attempt::classify(
          Err(BackendError::api(500, "internal_error", "boom", None)),
          false,
        )
      }
    })
    .await;

    let err = result.unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(calls.get(), 4);
    // 10 + 20 + 40
    assert_eq!(started.elapsed(), Duration::from_secs(70));
  }

  #[tokio::test(start_paused = true)]
  async fn succeeds_after_retries() {
    let result = retry(&CustomGap::default(), |attempt| async move {
      if attempt < 3 {
        Attempt::Retry("attaching")
      } else {
        Attempt::Done(attempt)
      }
    })
    .await;

    assert_eq!(result.unwrap(), 3);
  }
}
