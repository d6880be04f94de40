// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

/// Smallest delay ever returned by [`RetryPolicy::delay_for`].
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// 1 min, 5 min, 30 min, 2 h, 12 h.
pub const DEFAULT_SCHEDULE: [Duration; 5] = [
	Duration::from_secs(60),
	Duration::from_secs(300),
	Duration::from_secs(1_800),
	Duration::from_secs(7_200),
	Duration::from_secs(43_200),
];

#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
	/// Delay after attempt `n` is `schedule[min(n - 1, len - 1)]`.
	Schedule(Vec<Duration>),
	/// `min(base * factor^(n - 1), max)`, plus up to 25% when `jitter` is set.
	Exponential {
		base: Duration,
		factor: f64,
		max: Duration,
		jitter: bool,
	},
}

impl Default for RetryPolicy {
	fn default() -> Self {
		RetryPolicy::Schedule(DEFAULT_SCHEDULE.to_vec())
	}
}

impl RetryPolicy {
	/// Delay to wait after the given (1-based) attempt failed.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let n = attempt.max(1);
		let delay = match self {
			RetryPolicy::Schedule(schedule) => {
				let idx = (n as usize - 1).min(schedule.len().saturating_sub(1));
				schedule.get(idx).copied().unwrap_or(MIN_RETRY_DELAY)
			}
			RetryPolicy::Exponential {
				base,
				factor,
				max,
				jitter,
			} => {
				let exp = factor.powi((n - 1).min(i32::MAX as u32) as i32);
				let raw = base.as_secs_f64() * exp;
				let capped = if raw.is_finite() {
					raw.min(max.as_secs_f64())
				} else {
					max.as_secs_f64()
				};
				let secs = if *jitter {
					capped * (1.0 + fastrand::f64() * 0.25)
				} else {
					capped
				};
				Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(*max)
			}
		};
		delay.max(MIN_RETRY_DELAY)
	}
}
