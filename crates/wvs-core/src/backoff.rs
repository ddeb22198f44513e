// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Full-jitter exponential retry backoff.

use rand::Rng;

/// Cap on the backoff window in seconds.
pub const MAX_DELAY_SECS: f64 = 60.0;

/// Retry delay in seconds, given the number of prior attempts.
///
/// Full jitter: uniform in `[0, min(60, 2^attempt))`. The first retry
/// (`attempt = 0`) draws from `[0, 1)`.
pub fn retry_delay_secs(attempt: i32) -> f64 {
    let cap = window_secs(attempt);
    if cap <= 0.0 {
        return 0.0;
    }
    rand::thread_rng().gen_range(0.0..cap)
}

/// Upper bound of the jitter window for the given attempt.
pub fn window_secs(attempt: i32) -> f64 {
    let attempt = attempt.clamp(0, 30);
    MAX_DELAY_SECS.min((2.0_f64).powi(attempt))
}
