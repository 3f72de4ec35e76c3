// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cancellable suspension points.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless `shutdown` fires first.
///
/// Returns `true` when the full duration elapsed, `false` on shutdown.
pub async fn sleep_cancellable(shutdown: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !shutdown.is_cancelled();
    }
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let token = CancellationToken::new();
        assert!(sleep_cancellable(&token, Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_shutdown() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();
        assert!(!sleep_cancellable(&token, Duration::from_secs(3600)).await);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_zero_duration_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(sleep_cancellable(&token, Duration::ZERO).await);
        token.cancel();
        assert!(!sleep_cancellable(&token, Duration::ZERO).await);
    }
}
