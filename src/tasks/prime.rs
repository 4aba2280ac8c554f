//! Prime-finding executors.
//!
//! Two methods: `sieve` (fast, computed in one pass with cooperative yields)
//! and `trial_division` (slower, but checkpoints its scan position so a
//! reclaimed task resumes where the previous attempt stopped).

use super::registry::{CheckpointAck, TaskContext};

use anyhow::Result;
use serde_json::json;
use std::time::Instant;

const DEFAULT_LIMIT: u64 = 100_000;
const DEFAULT_MAX_LIMIT: u64 = 1_000_000;

/// Candidates examined between checkpoints in trial-division mode.
const CHECKPOINT_EVERY: u64 = 50_000;

/// Numbers sieved between cooperative yields.
const YIELD_EVERY: u64 = 100_000;

fn max_limit() -> u64 {
    std::env::var("PRIMES_MAX_LIMIT")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_MAX_LIMIT)
}

/// Sieve of Eratosthenes up to `limit` inclusive.
pub fn sieve(limit: u64) -> Vec<u64> {
    if limit < 2 {
        return Vec::new();
    }

    let size = (limit + 1) as usize;
    let mut composite = vec![false; size];

    let mut p = 2u64;
    while p * p <= limit {
        if !composite[p as usize] {
            let mut multiple = p * p;
            while multiple <= limit {
                composite[multiple as usize] = true;
                multiple += p;
            }
        }
        p += 1;
    }

    (2..=limit).filter(|&n| !composite[n as usize]).collect()
}

fn is_prime_trial(n: u64) -> bool {
    if n < 2 {
        return false;
    }

    let mut divisor = 2u64;
    while divisor * divisor <= n {
        if n % divisor == 0 {
            return false;
        }
        divisor += 1;
    }

    true
}

/// `prime` executor. Payload: `{limit, method}` with method one of
/// `sieve` (default) or `trial_division`.
pub async fn execute(ctx: TaskContext) -> Result<serde_json::Value> {
    let requested_limit = ctx.payload["limit"].as_u64().unwrap_or(DEFAULT_LIMIT);
    let method = ctx.payload["method"].as_str().unwrap_or("sieve").to_string();

    let cap = max_limit();
    let (limit, capped_from) = if requested_limit > cap {
        tracing::warn!(
            "Task {}: requested limit {} capped to {}",
            ctx.task_id,
            requested_limit,
            cap
        );
        (cap, Some(requested_limit))
    } else {
        (requested_limit, None)
    };

    tracing::info!(
        "Task {}: finding primes up to {} using {}",
        ctx.task_id,
        limit,
        method
    );

    let started = Instant::now();

    let (primes, base_elapsed_ms, resumed) = match method.as_str() {
        "trial_division" => trial_division_resumable(&ctx, limit).await?,
        _ => (sieve_cooperative(limit).await, 0, false),
    };

    let elapsed_ms = base_elapsed_ms + started.elapsed().as_millis() as u64;

    tracing::info!(
        "Task {}: found {} primes in {}ms",
        ctx.task_id,
        primes.len(),
        elapsed_ms
    );

    let mut result = json!({
        "count": primes.len(),
        "primes": primes,
        "elapsed_ms": elapsed_ms,
        "method": method,
    });

    if resumed {
        result["resumed"] = json!(true);
    }
    if let Some(requested) = capped_from {
        result["requested_limit"] = json!(requested);
        result["warning"] = json!(format!("Requested limit {} was capped to {}", requested, cap));
    }

    Ok(result)
}

/// `compute` executor: dispatches on the payload's `type` field, defaulting
/// to the prime computation.
pub async fn execute_compute(ctx: TaskContext) -> Result<serde_json::Value> {
    let computation_type = ctx.payload["type"].as_str().unwrap_or("prime").to_string();

    if computation_type == "prime" {
        return execute(ctx).await;
    }

    Ok(json!({
        "result": format!("Processed compute task {}", ctx.task_id),
        "computation_type": computation_type,
    }))
}

/// Sieve in one pass, yielding to the runtime between stretches so the
/// heartbeat ticker keeps its schedule during large computations.
async fn sieve_cooperative(limit: u64) -> Vec<u64> {
    if limit <= YIELD_EVERY {
        return sieve(limit);
    }

    // The sieve itself is not incremental; chunk only the collection phase
    let size = (limit + 1) as usize;
    let mut composite = vec![false; size];

    let mut p = 2u64;
    while p * p <= limit {
        if !composite[p as usize] {
            let mut multiple = p * p;
            while multiple <= limit {
                composite[multiple as usize] = true;
                multiple += p;
            }
            tokio::task::yield_now().await;
        }
        p += 1;
    }

    let mut primes = Vec::new();
    for n in 2..=limit {
        if !composite[n as usize] {
            primes.push(n);
        }
        if n % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    primes
}

/// Scan candidates one by one, checkpointing `{last_checked, primes}` every
/// `CHECKPOINT_EVERY` numbers. A resumed attempt picks up after the last
/// checkpointed candidate and keeps the accumulated elapsed time.
async fn trial_division_resumable(
    ctx: &TaskContext,
    limit: u64,
) -> Result<(Vec<u64>, u64, bool)> {
    let (mut primes, mut last_checked, base_elapsed_ms, resumed) = match &ctx.resume {
        Some(resume) => {
            let primes: Vec<u64> = resume.state["primes"]
                .as_array()
                .map(|values| values.iter().filter_map(|v| v.as_u64()).collect())
                .unwrap_or_default();
            let last_checked = resume.state["last_checked"].as_u64().unwrap_or(1);

            tracing::info!(
                "Task {}: resuming from checkpoint at {} ({} primes so far)",
                ctx.task_id,
                last_checked,
                primes.len()
            );

            (primes, last_checked, resume.elapsed_ms, true)
        }
        None => (Vec::new(), 1, 0, false),
    };

    let started = Instant::now();
    let mut since_checkpoint = 0u64;

    while last_checked < limit {
        last_checked += 1;

        if is_prime_trial(last_checked) {
            primes.push(last_checked);
        }

        since_checkpoint += 1;
        if since_checkpoint >= CHECKPOINT_EVERY && last_checked < limit {
            since_checkpoint = 0;

            let elapsed_ms = base_elapsed_ms + started.elapsed().as_millis() as u64;
            let state = json!({
                "last_checked": last_checked,
                "primes": primes,
            });

            match (ctx.checkpoint)(state, elapsed_ms).await? {
                CheckpointAck::Renewed { .. } => {}
                CheckpointAck::Lost => {
                    anyhow::bail!("lease lost at candidate {}", last_checked);
                }
            }
        } else if last_checked % 1000 == 0 {
            tokio::task::yield_now().await;
        }
    }

    Ok((primes, base_elapsed_ms, resumed))
}
