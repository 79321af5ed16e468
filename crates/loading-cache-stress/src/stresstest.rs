use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use loading_cache::{CacheConfig, LoadingCache, metric};
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::WorkloadsConfig;

struct Report {
    concurrency: usize,
    keys: u64,
    loads: usize,
    failures: usize,
    durations: DDSketch,
}

pub async fn perform_stresstest(
    cache_config: CacheConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // initialize workloads
    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            let config = CacheConfig {
                name: format!("{}.{i}", cache_config.name),
                ..cache_config.clone()
            };
            let workload = Arc::new(workload);
            let loads = Arc::new(AtomicUsize::new(0));
            let loader = {
                let workload = Arc::clone(&workload);
                let loads = Arc::clone(&loads);
                move |key: u64| {
                    loads.fetch_add(1, Ordering::Relaxed);
                    let workload = Arc::clone(&workload);
                    async move { workload.load(key).await }
                }
            };
            let cache: LoadingCache<u64, _> = LoadingCache::with_config(
                config,
                loading_cache::Identity,
                loader,
            );
            (workload, cache, loads)
        })
        .collect();

    // warmup: request one key of each workload to make sure everything is up and running
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|(workload, cache, _)| {
            let key = workload.random_key();
            let cache = cache.clone();
            tokio::spawn(async move {
                // warmup failures are fine, the workload is expected to fail every so often
                let _ = cache.get(key).await;
            })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for (workload, cache, loads) in workloads.into_iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let concurrency = workload.concurrency.max(1);
        let permits = u32::try_from(concurrency).context("workload concurrency too large")?;

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let failures = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let permit = permit.context("semaphore closed")?;
                        let key = workload.random_key();
                        let cache = cache.clone();
                        let task_durations = Arc::clone(&task_durations);
                        let failures = Arc::clone(&failures);
                        let task_start = Instant::now();

                        tokio::spawn(async move {
                            if let Err(error) = cache.get(key).await {
                                if error.loader_error().is_none() {
                                    tracing::warn!(
                                        error = &error as &dyn std::error::Error,
                                        key,
                                        "Unexpected cache error"
                                    );
                                }
                                failures.fetch_add(1, Ordering::Relaxed);
                            }

                            if let Ok(mut durations) = task_durations.lock() {
                                durations.add(task_start.elapsed().as_secs_f64());
                            }

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore
                .acquire_many(permits)
                .await
                .context("semaphore closed")?;

            let durations = match task_durations.lock() {
                Ok(mut durations) => std::mem::take(&mut *durations),
                Err(_) => anyhow::bail!("a request panicked while recording its duration"),
            };

            metric!(gauge("stresstest.entries") = cache.len() as u64, "cache" => cache.name());

            anyhow::Ok(Report {
                concurrency,
                keys: workload.keys,
                loads: loads.load(Ordering::Relaxed),
                failures: failures.load(Ordering::Relaxed),
                durations,
            })
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let report = task.context("workload panicked")??;
        print_report(i, &report, duration);
    }

    Ok(())
}

fn print_report(i: usize, report: &Report, duration: Duration) {
    let Report {
        concurrency,
        keys,
        loads,
        failures,
        durations,
    } = report;

    let ops = durations.count();
    let ops_ps = ops as f32 / duration.as_secs_f32();
    println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");
    println!("  loads: {loads} for {keys} keys; failed operations: {failures}");

    if ops == 0 {
        return;
    }

    let quantile = |q| {
        let secs = durations.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(secs)
    };
    let avg = Duration::from_secs_f64(durations.sum().unwrap_or_default() / ops as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
}
