use async_stream::stream;
use chrono::{DateTime, Local};
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use vellum_core::{DocumentKind, Envelope, ImageAsset};
use vellum_store::{Call, MemoryProvider, StoreConfigBuilder, StoreManager};

const REMOTE: &str = "http://couch.local/bench";

/// Statistics collected during a burst run
#[derive(Clone, Debug)]
pub struct BurstStats {
    pub label: &'static str,
    pub started_at: DateTime<Local>,
    pub operations: usize,
    pub engine_calls: usize,
    pub pauses: usize,
    pub resumes: usize,
    pub stored_images: usize,
    pub total_time: Duration,
    pub avg_op_time: Duration,
    pub ops_per_second: f64,
}

impl BurstStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║  {:<58}║", format!("{} ({})", self.label, self.started_at.format("%H:%M:%S")));
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Operations:                {:>30} ║", self.operations);
        println!("║  Engine Calls:              {:>30} ║", self.engine_calls);
        println!("║  Replication Pauses:        {:>30} ║", self.pauses);
        println!("║  Replication Resumes:       {:>30} ║", self.resumes);
        println!("║  Stored Images:             {:>30} ║", self.stored_images);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Operation Time:    {:>28}µs ║", self.avg_op_time.as_micros());
        println!("║  Operations/Second:         {:>30.0} ║", self.ops_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

#[derive(Clone, Debug)]
enum Op {
    Save { id: usize, version: usize },
    Get { id: usize },
    ListModel,
    SaveImage { content: usize },
}

/// Generator of a random mix of store operations
fn operation_generator(ids: usize, contents: usize, count: usize) -> impl Stream<Item = Op> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for version in 0..count {
            let op = match rng.gen_range(0..10) {
                0..=3 => Op::Save { id: rng.gen_range(0..ids), version },
                4..=7 => Op::Get { id: rng.gen_range(0..ids) },
                8 => Op::ListModel,
                _ => Op::SaveImage { content: rng.gen_range(0..contents) },
            };
            yield op;
        }
    }
}

fn grid(id: usize, version: usize) -> Envelope {
    Envelope::new(
        format!("grid-{}", id),
        "GridData",
        format!("{{\"rows\":{},\"version\":{}}}", id % 7 + 1, version),
    )
}

/// Run `count` random operations in a burst against a syncing store, then
/// wait for replication to come back.
pub async fn burst(
    label: &'static str,
    count: usize,
    spacing: Duration,
) -> Result<BurstStats, vellum_store::StoreError> {
    println!("\n[{}] {} operations, {:?} apart", label, count, spacing);
    let started_at = Local::now();
    let provider = Arc::new(MemoryProvider::new());
    let config = StoreConfigBuilder::new()
        .resume_grace(Duration::from_millis(50))
        .build();
    let manager = StoreManager::new(provider.clone(), config);
    let store = manager.open("bench", Some(REMOTE), false).await?;
    provider.log().clear();

    let start = Instant::now();
    let mut op_times = Vec::with_capacity(count);
    let mut ops = Box::pin(operation_generator(64, 8, count));

    while let Some(op) = ops.next().await {
        let op_start = Instant::now();
        match op {
            Op::Save { id, version } => {
                let mut envelope = grid(id, version);
                envelope.revision = store.cached(&envelope.id).and_then(|e| e.revision);
                store.save(envelope).await?;
            }
            Op::Get { id } => {
                store.query(None, Some(&format!("grid-{}", id))).await?;
            }
            Op::ListModel => {
                store.query(Some("GridData"), None).await?;
            }
            Op::SaveImage { content } => {
                let image = ImageAsset::new(format!("data:image/png;base64,{:08}", content));
                store.save_content_addressed(image).await?;
            }
        }
        op_times.push(op_start.elapsed());
        if !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
    }

    // wait for the scheduled resume
    tokio::time::sleep(store.scheduler().resume_delay() + Duration::from_millis(20)).await;
    let total_time = start.elapsed();

    let log = provider.log();
    let avg_op_time = if op_times.is_empty() {
        Duration::ZERO
    } else {
        op_times.iter().sum::<Duration>() / op_times.len() as u32
    };
    let stored_images = provider
        .engine("bench")
        .map_or(0, |engine| engine.count_model(ImageAsset::MODEL_NAME));

    let engine_calls = log.count(Call::is_engine_call);
    let pauses = log.count(|c| matches!(c, Call::Cancel));
    let resumes = log.count(|c| matches!(c, Call::Resume));
    info!(label, count, pauses, resumes, stored_images, "burst finished");

    manager.close_current().await?;

    Ok(BurstStats {
        label,
        started_at,
        operations: count,
        engine_calls,
        pauses,
        resumes,
        stored_images,
        total_time,
        avg_op_time,
        ops_per_second: count as f64 / total_time.as_secs_f64(),
    })
}

/// Burst size against pause/resume counts
pub async fn burst_scaling(max_ops: usize, step: usize) -> Result<(), vellum_store::StoreError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Pauses vs Burst Size               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut ops = step;
    while ops <= max_ops {
        let stats = burst("scaling", ops, Duration::ZERO).await?;
        println!(
            "  {:>6} ops | {:>3} pauses | {:>3} resumes | {:>4} images",
            stats.operations, stats.pauses, stats.resumes, stats.stored_images
        );
        ops += step;
    }
    Ok(())
}
