use burst::{burst, burst_scaling};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
pub mod burst;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())?;
    Ok(())
}

async fn async_main() -> Result<(), vellum_store::StoreError> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            STORE BURST BENCHMARK                           ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Back-to-back operations: one pause, one resume
    burst("tight burst", 200, Duration::ZERO).await?.print();

    // Operations spaced wider than the grace period resume in between
    burst("spaced operations", 20, Duration::from_millis(120))
        .await?
        .print();

    burst("large burst", 2000, Duration::ZERO).await?.print();

    burst_scaling(1000, 250).await?;

    println!("\n✓ All bursts completed successfully!");
    Ok(())
}
