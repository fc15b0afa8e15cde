//! Connectivity and configuration check for a worker deployment.

use remerge_queue::{JobQueue, QueueConfig, RedisStatusStore};
use remerge_worker::WorkerConfig;

const REQUIRED_ENV: &[&str] = &[
    "REDIS_URL",
    "SUPABASE_URL",
    "SUPABASE_SERVICE_KEY",
    "OPENAI_API_KEY",
    "TWELVE_LABS_API_KEY",
    "LEMON_SLICE_API_KEY",
    "CREATOMATE_API_KEY",
    "CREATOMATE_TEMPLATE_ID",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_S3_BUCKET_NAME",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with script_max_chars={}",
        config.script_max_chars
    );
    ensure_env_present(REQUIRED_ENV)?;

    let queue_config = QueueConfig::from_env();
    let queue = JobQueue::new(queue_config.clone())?;
    queue.ping().await?;
    println!("worker-selfcheck: redis reachable");

    let diagnostics = queue.diagnostics(5).await?;
    println!(
        "worker-selfcheck: stream '{}' has {} entries",
        queue_config.stream_name, diagnostics.stream_len
    );
    for group in &diagnostics.groups {
        println!(
            "  group {} consumers={} pending={} last_delivered={}",
            group.name, group.consumers, group.pending, group.last_delivered_id
        );
    }
    for entry in &diagnostics.recent {
        println!(
            "  entry {} job_type={}",
            entry.id,
            entry.job_type.as_wire().unwrap_or("<missing>")
        );
    }

    let store = RedisStatusStore::new(&queue_config.redis_url)?;
    for (job_id, status) in store.sample(10).await? {
        println!(
            "  job {} status={}",
            job_id,
            status.as_deref().unwrap_or("<none>")
        );
    }

    println!("worker-selfcheck: ok");
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    let missing: Vec<&str> = vars
        .iter()
        .copied()
        .filter(|var| std::env::var(var).map_or(true, |v| v.is_empty()))
        .collect();
    if !missing.is_empty() {
        return Err(anyhow::anyhow!(
            "missing required env vars: {}",
            missing.join(", ")
        ));
    }
    Ok(())
}
