//! Queue commands.

use anyhow::Result;
use hookline_core::job::{JobStatus, QueueName};
use serde_json::{Value, json};

use super::{ApiClient, field, print_json};

const STATUSES: [&str; 6] = ["waiting", "active", "delayed", "paused", "completed", "failed"];

pub async fn stats(client: &ApiClient, queue: QueueName, raw: bool) -> Result<()> {
    let stats = client
        .get(&format!("/api/v1/queues/{}/stats", queue))
        .await?;
    if raw {
        return print_json(&stats);
    }

    let paused = stats.get("paused").and_then(Value::as_bool).unwrap_or(false);
    println!("{}{}", queue, if paused { " (paused)" } else { "" });
    for status in STATUSES {
        let count = stats["counts"].get(status).and_then(Value::as_u64).unwrap_or(0);
        println!("  {:<10} {}", status, count);
    }
    Ok(())
}

pub async fn jobs(
    client: &ApiClient,
    queue: QueueName,
    status: Option<JobStatus>,
    limit: u32,
    raw: bool,
) -> Result<()> {
    let mut path = format!("/api/v1/queues/{}/jobs?limit={}", queue, limit);
    if let Some(status) = status {
        path.push_str(&format!("&status={}", status));
    }
    let jobs = client.get(&path).await?;
    if raw {
        return print_json(&jobs);
    }

    let jobs = jobs.as_array().cloned().unwrap_or_default();
    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    println!(
        "{:<36}  {:<18}  {:<9}  {:>8}  REASON",
        "ID", "KIND", "STATUS", "ATTEMPTS"
    );
    for job in &jobs {
        let attempts = format!(
            "{}/{}",
            job["attempts_made"].as_u64().unwrap_or(0),
            job["max_attempts"].as_u64().unwrap_or(0)
        );
        println!(
            "{:<36}  {:<18}  {:<9}  {:>8}  {}",
            field(job, "id"),
            field(job, "kind"),
            field(job, "status"),
            attempts,
            field(job, "failed_reason"),
        );
    }
    Ok(())
}

pub async fn pause(client: &ApiClient, queue: QueueName) -> Result<()> {
    client
        .post(&format!("/api/v1/queues/{}/pause", queue), None)
        .await?;
    println!("Paused {}", queue);
    Ok(())
}

pub async fn resume(client: &ApiClient, queue: QueueName) -> Result<()> {
    client
        .post(&format!("/api/v1/queues/{}/resume", queue), None)
        .await?;
    println!("Resumed {}", queue);
    Ok(())
}

pub async fn purge(
    client: &ApiClient,
    queue: QueueName,
    status: JobStatus,
    grace_ms: u64,
    raw: bool,
) -> Result<()> {
    let result = client
        .post(
            &format!("/api/v1/queues/{}/purge", queue),
            Some(json!({ "grace_ms": grace_ms, "status": status })),
        )
        .await?;
    if raw {
        return print_json(&result);
    }
    println!(
        "Purged {} {} job(s) from {}",
        result["removed"].as_u64().unwrap_or(0),
        status,
        queue
    );
    Ok(())
}
