//! Job commands.

use anyhow::Result;
use hookline_core::job::QueueName;

use super::{ApiClient, field, print_json};

fn path(queue: QueueName, id: &str) -> String {
    format!("/api/v1/queues/{}/jobs/{}", queue, id)
}

pub async fn show(client: &ApiClient, queue: QueueName, id: &str) -> Result<()> {
    print_json(&client.get(&path(queue, id)).await?)
}

pub async fn retry(client: &ApiClient, queue: QueueName, id: &str) -> Result<()> {
    let job = client
        .post(&format!("{}/retry", path(queue, id)), None)
        .await?;
    println!("Job {} is {}", id, field(&job, "status"));
    Ok(())
}

pub async fn remove(client: &ApiClient, queue: QueueName, id: &str) -> Result<()> {
    client.delete(&path(queue, id)).await?;
    println!("Removed job {}", id);
    Ok(())
}
