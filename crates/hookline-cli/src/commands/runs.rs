//! Run commands.

use anyhow::Result;

use super::{ApiClient, field, print_json};

pub async fn show(client: &ApiClient, id: &str) -> Result<()> {
    print_json(&client.get(&format!("/api/v1/runs/{}", id)).await?)
}

pub async fn cancel(client: &ApiClient, id: &str) -> Result<()> {
    let run = client
        .post(&format!("/api/v1/runs/{}/cancel", id), None)
        .await?;
    println!("Run {} is {}", id, field(&run, "status"));
    Ok(())
}
