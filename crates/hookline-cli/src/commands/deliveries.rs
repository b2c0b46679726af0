//! Webhook delivery commands.

use anyhow::Result;

use super::{ApiClient, field, print_json};

pub async fn list(client: &ApiClient, webhook: &str, limit: u32, raw: bool) -> Result<()> {
    let deliveries = client
        .get(&format!(
            "/api/v1/webhooks/{}/deliveries?limit={}",
            webhook, limit
        ))
        .await?;
    if raw {
        return print_json(&deliveries);
    }

    let deliveries = deliveries.as_array().cloned().unwrap_or_default();
    if deliveries.is_empty() {
        println!("No deliveries");
        return Ok(());
    }
    println!("{:<25}  {:<14}  {:<8}  DETAIL", "CREATED", "EVENT", "OUTCOME");
    for delivery in &deliveries {
        let detail = delivery
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| field(delivery, "response"));
        println!(
            "{:<25}  {:<14}  {:<8}  {}",
            field(delivery, "created_at"),
            field(delivery, "event_type"),
            field(delivery, "outcome"),
            detail,
        );
    }
    Ok(())
}
