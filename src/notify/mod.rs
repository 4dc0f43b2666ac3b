//! Table publication broadcasts
//!
//! When an administrator publishes a new table, registered users get a
//! notification through the configured relay. Delivery is advisory: it
//! runs on a spawned task and a failure is logged and dropped, never
//! surfaced to the request that created the table.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::schemas::TableDoc;
use crate::types::{LecternError, Result};

/// Broadcast payload posted to the notification relay
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCreatedEvent {
    pub event: &'static str,
    pub table_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_by: String,
}

impl TableCreatedEvent {
    pub fn new(table_id: &bson::oid::ObjectId, table: &TableDoc) -> Self {
        Self {
            event: "tableCreated",
            table_id: table_id.to_hex(),
            title: table.title.clone(),
            description: table.description.clone(),
            created_by: table.created_by.clone(),
        }
    }
}

/// Delivery channel for broadcasts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &TableCreatedEvent) -> Result<()>;
}

/// Posts events as JSON to a configured relay URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LecternError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &TableCreatedEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| LecternError::Internal(format!("Broadcast delivery failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(LecternError::Internal(format!(
                "Broadcast relay returned {}",
                response.status()
            )));
        }

        debug!(url = %self.url, table_id = %event.table_id, "Delivered broadcast");
        Ok(())
    }
}

/// Fallback when no relay is configured; broadcasts land in the log
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &TableCreatedEvent) -> Result<()> {
        info!(table_id = %event.table_id, title = %event.title, "New table published");
        Ok(())
    }
}

/// Deliver a broadcast without blocking the request path
pub fn spawn_broadcast(notifier: Arc<dyn Notifier>, event: TableCreatedEvent) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&event).await {
            warn!(table_id = %event.table_id, error = %e, "Broadcast failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::PermissionMode;
    use bson::oid::ObjectId;

    fn table() -> TableDoc {
        TableDoc::new(
            "Marksheet".into(),
            Some("Term 1".into()),
            vec!["Name".into(), "Marks".into()],
            PermissionMode::Editable,
            "admin-1".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_event_wire_format() {
        let id = ObjectId::new();
        let event = TableCreatedEvent::new(&id, &table());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "tableCreated");
        assert_eq!(json["tableId"], id.to_hex());
        assert_eq!(json["title"], "Marksheet");
        assert_eq!(json["createdBy"], "admin-1");
    }

    #[test]
    fn test_event_omits_missing_description() {
        let mut t = table();
        t.description = None;
        let event = TableCreatedEvent::new(&ObjectId::new(), &t);
        let json = serde_json::to_value(&event).unwrap();

        assert!(json.get("description").is_none());
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        let event = TableCreatedEvent::new(&ObjectId::new(), &table());
        assert!(notifier.notify(&event).await.is_ok());
    }
}
