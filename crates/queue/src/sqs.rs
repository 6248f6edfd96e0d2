//! AWS SQS queue implementation.

use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use chrono::{TimeZone, Utc};
use tracing::{debug, info};

use powermgmt_core::config::{AwsConfig, QueueConfig};

use crate::error::QueueError;
use crate::queue::{DurableQueue, QueueHealth, QueueMessage};

/// SQS rejects per-message delays above 15 minutes.
const MAX_DELAY_SECS: u64 = 900;

/// SQS-backed durable queue.
pub struct SqsQueue {
    client: Client,
    name: String,
    queue_url: String,
    visibility_timeout_secs: i32,
}

/// Build one SQS client shared by every queue.
pub async fn sqs_client(aws: &AwsConfig) -> Client {
    let region = aws_sdk_sqs::config::Region::new(aws.region.clone());

    // Build SQS client config directly instead of aws_config::defaults(),
    // which would pick up a generic AWS_ENDPOINT_URL meant for another service.
    let mut sqs_config = aws_sdk_sqs::Config::builder()
        .region(region)
        .behavior_version(BehaviorVersion::latest());

    if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
        let creds = Credentials::new(
            key_id,
            secret,
            aws.session_token.clone(),
            None,
            "powermgmt-queue-static",
        );
        sqs_config = sqs_config.credentials_provider(creds);
    } else {
        let chain = aws_config::default_provider::credentials::default_provider().await;
        sqs_config = sqs_config.credentials_provider(chain);
    }

    // Only apply endpoint override if QUEUE_AWS_ENDPOINT_URL is explicitly set.
    if let Some(ref endpoint) = aws.endpoint_url {
        let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.clone()
        } else {
            format!("https://{endpoint}")
        };
        sqs_config = sqs_config.endpoint_url(&url);
    }

    Client::from_conf(sqs_config.build())
}

impl SqsQueue {
    pub fn new(client: Client, queues: &QueueConfig, name: &str) -> Result<Self, QueueError> {
        let queue_url = queues
            .queue_url(name)
            .ok_or_else(|| QueueError::NotFound(format!("no SQS URL prefix for queue {name}")))?;

        info!(queue_url = %queue_url, "SQS queue initialized");

        Ok(Self {
            client,
            name: name.to_string(),
            queue_url,
            visibility_timeout_secs: queues.visibility_timeout_secs as i32,
        })
    }
}

#[async_trait]
impl DurableQueue for SqsQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String, delay: Duration) -> Result<String, QueueError> {
        let delay_secs = delay.as_secs().min(MAX_DELAY_SECS) as i32;

        let resp = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .delay_seconds(delay_secs)
            .send()
            .await
            .map_err(|e| QueueError::Send(format!("SQS send failed: {e:?}")))?;

        let id = resp.message_id().unwrap_or("unknown").to_string();
        debug!(queue = %self.name, message_id = %id, delay_secs, "Sent SQS message");
        Ok(id)
    }

    async fn receive(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        // SQS caps at 10 messages per request.
        let capped = max_messages.clamp(1, 10) as i32;

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(20)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS receive failed: {e:?}")))?;

        let sqs_messages = resp.messages.unwrap_or_default();
        debug!(queue = %self.name, count = sqs_messages.len(), "Received SQS messages");

        let mut messages = Vec::with_capacity(sqs_messages.len());
        for msg in sqs_messages {
            let id = msg.message_id().unwrap_or("unknown").to_string();
            let body = msg.body().unwrap_or("").to_string();
            let receipt_handle = msg
                .receipt_handle()
                .ok_or_else(|| QueueError::Parse("missing receipt handle".into()))?
                .to_string();

            // SentTimestamp is epoch millis.
            let timestamp = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            let attempt_count = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1);

            messages.push(QueueMessage {
                id,
                body,
                receipt_handle,
                timestamp,
                attempt_count,
            });
        }

        Ok(messages)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("SQS delete failed: {e:?}")))?;

        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(queue = %self.name, "Nacking SQS message (visibility=0)");

        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| QueueError::Provider(format!("SQS visibility change failed: {e:?}")))?;

        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS health check failed: {e:?}")))?;

        let count = resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse::<u64>().ok());

        Ok(QueueHealth {
            connected: true,
            approximate_message_count: count,
            provider: "sqs".to_string(),
        })
    }
}
