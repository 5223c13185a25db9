//! RabbitMQ streams client.
//!
//! Each read opens a connection, consumes from the requested offset until
//! either `limit` messages arrived or the read deadline passed, then closes
//! everything again. Stream queues keep messages after ack, so nothing is
//! lost by reconnecting per read.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info};

use crate::client::{StreamClient, StreamMessage, StreamOffset};
use crate::error::StreamError;

const OFFSET_HEADER: &str = "x-stream-offset";

/// RabbitMQ-streams-backed [`StreamClient`].
pub struct RabbitMqStreamClient {
    dsn: String,
    read_timeout: Duration,
}

impl RabbitMqStreamClient {
    pub fn new(dsn: impl Into<String>, read_timeout: Duration) -> Self {
        let client = Self {
            dsn: dsn.into(),
            read_timeout,
        };
        info!(read_timeout = ?client.read_timeout, "RabbitMQ stream client initialized");
        client
    }

    async fn connect(&self) -> Result<(Connection, Channel), StreamError> {
        let connection = Connection::connect(&self.dsn, ConnectionProperties::default())
            .await
            .map_err(|e| StreamError::Connection(format!("failed to connect to RabbitMQ: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| StreamError::Connection(format!("failed to open channel: {e}")))?;
        Ok((connection, channel))
    }

    async fn declare_stream(&self, channel: &Channel, stream_name: &str) -> Result<(), StreamError> {
        let mut args = FieldTable::default();
        args.insert("x-queue-type".into(), AMQPValue::LongString("stream".into()));
        channel
            .queue_declare(
                stream_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                args,
            )
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn consume(
        &self,
        channel: &Channel,
        stream_name: &str,
        offset: StreamOffset,
        limit: usize,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        self.declare_stream(channel, stream_name).await?;

        let prefetch = limit.clamp(1, 1000) as u16;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(protocol)?;

        let mut args = FieldTable::default();
        let start = match offset {
            StreamOffset::First => AMQPValue::LongString("first".into()),
            StreamOffset::At(at) => AMQPValue::LongLongInt(at),
        };
        args.insert(OFFSET_HEADER.into(), start);

        let mut consumer = channel
            .basic_consume(stream_name, "", BasicConsumeOptions::default(), args)
            .await
            .map_err(protocol)?;
        let tag = consumer.tag().as_str().to_string();

        let deadline = tokio::time::Instant::now() + self.read_timeout;
        let mut messages = Vec::new();
        let mut failure = None;

        while messages.len() < limit {
            let delivery = match tokio::time::timeout_at(deadline, consumer.next()).await {
                Ok(Some(Ok(delivery))) => delivery,
                Ok(Some(Err(e))) => {
                    failure = Some(StreamError::Connection(e.to_string()));
                    break;
                }
                // Consumer closed or read deadline reached.
                Ok(None) | Err(_) => break,
            };

            let Some(message_offset) = extract_offset(&delivery.properties) else {
                // Unreadable for good: reject without requeue and fail the read.
                if let Err(e) = delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..BasicNackOptions::default()
                    })
                    .await
                {
                    debug!(error = %e, "nack of undecodable stream message failed");
                }
                failure = Some(StreamError::MissingOffset);
                break;
            };

            delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(|e| StreamError::Connection(format!("ack failed: {e}")))?;
            messages.push(StreamMessage::new(
                message_offset,
                String::from_utf8_lossy(&delivery.data).into_owned(),
            ));
        }

        if let Err(e) = channel.basic_cancel(&tag, BasicCancelOptions::default()).await {
            debug!(error = %e, consumer_tag = %tag, "basic_cancel failed");
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(messages),
        }
    }
}

#[async_trait]
impl StreamClient for RabbitMqStreamClient {
    async fn read(
        &self,
        stream_name: &str,
        offset: StreamOffset,
        limit: usize,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        let (connection, channel) = self.connect().await?;

        let result = self.consume(&channel, stream_name, offset, limit).await;

        if let Err(e) = channel.close(200, "OK").await {
            debug!(error = %e, "channel close failed");
        }
        if let Err(e) = connection.close(200, "OK").await {
            debug!(error = %e, "connection close failed");
        }

        result
    }
}

fn protocol(e: lapin::Error) -> StreamError {
    StreamError::Protocol(e.to_string())
}

/// Read the broker-assigned offset from the message headers.
fn extract_offset(properties: &BasicProperties) -> Option<i64> {
    let headers = properties.headers().as_ref()?;
    let (_, value) = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == OFFSET_HEADER)?;

    match value {
        AMQPValue::LongLongInt(v) => Some(*v),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::Timestamp(v) => i64::try_from(*v).ok(),
        AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes()).ok()?.trim().parse().ok(),
        _ => None,
    }
}
