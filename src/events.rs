//! Object event notifications.
//!
//! The store hands an [`Event`] to a [`NotificationSink`] after each
//! committed mutation. Sinks are fire-and-forget: `notify` must return
//! quickly and cannot fail the operation that produced the event.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::arn::Arn;
use crate::config::{EventsConfig, SinkKind};

/// Kinds of object event the store emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    ObjectCreatedPut,
    ObjectCreatedCopy,
    ObjectCreatedCompleteMultipartUpload,
    ObjectRemovedDelete,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ObjectCreatedPut => "ObjectCreated:Put",
            EventName::ObjectCreatedCopy => "ObjectCreated:Copy",
            EventName::ObjectCreatedCompleteMultipartUpload => {
                "ObjectCreated:CompleteMultipartUpload"
            }
            EventName::ObjectRemovedDelete => "ObjectRemoved:Delete",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One S3 event record, serialized with the AWS field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_version: &'static str,
    pub event_source: &'static str,
    pub aws_region: String,
    #[serde(serialize_with = "rfc3339_millis")]
    pub event_time: DateTime<Utc>,
    pub event_name: EventName,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Entity {
    pub s3_schema_version: &'static str,
    pub bucket: EventBucket,
    pub object: EventObject,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBucket {
    pub name: String,
    pub arn: Arn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventObject {
    pub key: String,
    pub size: u64,
    #[serde(rename = "eTag")]
    pub etag: String,
}

fn rfc3339_millis<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl Event {
    pub fn new(
        region: &str,
        name: EventName,
        bucket: &str,
        key: &str,
        size: u64,
        etag: &str,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            event_version: "2.0",
            event_source: "aws:s3",
            aws_region: region.to_string(),
            event_time: time,
            event_name: name,
            s3: S3Entity {
                s3_schema_version: "1.0",
                bucket: EventBucket {
                    name: bucket.to_string(),
                    arn: Arn::s3("", bucket),
                },
                object: EventObject {
                    key: key.to_string(),
                    size,
                    etag: etag.to_string(),
                },
            },
        }
    }

    /// `arn:aws:s3:<region>::<bucket>/<key>`, used to route the event.
    pub fn routing_key(&self) -> String {
        format!(
            "arn:{}:{}::{}/{}",
            self.event_source, self.aws_region, self.s3.bucket.name, self.s3.object.key
        )
    }
}

/// Receiver of object events.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: Event);
}

/// Writes each event to the log.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, event: Event) {
        info!(
            event = %event.event_name,
            routing_key = %event.routing_key(),
            bucket = %event.s3.bucket.name,
            key = %event.s3.object.key,
            size = event.s3.object.size,
            etag = %event.s3.object.etag,
            "object event"
        );
    }
}

/// Discards every event.
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _event: Event) {}
}

/// Forwards events to a bounded channel, dropping them when it is full.
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, event: Event) {
        if let Err(err) = self.tx.try_send(event) {
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            warn!("dropping object event: {reason}");
        }
    }
}

/// Drain queued events, writing each one as a JSON record keyed by its
/// routing key. Returns once every sender is gone.
pub async fn publish_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(body) => info!(
                target: "objectstore::events",
                routing_key = %event.routing_key(),
                %body,
                "published object event"
            ),
            Err(err) => warn!("failed to encode object event: {err}"),
        }
    }
}

/// Build the sink selected in the configuration.
///
/// The queue sink spawns its publisher, so it must be built inside a Tokio
/// runtime.
pub fn sink_from_config(config: &EventsConfig) -> Arc<dyn NotificationSink> {
    match config.sink {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Queue => {
            let (sink, rx) = ChannelSink::new(config.queue_capacity);
            tokio::spawn(publish_events(rx));
            Arc::new(sink)
        }
        SinkKind::Disabled => Arc::new(NullSink),
    }
}
