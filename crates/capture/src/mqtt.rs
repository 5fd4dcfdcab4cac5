//! MQTT binding of the device link.
//!
//! Capture commands are published to one topic, and the device publishes
//! captured images to another. The client event loop must be driven by
//! [`MqttTransport::serve`] for either direction to make progress.
use super::{CapturedImage, ImageSink, Source, Transport, CAPTURE_COMMAND};
use anyhow::Context;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use std::future::Future;
use std::time::Duration;

// Delay before polling again after a connection error.
// The event loop reconnects on the next poll.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

// Requests the client buffers for the event loop. Once full, commands are
// refused until the event loop drains it.
const REQUEST_QUEUE_CAPACITY: usize = 16;

/// Config of an MQTT device link.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic to which capture commands are published.
    pub capture_topic: String,
    /// Topic on which the device publishes captured images.
    pub image_topic: String,
    /// Largest packet the client will accept. Larger images are dropped by the client.
    pub max_packet_bytes: usize,
}

pub struct MqttTransport {
    client: AsyncClient,
    capture_topic: String,
    image_topic: String,
}

impl MqttTransport {
    /// Build a client and its event loop. No connection is made until
    /// the event loop is polled.
    pub fn new(config: &Config) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options
            .set_keep_alive(Duration::from_secs(30))
            .set_clean_session(true)
            // Commands are tiny, so only the incoming side needs headroom.
            .set_max_packet_size(config.max_packet_bytes, 10 * 1024);

        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        (
            Self {
                client,
                capture_topic: config.capture_topic.clone(),
                image_topic: config.image_topic.clone(),
            },
            event_loop,
        )
    }

    /// Drive the MQTT event loop until `shutdown` resolves, subscribing to
    /// the image topic on every (re)connection and handing each image which
    /// arrives to `sink`.
    pub async fn serve<S, F>(
        &self,
        mut event_loop: EventLoop,
        sink: &S,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        S: ImageSink + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut subscribe_pending = false;

        loop {
            let event = tokio::select! {
                event = event_loop.poll() => event,
                () = &mut shutdown => {
                    tracing::info!("stopping MQTT event loop");
                    _ = self.client.try_disconnect();
                    return Ok(());
                }
            };

            match event {
                Ok(event) => self.on_event(event, sink, &mut subscribe_pending),
                Err(error) => {
                    subscribe_pending = false;
                    tracing::warn!(%error, backoff = ?RECONNECT_BACKOFF, "MQTT connection error");
                    () = tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }

    // Handle one event of the event loop. This runs on the only task which
    // polls the event loop, so it must never wait on the client's request
    // queue: a subscription which doesn't fit is retried on the next event.
    fn on_event<S: ImageSink + ?Sized>(
        &self,
        event: Event,
        sink: &S,
        subscribe_pending: &mut bool,
    ) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                tracing::info!(code = ?ack.code, "connected to MQTT broker");
                *subscribe_pending = true;
            }
            Event::Incoming(Packet::Publish(publish)) => self.on_publish(publish, sink),
            _ => {}
        }

        if *subscribe_pending {
            match self
                .client
                .try_subscribe(&self.image_topic, QoS::AtMostOnce)
            {
                Ok(()) => *subscribe_pending = false,
                Err(error) => tracing::debug!(
                    %error,
                    topic = %self.image_topic,
                    "MQTT request queue is full, deferring subscription"
                ),
            }
        }
    }

    fn on_publish<S: ImageSink + ?Sized>(&self, publish: Publish, sink: &S) {
        if publish.topic != self.image_topic {
            tracing::debug!(topic = %publish.topic, "ignoring message on unexpected topic");
            return;
        }
        tracing::debug!(len = publish.payload.len(), "received image message");

        // Rejections are logged and counted by the sink.
        _ = sink.deposit(CapturedImage::arrived(publish.payload, Source::Channel));
    }
}

#[async_trait::async_trait]
impl Transport for MqttTransport {
    // Fails at once if the request queue is full, as it is while the
    // broker is unreachable.
    async fn publish_command(&self) -> anyhow::Result<()> {
        self.client
            .try_publish(
                &self.capture_topic,
                QoS::AtMostOnce,
                false,
                CAPTURE_COMMAND.as_bytes(),
            )
            .with_context(|| format!("publishing to {}", self.capture_topic))?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Disposition, IngestError};
    use rumqttc::{ConnAck, ConnectReturnCode, Request, Subscribe};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<CapturedImage>>);

    impl ImageSink for Collect {
        fn deposit(&self, image: CapturedImage) -> Result<Disposition, IngestError> {
            self.0.lock().unwrap().push(image);
            Ok(Disposition::Stored)
        }
    }

    fn config() -> Config {
        Config {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "attendance-test".to_string(),
            username: Some("device".to_string()),
            password: None,
            capture_topic: "facial/attendance/capture".to_string(),
            image_topic: "facial/attendance/image".to_string(),
            max_packet_bytes: 1 << 20,
        }
    }

    #[tokio::test]
    async fn test_image_topic_routing() {
        let (transport, _event_loop) = MqttTransport::new(&config());
        let sink = Collect::default();

        transport.on_publish(
            Publish::new("facial/attendance/image", QoS::AtMostOnce, &b"jpeg"[..]),
            &sink,
        );
        transport.on_publish(
            Publish::new("facial/attendance/other", QoS::AtMostOnce, &b"noise"[..]),
            &sink,
        );

        let images = sink.0.into_inner().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].bytes.as_ref(), b"jpeg");
        assert_eq!(images[0].source, Source::Channel);
    }

    // Drain requests queued by the client but not yet taken up by the event loop.
    fn queued(event_loop: &mut EventLoop) -> Vec<Request> {
        event_loop.clean();
        event_loop.pending.drain(..).collect()
    }

    fn capture_request() -> Request {
        Request::Publish(Publish::new(
            "facial/attendance/capture",
            QoS::AtMostOnce,
            CAPTURE_COMMAND,
        ))
    }

    #[tokio::test]
    async fn test_publish_command_enqueues_capture() {
        let (transport, mut event_loop) = MqttTransport::new(&config());

        for _ in 0..3 {
            transport.publish_command().await.unwrap();
        }
        assert_eq!(queued(&mut event_loop), vec![capture_request(); 3]);

        // While the event loop can't drain the queue, commands fail rather than wait.
        for _ in 0..REQUEST_QUEUE_CAPACITY {
            transport.publish_command().await.unwrap();
        }
        let err = transport.publish_command().await.unwrap_err();
        assert_eq!(err.to_string(), "publishing to facial/attendance/capture");

        assert_eq!(queued(&mut event_loop).len(), REQUEST_QUEUE_CAPACITY);
        transport.publish_command().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_deferred_while_queue_is_full() {
        let (transport, mut event_loop) = MqttTransport::new(&config());
        let sink = Collect::default();

        for _ in 0..REQUEST_QUEUE_CAPACITY {
            transport.publish_command().await.unwrap();
        }

        // Connecting with a full queue must not block the event loop task.
        let mut subscribe_pending = false;
        transport.on_event(
            Event::Incoming(Packet::ConnAck(ConnAck::new(
                ConnectReturnCode::Success,
                false,
            ))),
            &sink,
            &mut subscribe_pending,
        );
        assert!(subscribe_pending);

        // Once the event loop drains the queue, the next event subscribes.
        assert_eq!(queued(&mut event_loop).len(), REQUEST_QUEUE_CAPACITY);
        transport.on_event(
            Event::Incoming(Packet::PingResp),
            &sink,
            &mut subscribe_pending,
        );
        assert!(!subscribe_pending);

        assert_eq!(
            queued(&mut event_loop),
            vec![Request::Subscribe(Subscribe::new(
                "facial/attendance/image",
                QoS::AtMostOnce
            ))]
        );

        // Images are still routed to the sink.
        transport.on_event(
            Event::Incoming(Packet::Publish(Publish::new(
                "facial/attendance/image",
                QoS::AtMostOnce,
                &b"jpeg"[..],
            ))),
            &sink,
            &mut subscribe_pending,
        );
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert!(queued(&mut event_loop).is_empty());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (transport, event_loop) = MqttTransport::new(&config());
        let sink = Collect::default();

        transport
            .serve(event_loop, &sink, std::future::ready(()))
            .await
            .unwrap();
    }
}
