// Job Publisher Port
//
// What handlers and producer services need from the broker: put bytes on a
// named queue. Implemented by `application::broker::Broker`.

use super::broker::{BrokerError, BrokerResult, PublishOptions};
use async_trait::async_trait;
use serde::Serialize;

#[async_trait]
pub trait JobPublisher: Send + Sync {
    /// Publish a persistent message.
    ///
    /// `Ok(true)` is a local-admission signal only, not a delivery guarantee.
    /// `Ok(false)` means the broker client refused the message; callers that
    /// need the message to exist must treat it as a hard failure.
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> BrokerResult<bool>;
}

/// Serialize `payload` to JSON and publish it
pub async fn publish_json<T>(
    publisher: &dyn JobPublisher,
    queue: &str,
    payload: &T,
    options: PublishOptions,
) -> BrokerResult<bool>
where
    T: Serialize + Sync + ?Sized,
{
    let bytes =
        serde_json::to_vec(payload).map_err(|e| BrokerError::Serialization(e.to_string()))?;
    publisher.publish(queue, &bytes, options).await
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PublishBehavior {
        Accept,
        Refuse,
        Disconnected,
    }

    /// Records every publish; acceptance is configurable
    pub struct RecordingPublisher {
        behavior: Mutex<PublishBehavior>,
        published: Mutex<Vec<(String, Vec<u8>, PublishOptions)>>,
    }

    impl RecordingPublisher {
        pub fn new(behavior: PublishBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                published: Mutex::new(Vec::new()),
            }
        }

        pub fn accepting() -> Self {
            Self::new(PublishBehavior::Accept)
        }

        pub fn set_behavior(&self, behavior: PublishBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub fn published(&self) -> Vec<(String, serde_json::Value, PublishOptions)> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(queue, bytes, options)| {
                    (
                        queue.clone(),
                        serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null),
                        options.clone(),
                    )
                })
                .collect()
        }
    }

    #[async_trait]
    impl JobPublisher for RecordingPublisher {
        async fn publish(
            &self,
            queue: &str,
            payload: &[u8],
            options: PublishOptions,
        ) -> BrokerResult<bool> {
            let behavior = *self.behavior.lock().unwrap();
            match behavior {
                PublishBehavior::Disconnected => Err(BrokerError::NotConnected),
                PublishBehavior::Refuse => Ok(false),
                PublishBehavior::Accept => {
                    self.published
                        .lock()
                        .unwrap()
                        .push((queue.to_string(), payload.to_vec(), options));
                    Ok(true)
                }
            }
        }
    }
}
