use std::future::Future;

use anyhow::Context;
use rumqttc::{AsyncClient, ClientError, QoS};
use serde::Serialize;
use thiserror::Error;

use heatpump_common::config::RetryPolicy;

#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s)")]
pub struct RetryError<E> {
    pub attempts: u32,
    #[source]
    pub last: E,
}

/// Run `operation` until it succeeds or the policy runs out of attempts,
/// sleeping with exponential backoff in between.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(last) if attempts >= policy.max_attempts => {
                return Err(RetryError { attempts, last });
            }
            Err(_) => tokio::time::sleep(policy.backoff(attempts)).await,
        }
    }
}

#[derive(Clone)]
pub struct Publisher {
    client: AsyncClient,
    policy: RetryPolicy,
}

impl Publisher {
    pub fn new(client: AsyncClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    /// Queue a publish on the event loop without waiting for room. While the
    /// broker is unreachable the queue stays full; each attempt is retried
    /// with backoff and then given up, so callers never block on an outage.
    pub async fn publish(
        &self,
        topic: &str,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), RetryError<ClientError>> {
        retry(self.policy, || {
            let queued = self
                .client
                .try_publish(topic, QoS::AtLeastOnce, retain, payload.clone());
            async move { queued }
        })
        .await
    }

    /// Serialize `value` and publish it retained.
    pub async fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> anyhow::Result<()> {
        let body = serde_json::to_vec(value)
            .with_context(|| format!("failed to serialize payload for {topic}"))?;
        self.publish(topic, true, body)
            .await
            .with_context(|| format!("publish to {topic} failed"))
    }
}

#[cfg(test)]
mod tests {
    use std::{io, time::Duration};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let mut calls = 0u32;
        let result = retry(fast_policy(3), || {
            calls += 1;
            let call = calls;
            async move {
                if call < 3 {
                    Err(io::Error::other("broker busy"))
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_gives_up_with_last_error() {
        let mut calls = 0u32;
        let result: Result<(), _> = retry(fast_policy(2), || {
            calls += 1;
            let call = calls;
            async move { Err(io::Error::other(format!("failure {call}"))) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last.to_string(), "failure 2");
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn publish_gives_up_when_queue_stays_full() {
        // Nothing polls the event loop, as when the broker is unreachable.
        let (client, _eventloop) =
            AsyncClient::new(rumqttc::MqttOptions::new("test", "127.0.0.1", 1883), 1);
        let publisher = Publisher::new(client, fast_policy(3));

        publisher
            .publish("hvac", true, b"first".to_vec())
            .await
            .unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            publisher.publish("hvac", true, b"second".to_vec()),
        )
        .await
        .expect("publish must not wait for queue space");
        assert_eq!(outcome.unwrap_err().attempts, 3);
    }

    #[tokio::test]
    async fn publish_reports_closed_event_loop() {
        let (client, eventloop) =
            AsyncClient::new(rumqttc::MqttOptions::new("test", "127.0.0.1", 1883), 8);
        drop(eventloop);
        let publisher = Publisher::new(client, fast_policy(2));

        let err = publisher
            .publish_json("hvac", &serde_json::json!({ "mode": "off" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("publish to hvac failed"));
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_sleep() {
        let started = std::time::Instant::now();
        let policy = RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_secs(10),
        };
        let result: Result<(), _> =
            retry(policy, || async { Err(io::Error::other("down")) }).await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
