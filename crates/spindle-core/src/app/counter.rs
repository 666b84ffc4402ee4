//! BlobCounter - blob 上の分散カウンタ
//!
//! fan-out / fan-in の合流点を、ロックなしで「ちょうど 1 回」検出するための部品です。
//!
//! # 設計原則
//! - 値の更新は read → compute → 条件付き write（ETag の if-match）
//! - 競合したら読み直してやり直す（`ContentionPolicy` で有限回）
//! - 値は 0 との比較でしか意味を持たない
//!
//! # 使用例（Aleph パターン）
//! ```ignore
//! let counter = ctx.counter(CounterName::temporary(expiration));
//! counter.reset(ALEPH).await?;
//! for part in parts {
//!     ctx.put(&Part { counter: counter.name().clone(), .. }).await?;
//! }
//! // 兄弟の数が確定してから「公開」する
//! if counter.increment(-ALEPH + Decimal::from(parts.len())).await? <= Decimal::ZERO {
//!     // 全員が先に終わっていた
//! }
//!
//! // 各兄弟は終わるたびに
//! if counter.increment(Decimal::NEGATIVE_ONE).await? <= Decimal::ZERO {
//!     counter.delete().await?;
//!     // fan-in
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use ulid::Ulid;

use crate::domain::{CounterError, StorageError};
use crate::ports::{BlobStorage, ETag, WriteCondition};

/// 2^48. Large enough that no realistic sibling count reaches zero before
/// the reveal.
pub const ALEPH: Decimal = Decimal::from_parts(0, 65_536, 0, false, 0);

pub const COUNTER_CONTAINER: &str = "spindle-counters";

/// Container for counters that carry an expiration prefix.
pub const TEMPORARY_CONTAINER: &str = "spindle-temporary";

const EXPIRATION_FORMAT: &str = "%Y/%m/%d/%H/%M/%S";

/// Blob location of a counter record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterName {
    pub container: String,
    pub name: String,
}

impl CounterName {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }

    /// A named counter in the default counter container.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(COUNTER_CONTAINER, name)
    }

    /// Unique counter name, prefixed by its expiration time so that a
    /// sweeper can list what is overdue by prefix.
    pub fn temporary(expiration: DateTime<Utc>) -> Self {
        Self::new(
            TEMPORARY_CONTAINER,
            format!("{}/{}", expiration.format(EXPIRATION_FORMAT), Ulid::new()),
        )
    }

    /// Expiration encoded in a temporary name.
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        if self.container != TEMPORARY_CONTAINER {
            return None;
        }
        let prefix = self.name.get(..19)?;
        NaiveDateTime::parse_from_str(prefix, EXPIRATION_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Bounded exponential backoff for conflicting writes.
///
/// delay = min(max_delay, base_delay * multiplier^(attempt - 1))、実際の待ち時間は
/// その半分から全体までの一様乱数。
#[derive(Debug, Clone)]
pub struct ContentionPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 64,
            base_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
        }
    }
}

impl ContentionPolicy {
    /// Upper bound of the wait after the `attempt`-th conflict (1-indexed).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
            Duration::from_micros((secs * 1e6).round() as u64)
        } else {
            self.max_delay
        }
    }

    /// `next_delay` with jitter so that colliding workers spread out.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let upper = self.next_delay(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(upper / 2..=upper))
    }
}

/// Counter stored as a single decimal in one blob.
#[derive(Clone)]
pub struct BlobCounter {
    blobs: Arc<dyn BlobStorage>,
    name: CounterName,
    policy: ContentionPolicy,
}

impl BlobCounter {
    pub fn new(blobs: Arc<dyn BlobStorage>, name: CounterName) -> Self {
        Self {
            blobs,
            name,
            policy: ContentionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ContentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &CounterName {
        &self.name
    }

    /// Create or overwrite the record.
    pub async fn reset(&self, initial: Decimal) -> Result<(), CounterError> {
        self.blobs
            .put(
                &self.name.container,
                &self.name.name,
                encode(initial)?,
                WriteCondition::Always,
            )
            .await?;
        Ok(())
    }

    /// Current value, `None` if the record does not exist.
    pub async fn value(&self) -> Result<Option<Decimal>, CounterError> {
        Ok(self.read().await?.map(|(value, _)| value))
    }

    /// Atomically add `delta` and return the resulting value.
    ///
    /// A missing record is created with `delta`.
    pub async fn increment(&self, delta: Decimal) -> Result<Decimal, CounterError> {
        for attempt in 1..=self.policy.max_attempts {
            let (next, condition) = match self.read().await? {
                Some((current, etag)) => {
                    let next = current.checked_add(delta).ok_or_else(|| {
                        CounterError::Corrupted {
                            name: self.name.name.clone(),
                            message: format!("{current} + {delta} overflows"),
                        }
                    })?;
                    (next, WriteCondition::IfMatch(etag))
                }
                None => (delta, WriteCondition::IfAbsent),
            };

            let written = self
                .blobs
                .put(&self.name.container, &self.name.name, encode(next)?, condition)
                .await?;
            if written.is_some() {
                return Ok(next);
            }

            debug!(counter = %self.name.name, attempt, "counter write conflicted");
            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.jittered_delay(attempt)).await;
            }
        }

        Err(CounterError::Contention {
            name: self.name.name.clone(),
            attempts: self.policy.max_attempts,
        })
    }

    /// Remove the record. Best effort, not retried.
    pub async fn delete(&self) -> Result<bool, CounterError> {
        Ok(self
            .blobs
            .delete(&self.name.container, &self.name.name)
            .await?)
    }

    async fn read(&self) -> Result<Option<(Decimal, ETag)>, CounterError> {
        let Some((value, etag)) = self.blobs.get(&self.name.container, &self.name.name).await?
        else {
            return Ok(None);
        };
        let value = serde_json::from_value::<Decimal>(value).map_err(|e| {
            CounterError::Corrupted {
                name: self.name.name.clone(),
                message: e.to_string(),
            }
        })?;
        Ok(Some((value, etag)))
    }
}

fn encode(value: Decimal) -> Result<serde_json::Value, CounterError> {
    serde_json::to_value(value).map_err(|e| CounterError::Storage(StorageError::Encode(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryBlobStorage;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    fn counter(blobs: &Arc<InMemoryBlobStorage>) -> BlobCounter {
        BlobCounter::new(blobs.clone(), CounterName::named("test")).with_policy(
            ContentionPolicy {
                max_attempts: 1_000,
                base_delay: Duration::from_millis(1),
                multiplier: 1.5,
                max_delay: Duration::from_millis(4),
            },
        )
    }

    #[test]
    fn aleph_is_two_to_the_48() {
        assert_eq!(ALEPH, Decimal::from(1_u64 << 48));
    }

    #[rstest]
    #[case(1, 5)]
    #[case(2, 10)]
    #[case(4, 40)]
    #[case(8, 500)]
    #[case(60, 500)]
    fn contention_delay_is_capped(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = ContentionPolicy::default();
        assert_eq!(policy.next_delay(attempt), Duration::from_millis(expected_ms));
        let jittered = policy.jittered_delay(attempt);
        assert!(jittered <= Duration::from_millis(expected_ms));
        assert!(jittered >= Duration::from_millis(expected_ms / 2));
    }

    #[test]
    fn temporary_names_carry_their_expiration() {
        let expiration = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let name = CounterName::temporary(expiration);

        assert_eq!(name.container, TEMPORARY_CONTAINER);
        assert!(name.name.starts_with("2026/03/04/05/06/07/"));
        assert_eq!(name.expiration(), Some(expiration));
        assert_ne!(name, CounterName::temporary(expiration));
        assert_eq!(CounterName::named("x").expiration(), None);
    }

    #[tokio::test]
    async fn increment_creates_missing_record() {
        let blobs = Arc::new(InMemoryBlobStorage::new());
        let counter = counter(&blobs);

        assert_eq!(counter.value().await.unwrap(), None);
        assert_eq!(counter.increment(Decimal::from(3)).await.unwrap(), Decimal::from(3));
        assert_eq!(counter.increment(Decimal::from(-5)).await.unwrap(), Decimal::from(-2));
        assert!(counter.delete().await.unwrap());
        assert!(!counter.delete().await.unwrap());
    }

    #[tokio::test]
    async fn corrupted_record_is_reported() {
        let blobs = Arc::new(InMemoryBlobStorage::new());
        blobs
            .put(COUNTER_CONTAINER, "test", json!({"not": "a decimal"}), WriteCondition::Always)
            .await
            .unwrap();

        let result = counter(&blobs).increment(Decimal::ONE).await;
        assert!(matches!(result, Err(CounterError::Corrupted { .. })));
    }

    #[rstest]
    #[case(3)]
    #[case(16)]
    #[case(50)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn zero_crossing_has_a_single_winner(#[case] siblings: usize) {
        let blobs = Arc::new(InMemoryBlobStorage::new());
        let counter = counter(&blobs);
        counter.reset(ALEPH).await.unwrap();

        // 兄弟の半分は公開より先に終わる
        let early = siblings / 2;
        let mut tasks = Vec::new();
        for _ in 0..early {
            let c = counter.clone();
            tasks.push(tokio::spawn(async move {
                c.increment(Decimal::NEGATIVE_ONE).await.unwrap()
            }));
        }
        let reveal = {
            let c = counter.clone();
            tokio::spawn(async move {
                c.increment(-ALEPH + Decimal::from(siblings)).await.unwrap()
            })
        };
        for _ in early..siblings {
            let c = counter.clone();
            tasks.push(tokio::spawn(async move {
                c.increment(Decimal::NEGATIVE_ONE).await.unwrap()
            }));
        }
        tasks.push(reveal);

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() <= Decimal::ZERO {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(counter.value().await.unwrap(), Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn exhausted_contention_writes_nothing() {
        struct AlwaysConflict(InMemoryBlobStorage);

        #[async_trait::async_trait]
        impl BlobStorage for AlwaysConflict {
            async fn get(
                &self,
                container: &str,
                name: &str,
            ) -> Result<Option<(serde_json::Value, ETag)>, StorageError> {
                self.0.get(container, name).await
            }

            async fn put(
                &self,
                container: &str,
                name: &str,
                value: serde_json::Value,
                condition: WriteCondition,
            ) -> Result<Option<ETag>, StorageError> {
                match condition {
                    WriteCondition::Always => self.0.put(container, name, value, condition).await,
                    _ => Ok(None),
                }
            }

            async fn delete(&self, container: &str, name: &str) -> Result<bool, StorageError> {
                self.0.delete(container, name).await
            }

            async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
                self.0.list(container, prefix).await
            }
        }

        let blobs = Arc::new(AlwaysConflict(InMemoryBlobStorage::new()));
        let counter = BlobCounter::new(blobs, CounterName::named("busy")).with_policy(
            ContentionPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(2),
            },
        );
        counter.reset(Decimal::TEN).await.unwrap();

        let result = counter.increment(Decimal::NEGATIVE_ONE).await;
        assert!(matches!(
            result,
            Err(CounterError::Contention { attempts: 3, .. })
        ));
        assert_eq!(counter.value().await.unwrap(), Some(Decimal::TEN));
    }
}
