//! Aggregation that keeps shard affinity for partitioned outputs.
//!
//! The 128-bit hash key space is split into equal ranges, one per bucket. Each
//! bucket aggregates independently and stamps its flushes with the midpoint of
//! its range as explicit hash key, so every record a bucket emits lands on the
//! same shard.

use crate::aggregator::{AggregateFlush, Aggregator, MessageAggregator};
use crate::settings::ProducerDaemonSettings;
use messaging::{
    Attributes, Message, StreamError, ATTRIBUTE_KINESIS_EXPLICIT_HASH_KEY,
    ATTRIBUTE_KINESIS_PARTITION_KEY,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::error;

/// Bucket choice for messages without a usable key.
#[cfg_attr(test, mockall::automock)]
pub trait PartitionerRand: Send {
    /// Uniform index in `0..n`.
    fn index(&mut self, n: usize) -> usize;
}

/// [`PartitionerRand`] backed by a seeded [`StdRng`].
pub struct RandomPartitioner(StdRng);

impl RandomPartitioner {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl PartitionerRand for RandomPartitioner {
    fn index(&mut self, n: usize) -> usize {
        self.0.gen_range(0..n)
    }
}

/// Representative explicit hash key of every bucket: the midpoint of its range.
pub fn bucket_hash_keys(bucket_count: usize) -> Vec<u128> {
    let count = bucket_count as u128;
    let step = u128::MAX / count;
    let half = step / 2;

    (0..count).map(|bucket| bucket * step + half).collect()
}

pub struct PartitionedAggregator {
    rand: Box<dyn PartitionerRand>,
    buckets: Vec<Box<dyn Aggregator>>,
}

impl PartitionedAggregator {
    pub fn new(settings: &ProducerDaemonSettings) -> Result<Self, StreamError> {
        Self::with_interfaces(
            Box::new(RandomPartitioner::from_entropy()),
            settings.partition_bucket_count,
            |attributes| Ok(Box::new(MessageAggregator::with_attributes(settings, attributes))),
        )
    }

    /// Build with an injected bucket chooser and bucket factory.
    ///
    /// `create` receives the seed attributes of each bucket in bucket order.
    pub fn with_interfaces<F>(
        rand: Box<dyn PartitionerRand>,
        bucket_count: usize,
        mut create: F,
    ) -> Result<Self, StreamError>
    where
        F: FnMut(Attributes) -> Result<Box<dyn Aggregator>, StreamError>,
    {
        if bucket_count == 0 {
            return Err(StreamError::config("partition bucket count must be at least 1"));
        }

        let buckets = bucket_hash_keys(bucket_count)
            .into_iter()
            .map(|key| {
                let mut attributes = Attributes::new();
                attributes.insert(ATTRIBUTE_KINESIS_EXPLICIT_HASH_KEY.to_string(), key.to_string());
                create(attributes).map_err(|e| {
                    StreamError::config(format!("failed to create aggregator for bucket: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rand, buckets })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket for `msg`: explicit hash key, then md5 of the partition key,
    /// then a random bucket.
    pub fn bucket_for(&mut self, msg: &Message) -> usize {
        let count = self.buckets.len() as u128;

        match hash_key_for_message(msg) {
            Ok(Some(key)) => (key % count) as usize,
            Ok(None) => self.rand.index(self.buckets.len()),
            Err(e) => {
                error!(
                    error = %e,
                    "failed to determine partition or explicit hash key, will choose one at random"
                );
                self.rand.index(self.buckets.len())
            }
        }
    }
}

fn hash_key_for_message(msg: &Message) -> Result<Option<u128>, StreamError> {
    if let Some(key) = msg.attribute(ATTRIBUTE_KINESIS_EXPLICIT_HASH_KEY) {
        return key
            .parse::<u128>()
            .map(Some)
            .map_err(|_| StreamError::encoding(format!("invalid explicit hash key: {key}")));
    }

    if let Some(partition_key) = msg.attribute(ATTRIBUTE_KINESIS_PARTITION_KEY) {
        let digest = md5::compute(partition_key.as_bytes());
        return Ok(Some(u128::from_be_bytes(digest.0)));
    }

    Ok(None)
}

impl Aggregator for PartitionedAggregator {
    fn write(&mut self, msg: &Message) -> Result<Vec<AggregateFlush>, StreamError> {
        let bucket = self.bucket_for(msg);
        self.buckets[bucket].write(msg)
    }

    fn flush(&mut self) -> Result<Vec<AggregateFlush>, StreamError> {
        let mut result = Vec::new();

        for bucket in &mut self.buckets {
            let flushes = bucket
                .flush()
                .map_err(|e| StreamError::backend(format!("failed to flush bucket: {e}")))?;
            result.extend(flushes);
        }

        Ok(result)
    }
}
