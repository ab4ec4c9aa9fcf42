//! Partition selection for messages without an explicit partition.
//!
//! Keyed messages are hashed so the same key always lands on the same
//! partition (as long as the partition count does not change). Keyless
//! messages are spread round-robin.

use std::sync::atomic::{AtomicUsize, Ordering};

use murmur2::{KAFKA_SEED, murmur2};

use crate::config::PartitionerKind;

/// Picks a partition in `0..partition_count`.
pub trait Partitioner: Send + Sync {
    /// `partition_count` is always positive.
    fn partition(&self, topic: &str, key: Option<&[u8]>, partition_count: i32) -> i32;
}

/// Shared round-robin cursor for keyless messages.
#[derive(Debug, Default)]
struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    fn next(&self, partition_count: i32) -> i32 {
        (self.next.fetch_add(1, Ordering::Relaxed) % partition_count as usize) as i32
    }
}

/// Java-client compatible: `toPositive(murmur2(key)) % partitions`.
#[derive(Debug, Default)]
pub struct Murmur2Partitioner {
    keyless: RoundRobin,
}

impl Partitioner for Murmur2Partitioner {
    fn partition(&self, _topic: &str, key: Option<&[u8]>, partition_count: i32) -> i32 {
        match key {
            Some(k) => ((murmur2(k, KAFKA_SEED) & 0x7fff_ffff) as i32) % partition_count,
            None => self.keyless.next(partition_count),
        }
    }
}

/// CRC32 of the key.
#[derive(Debug, Default)]
pub struct Crc32Partitioner {
    keyless: RoundRobin,
}

impl Partitioner for Crc32Partitioner {
    fn partition(&self, _topic: &str, key: Option<&[u8]>, partition_count: i32) -> i32 {
        match key {
            Some(k) => (crc32fast::hash(k) % partition_count as u32) as i32,
            None => self.keyless.next(partition_count),
        }
    }
}

/// Ignores keys.
#[derive(Debug, Default)]
pub struct RoundRobinPartitioner {
    cursor: RoundRobin,
}

impl Partitioner for RoundRobinPartitioner {
    fn partition(&self, _topic: &str, _key: Option<&[u8]>, partition_count: i32) -> i32 {
        self.cursor.next(partition_count)
    }
}

/// The built-in partitioner for a config value.
pub fn for_kind(kind: PartitionerKind) -> Box<dyn Partitioner> {
    match kind {
        PartitionerKind::Murmur2Random => Box::new(Murmur2Partitioner::default()),
        PartitionerKind::ConsistentRandom => Box::new(Crc32Partitioner::default()),
        PartitionerKind::RoundRobin => Box::new(RoundRobinPartitioner::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_murmur2_matches_java_client() {
        // Values from the Java client's DefaultPartitioner.
        let p = Murmur2Partitioner::default();
        assert_eq!(p.partition("t", Some(b"21"), 10), 0);
        assert_eq!(p.partition("t", Some(b"foobar"), 10), 6);
        assert_eq!(p.partition("t", Some(b"abc"), 10), 7);
    }

    #[test]
    fn test_same_key_same_partition() {
        for partitioner in [
            for_kind(PartitionerKind::Murmur2Random),
            for_kind(PartitionerKind::ConsistentRandom),
        ] {
            let first = partitioner.partition("t", Some(b"user-42"), 12);
            for _ in 0..10 {
                assert_eq!(partitioner.partition("t", Some(b"user-42"), 12), first);
            }
            assert!((0..12).contains(&first));
        }
    }

    #[test]
    fn test_keyless_messages_spread() {
        let p = Murmur2Partitioner::default();
        let seen: HashSet<i32> = (0..8).map(|_| p.partition("t", None, 4)).collect();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_round_robin_ignores_keys() {
        let p = RoundRobinPartitioner::default();
        let picks: Vec<i32> = (0..6).map(|_| p.partition("t", Some(b"k"), 3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_single_partition() {
        let p = Crc32Partitioner::default();
        assert_eq!(p.partition("t", Some(b"a"), 1), 0);
        assert_eq!(p.partition("t", None, 1), 0);
    }
}
