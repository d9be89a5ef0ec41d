//! Most recent sensor reading.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hydro_protocol::SensorReading;
use parking_lot::RwLock;

/// Holds the last reading the worker parsed.
///
/// Publishing swaps the whole slot, so readers see either the previous
/// reading or the new one.
#[derive(Debug, Default)]
pub struct LatestReadingCache {
    latest: RwLock<Option<Arc<SensorReading>>>,
    published: AtomicU64,
}

impl LatestReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored reading.
    pub fn publish(&self, reading: SensorReading) {
        let reading = Arc::new(reading);
        *self.latest.write() = Some(reading);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// The stored reading, if any has been published.
    pub fn latest(&self) -> Option<SensorReading> {
        self.shared().as_deref().copied()
    }

    /// The stored reading without copying it out.
    pub fn shared(&self) -> Option<Arc<SensorReading>> {
        self.latest.read().clone()
    }

    /// Number of readings published so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(temperature: f64) -> SensorReading {
        SensorReading {
            temperature,
            humidity: 50.0,
            tds: 400.0,
            ph: 6.5,
            ec: None,
        }
    }

    #[test]
    fn test_empty_cache() {
        let cache = LatestReadingCache::new();
        assert_eq!(cache.latest(), None);
        assert_eq!(cache.published_count(), 0);
    }

    #[test]
    fn test_publish_replaces() {
        let cache = LatestReadingCache::new();
        cache.publish(reading(20.0));
        cache.publish(reading(21.5));

        assert_eq!(cache.latest(), Some(reading(21.5)));
        assert_eq!(cache.published_count(), 2);
    }

    #[test]
    fn test_concurrent_readers_see_whole_readings() {
        let cache = Arc::new(LatestReadingCache::new());
        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    cache.publish(reading(i as f64));
                }
            })
        };

        for _ in 0..1000 {
            if let Some(r) = cache.latest() {
                assert_eq!(r.humidity, 50.0);
                assert_eq!(r.ph, 6.5);
            }
        }
        writer.join().unwrap();
        assert_eq!(cache.latest(), Some(reading(999.0)));
    }
}
