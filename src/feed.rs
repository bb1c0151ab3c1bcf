use std::{
    fmt::Debug,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use rand::Rng;
use serde::de::DeserializeOwned;

use crate::error::ConfigError;

/// How a [`Feed`] picks the next value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStrategy {
    /// Uniform pick with replacement on every call.
    Random,
    /// Fixed order, wrapping around once exhausted.
    Sequential,
}

/// A reusable source of input values for steps, e.g. user ids.
///
/// Feeds are cheap to clone and safe to share between concurrently running
/// iterations. A random feed draws from the calling thread's RNG; a sequential
/// feed advances an atomic cursor so two callers never observe a torn step.
///
/// ```rust
/// use barrage::Feed;
///
/// let feed = Feed::sequential("ids", vec!["1", "2"]).unwrap();
/// assert_eq!(feed.next(), "1");
/// assert_eq!(feed.next(), "2");
/// assert_eq!(feed.next(), "1");
/// ```
#[derive(Debug, Clone)]
pub struct Feed<T> {
    name: Arc<str>,
    strategy: FeedStrategy,
    items: Arc<[T]>,
    cursor: Arc<AtomicUsize>,
}

impl<T> Feed<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        strategy: FeedStrategy,
        items: impl IntoIterator<Item = T>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let items: Arc<[T]> = items.into_iter().collect();
        if items.is_empty() {
            return Err(ConfigError::EmptyFeed { feed: name });
        }
        Ok(Self {
            name: name.into(),
            strategy,
            items,
            cursor: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn random(
        name: impl Into<String>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<Self, ConfigError> {
        Self::new(name, FeedStrategy::Random, items)
    }

    pub fn sequential(
        name: impl Into<String>,
        items: impl IntoIterator<Item = T>,
    ) -> Result<Self, ConfigError> {
        Self::new(name, FeedStrategy::Sequential, items)
    }

    /// Load the seed values from a JSON array on disk.
    pub fn from_json_file(
        name: impl Into<String>,
        strategy: FeedStrategy,
        path: impl AsRef<Path>,
    ) -> Result<Self, ConfigError>
    where
        T: DeserializeOwned,
    {
        let raw = std::fs::read(path)?;
        let items: Vec<T> = serde_json::from_slice(&raw)?;
        Self::new(name, strategy, items)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> FeedStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Never true for a constructed feed.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn next(&self) -> T {
        let idx = match self.strategy {
            FeedStrategy::Random => rand::rng().random_range(0..self.items.len()),
            FeedStrategy::Sequential => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % self.items.len()
            }
        };
        self.items[idx].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, io::Write};

    #[test]
    fn empty_source_is_rejected() {
        let err = Feed::<String>::random("users", Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyFeed { feed } if feed == "users"));
    }

    #[test]
    fn random_values_stay_within_seed_set() {
        let seeds = ["1", "2", "3", "4", "5"];
        let feed = Feed::random("users", seeds).unwrap();
        let allowed: HashSet<_> = seeds.into_iter().collect();

        for _ in 0..10_000 {
            assert!(allowed.contains(feed.next()));
        }
    }

    #[test]
    fn random_eventually_covers_every_seed() {
        let feed = Feed::random("users", 0..5).unwrap();
        let seen: HashSet<_> = (0..10_000).map(|_| feed.next()).collect();
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn sequential_wraps_around() {
        let feed = Feed::sequential("ids", ["a", "b", "c"]).unwrap();
        let got: Vec<_> = (0..7).map(|_| feed.next()).collect();
        assert_eq!(got, ["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn clones_share_the_sequential_cursor() {
        let feed = Feed::sequential("ids", [1, 2]).unwrap();
        let other = feed.clone();
        assert_eq!(feed.next(), 1);
        assert_eq!(other.next(), 2);
    }

    #[test]
    fn sequential_is_fair_across_threads() {
        let feed = Feed::sequential("ids", 0..4usize).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let feed = feed.clone();
                std::thread::spawn(move || (0..1000).map(|_| feed.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut counts = [0usize; 4];
        for h in handles {
            for v in h.join().unwrap() {
                counts[v] += 1;
            }
        }
        assert_eq!(counts, [1000; 4]);
    }

    #[test]
    fn loads_seed_values_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["1", "2", "3"]"#).unwrap();

        let feed: Feed<String> =
            Feed::from_json_file("users", FeedStrategy::Sequential, file.path()).unwrap();
        assert_eq!(feed.len(), 3);
        assert_eq!(feed.next(), "1");
    }

    #[test]
    fn json_feed_with_no_values_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();

        let err = Feed::<String>::from_json_file("users", FeedStrategy::Random, file.path())
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyFeed { .. }));
    }
}
