//! Synthetic producers for the demos

use ceplite_core::Value;
use ceplite_runtime::event::fields;
use ceplite_runtime::Fields;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const SENTIMENTS: &[&str] = &["POSITIVE", "NEUTRAL", "NEGATIVE"];
const KEYWORDS: &[&str] = &["BMW", "Audi", "Porsche"];

/// Seeded RNG, or an entropy-seeded one when `seed` is `None`.
pub fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Sleep for a random duration in `[0, max)`.
pub fn pace(rng: &mut impl Rng, max: Duration) {
    if max.is_zero() {
        return;
    }
    let ms = rng.gen_range(0..max.as_millis().max(1) as u64);
    std::thread::sleep(Duration::from_millis(ms));
}

/// One daily close
#[derive(Debug, Clone, PartialEq)]
pub struct StockRecord {
    pub key: String,
    pub closing: f64,
    pub date: DateTime<Utc>,
}

impl StockRecord {
    pub fn fields(&self) -> Fields {
        fields([
            ("key", Value::from(self.key.as_str())),
            ("closing", Value::Float(self.closing)),
            ("date", Value::from(self.date)),
        ])
    }
}

/// Random walk of daily closing prices for one ticker
pub struct StockWalk {
    key: String,
    price: f64,
    date: DateTime<Utc>,
    rng: StdRng,
}

impl StockWalk {
    pub fn new(key: impl Into<String>, start_price: f64, seed: Option<u64>) -> Self {
        let start = NaiveDate::from_ymd_opt(2016, 1, 4)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
            .unwrap_or_default();
        Self {
            key: key.into(),
            price: start_price,
            date: start,
            rng: rng(seed),
        }
    }
}

impl Iterator for StockWalk {
    type Item = StockRecord;

    fn next(&mut self) -> Option<StockRecord> {
        let record = StockRecord {
            key: self.key.clone(),
            closing: (self.price * 100.0).round() / 100.0,
            date: self.date,
        };
        let change: f64 = self.rng.gen_range(-0.03..0.03);
        self.price = (self.price * (1.0 + change)).max(0.01);
        self.date += TimeDelta::days(1);
        Some(record)
    }
}

/// A social media message with a precomputed sentiment
#[derive(Debug, Clone, PartialEq)]
pub struct Tweet {
    pub id: i64,
    pub message: String,
    pub likes: i64,
    pub user: String,
    pub sentiment: String,
    pub keyword: String,
}

impl Tweet {
    pub fn fields(&self) -> Fields {
        fields([
            ("id", Value::Int(self.id)),
            ("message", Value::from(self.message.as_str())),
            ("likes", Value::Int(self.likes)),
            ("user", Value::from(self.user.as_str())),
            ("sentiment", Value::from(self.sentiment.as_str())),
            ("keyword", Value::from(self.keyword.as_str())),
        ])
    }
}

/// Endless stream of random tweets about a few car brands
pub struct TweetGenerator {
    rng: StdRng,
}

impl TweetGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        Self { rng: rng(seed) }
    }
}

impl Iterator for TweetGenerator {
    type Item = Tweet;

    fn next(&mut self) -> Option<Tweet> {
        let rng = &mut self.rng;
        let pick = |rng: &mut StdRng, items: &[&str]| {
            items.choose(rng).copied().unwrap_or_default().to_string()
        };
        Some(Tweet {
            id: rng.gen_range(0..10_000),
            message: format!("Bla {}", rng.gen::<u32>()),
            likes: rng.gen_range(0..500),
            user: format!("user{}", rng.gen_range(0..1_000)),
            sentiment: pick(rng, SENTIMENTS),
            keyword: pick(rng, KEYWORDS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_is_deterministic_with_seed() {
        let a: Vec<_> = StockWalk::new("apple", 100.0, Some(1)).take(5).collect();
        let b: Vec<_> = StockWalk::new("apple", 100.0, Some(1)).take(5).collect();
        assert_eq!(a, b);
        assert_eq!(a[0].closing, 100.0);
        assert_eq!(a[1].date - a[0].date, TimeDelta::days(1));
    }

    #[test]
    fn test_stock_fields() {
        let record = StockWalk::new("ibm", 150.0, Some(3)).next().unwrap();
        let f = record.fields();
        assert_eq!(f.get("key"), Some(&Value::from("ibm")));
        assert!(matches!(f.get("date"), Some(Value::Timestamp(_))));
    }

    #[test]
    fn test_tweets_use_known_vocabulary() {
        for tweet in TweetGenerator::new(Some(9)).take(50) {
            assert!(SENTIMENTS.contains(&tweet.sentiment.as_str()));
            assert!(KEYWORDS.contains(&tweet.keyword.as_str()));
            assert_eq!(tweet.fields().len(), 6);
        }
    }
}
