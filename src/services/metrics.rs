use std::collections::BTreeMap;

/// Ratio with a zero denominator reads as exactly zero.
pub fn safe_divide(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    let value = numerator / denominator;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round4(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

/// Payload rate: safe division rounded to 4 decimal places.
pub fn rate(numerator: u32, denominator: u32) -> f64 {
    round4(safe_divide(f64::from(numerator), f64::from(denominator)))
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_customer_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

/// Get-or-initialise group-by buckets keyed by one dimension. Backed by a
/// `BTreeMap` so iteration (and therefore every payload) is deterministic.
#[derive(Debug, Clone)]
pub struct Accumulator<K: Ord, V> {
    buckets: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for Accumulator<K, V> {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V: Default> Accumulator<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, key: K) -> &mut V {
        self.buckets.entry(key).or_default()
    }

    /// Seeds an empty bucket so the key is reported even with no hits.
    pub fn touch(&mut self, key: K) {
        self.entry(key);
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.buckets.get(key)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets.iter()
    }

    pub fn finalize<T>(self, mut view: impl FnMut(K, V) -> T) -> Vec<T> {
        self.buckets
            .into_iter()
            .map(|(key, value)| view(key, value))
            .collect()
    }
}

/// Planned vs actually-visited counter shared by the visit stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitTally {
    pub planned_visits: u32,
    pub actual_visits: u32,
}

impl VisitTally {
    pub fn record(&mut self, visited: bool) {
        self.planned_visits += 1;
        if visited {
            self.actual_visits += 1;
        }
    }

    pub fn variance(&self) -> i64 {
        i64::from(self.planned_visits) - i64::from(self.actual_visits)
    }

    pub fn achievement_rate(&self) -> f64 {
        rate(self.actual_visits, self.planned_visits)
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_customer_name, rate, round4, safe_divide, Accumulator, VisitTally};

    #[test]
    fn safe_divide_never_yields_nan_or_infinity() {
        assert_eq!(safe_divide(5.0, 0.0), 0.0);
        assert_eq!(safe_divide(0.0, 0.0), 0.0);
        assert_eq!(safe_divide(-3.0, 0.0), 0.0);
        assert_eq!(safe_divide(5.0, 2.0), 2.5);
    }

    #[test]
    fn rates_round_to_four_places() {
        assert_eq!(rate(4, 6), 0.6667);
        assert_eq!(rate(1, 3), 0.3333);
        assert_eq!(rate(3, 0), 0.0);
        assert_eq!(round4(0.123_456), 0.1235);
    }

    #[test]
    fn collapses_customer_name_variants() {
        for raw in [" Acme  Corp ", "acme corp", "ACME CORP", "Acme Corp", "acme\tcorp"] {
            assert_eq!(normalize_customer_name(raw), "acme corp");
        }
        assert_eq!(normalize_customer_name("   "), "");
    }

    #[test]
    fn accumulator_iterates_in_key_order() {
        let mut buckets: Accumulator<String, VisitTally> = Accumulator::new();
        buckets.entry("b".to_string()).record(true);
        buckets.entry("a".to_string()).record(false);
        buckets.entry("b".to_string()).record(false);
        buckets.touch("c".to_string());

        let view = buckets.finalize(|key, tally| (key, tally.planned_visits, tally.variance()));
        assert_eq!(
            view,
            vec![
                ("a".to_string(), 1, 1),
                ("b".to_string(), 2, 1),
                ("c".to_string(), 0, 0)
            ]
        );
    }
}
