//! Popularity ranks and the weighted selector
//!
//! Codes people actually pick are tried first. Each code value gets a static
//! rank (1 = most common); ranks fall into bands with a fixed multiplier, and
//! a pending code's chance of being handed out is its multiplier divided by
//! the sum of multipliers over the current pending set.

use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use std::collections::HashMap;
use std::path::Path;

use crate::store::PendingCode;

/// Most common 4-digit PINs, most frequent first
pub const COMMON_PINS: &[&str] = &[
    "1234", "1111", "0000", "1342", "1212", "2222", "4444", "1122", "1986", "2020",
    "7777", "5555", "1989", "9999", "6969", "2004", "1010", "4321", "6666", "1984",
    "1987", "1985", "8888", "2000", "1980", "1988", "1982", "2580", "1313", "1990",
    "1991", "1983", "1978", "1979", "1995", "1994", "1977", "1981", "3333", "1992",
    "1975", "2005", "1993", "1976", "1996", "2002", "1973", "2468", "1998", "1974",
    "1997", "5678", "2001", "1999", "1972", "1969", "2003", "1945", "2008", "2525",
    "2010", "2121", "2323", "1022", "1951", "2006", "1230", "1971", "4200", "1970",
    "2007", "1966", "2021", "1968", "2112", "1967", "2009", "1964", "1965", "1221",
    "0123", "1963", "2011", "5150", "2019", "2018", "1000", "2012", "1357", "1020",
    "1414", "1962", "1515", "1001", "1004", "1960", "2424", "2017", "1961", "2016",
];

/// One rank band: ranks `<= max_rank` (and above the previous band) get `multiplier`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub max_rank: u32,
    pub multiplier: u32,
}

/// Rank bands in ascending `max_rank` order, plus the weight for unranked codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightBands {
    bands: Vec<Band>,
    unranked: u32,
}

impl Default for WeightBands {
    fn default() -> Self {
        Self::new(
            vec![
                Band { max_rank: 10, multiplier: 10 },
                Band { max_rank: 1000, multiplier: 15 },
                Band { max_rank: 3000, multiplier: 10 },
                Band { max_rank: 5000, multiplier: 5 },
                Band { max_rank: 10000, multiplier: 3 },
            ],
            1,
        )
    }
}

impl WeightBands {
    pub fn new(mut bands: Vec<Band>, unranked: u32) -> Self {
        bands.sort_by_key(|b| b.max_rank);
        Self { bands, unranked }
    }

    /// Multiplier for a code with the given rank (None = not in the list)
    pub fn multiplier(&self, rank: Option<u32>) -> u32 {
        match rank {
            Some(rank) => self
                .bands
                .iter()
                .find(|b| rank <= b.max_rank)
                .map(|b| b.multiplier)
                .unwrap_or(self.unranked),
            None => self.unranked,
        }
    }
}

/// Static ordering of code values by real-world frequency
#[derive(Debug, Clone, Default)]
pub struct PopularityRanks {
    ranks: HashMap<String, u32>,
}

impl PopularityRanks {
    /// Build from values ordered most-common first. Repeats keep their first rank.
    pub fn from_ordered<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ranks = HashMap::new();
        let mut next = 1u32;
        for value in values {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            ranks.entry(value.to_string()).or_insert(next);
            next += 1;
        }
        Self { ranks }
    }

    pub fn builtin() -> Self {
        Self::from_ordered(COMMON_PINS)
    }

    /// Load a newline-separated list, most common first
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_ordered(content.lines()))
    }

    pub fn rank(&self, value: &str) -> Option<u32> {
        self.ranks.get(value).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

/// Rank table plus band multipliers
#[derive(Debug, Clone)]
pub struct WeightedSelector {
    ranks: PopularityRanks,
    bands: WeightBands,
}

impl WeightedSelector {
    pub fn new(ranks: PopularityRanks, bands: WeightBands) -> Self {
        Self { ranks, bands }
    }

    pub fn weight(&self, value: &str) -> u32 {
        self.bands.multiplier(self.ranks.rank(value))
    }

    /// Pick one index out of `candidates`, weighted by band multiplier.
    /// Returns None only when there is nothing to pick.
    pub fn pick<R: Rng + ?Sized>(&self, candidates: &[PendingCode], rng: &mut R) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let weights: Vec<u32> = candidates.iter().map(|c| self.weight(&c.code)).collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => Some(dist.sample(rng)),
            // All weights zero (bands configured with 0 multipliers): fall back to uniform
            Err(_) => Some(rng.random_range(0..candidates.len())),
        }
    }
}

impl Default for WeightedSelector {
    fn default() -> Self {
        Self::new(PopularityRanks::builtin(), WeightBands::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pending(values: &[&str]) -> Vec<PendingCode> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| PendingCode {
                id: format!("c{}", i),
                code: v.to_string(),
                version: 1,
            })
            .collect()
    }

    #[test]
    fn test_band_boundaries() {
        let bands = WeightBands::default();
        assert_eq!(bands.multiplier(Some(1)), 10);
        assert_eq!(bands.multiplier(Some(10)), 10);
        assert_eq!(bands.multiplier(Some(11)), 15);
        assert_eq!(bands.multiplier(Some(1000)), 15);
        assert_eq!(bands.multiplier(Some(1001)), 10);
        assert_eq!(bands.multiplier(Some(3001)), 5);
        assert_eq!(bands.multiplier(Some(5001)), 3);
        assert_eq!(bands.multiplier(Some(10000)), 3);
        assert_eq!(bands.multiplier(Some(10001)), 1);
        assert_eq!(bands.multiplier(None), 1);
    }

    #[test]
    fn test_builtin_ranks() {
        let ranks = PopularityRanks::builtin();
        assert_eq!(ranks.len(), 100);
        assert_eq!(ranks.rank("1234"), Some(1));
        assert_eq!(ranks.rank("0000"), Some(3));
        assert_eq!(ranks.rank("2016"), Some(100));
        assert_eq!(ranks.rank("8068"), None);
    }

    #[test]
    fn test_repeated_values_keep_first_rank() {
        let ranks = PopularityRanks::from_ordered(["1234", "", "9999", "1234", "0000"]);
        assert_eq!(ranks.rank("1234"), Some(1));
        assert_eq!(ranks.rank("9999"), Some(2));
        assert_eq!(ranks.rank("0000"), Some(4));
    }

    #[test]
    fn test_rank_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"4321\n 1111 \n\n2580\n").unwrap();
        let ranks = PopularityRanks::from_file(file.path()).unwrap();
        assert_eq!(ranks.rank("4321"), Some(1));
        assert_eq!(ranks.rank("1111"), Some(2));
        assert_eq!(ranks.rank("2580"), Some(3));
        assert_eq!(ranks.len(), 3);
    }

    #[test]
    fn test_pick_empty() {
        let selector = WeightedSelector::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(selector.pick(&[], &mut rng), None);
    }

    #[test]
    fn test_pick_frequencies_follow_multipliers() {
        // A is rank 1 (10x); B and C are unranked (1x each)
        let selector = WeightedSelector::default();
        let candidates = pending(&["1234", "8068", "7093"]);
        let mut rng = StdRng::seed_from_u64(42);

        let mut counts = [0u32; 3];
        for _ in 0..10_000 {
            let idx = selector.pick(&candidates, &mut rng).unwrap();
            counts[idx] += 1;
        }

        // Expected ~8333 / ~833 / ~833
        assert!((8033..=8633).contains(&counts[0]), "A picked {}", counts[0]);
        assert!((633..=1033).contains(&counts[1]), "B picked {}", counts[1]);
        assert!((633..=1033).contains(&counts[2]), "C picked {}", counts[2]);
    }

    #[test]
    fn test_pick_ratio_between_bands() {
        // rank 11 (15x) vs rank 3001-band code from a custom list (5x)
        let mut list: Vec<String> = (0..3001).map(|i| format!("v{}", i)).collect();
        list[10] = "hot".to_string();
        list[3000] = "warm".to_string();
        let selector = WeightedSelector::new(PopularityRanks::from_ordered(&list), WeightBands::default());
        assert_eq!(selector.weight("hot"), 15);
        assert_eq!(selector.weight("warm"), 5);

        let candidates = pending(&["hot", "warm"]);
        let mut rng = StdRng::seed_from_u64(7);
        let hot = (0..20_000)
            .filter(|_| selector.pick(&candidates, &mut rng) == Some(0))
            .count() as f64;
        let ratio = hot / (20_000.0 - hot);
        assert!((2.7..3.3).contains(&ratio), "ratio was {}", ratio);
    }

    #[test]
    fn test_zero_weights_fall_back_to_uniform() {
        let selector = WeightedSelector::new(PopularityRanks::default(), WeightBands::new(vec![], 0));
        let candidates = pending(&["a", "b"]);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(selector.pick(&candidates, &mut rng).is_some());
    }
}
