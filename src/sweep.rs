//! The parameter-sweep combinator: turns a set of named value lists into the assignments that
//! should each be realized as one generated document.
//!
//! There are three ways to combine lists:
//!
//! - [`SweepMode::Aligned`] zips all lists by index. Shorter lists simply run out, and the
//!   parameter is left unset for the remaining assignments.
//! - [`SweepMode::Product`] takes the Cartesian product of every non-empty list. Duplicate value
//!   tuples (e.g. from a list that mentions the same value twice) are produced only once.
//! - [`SweepMode::PairedProduct`] first zips the given pairs of lists together, then takes the
//!   product of those pairs with every other non-empty list.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

use itertools::Itertools;

use log::warn;

use crate::param::Param;

/// Ordered value tokens per parameter. Keys are iterated in their `Ord` order.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueLists<K: Ord = Param> {
    lists: BTreeMap<K, Vec<String>>,
}

impl<K: Ord + Copy> ValueLists<K> {
    pub fn new() -> Self {
        ValueLists {
            lists: BTreeMap::new(),
        }
    }

    /// Set the values of `key`, replacing any previous ones.
    pub fn insert(&mut self, key: K, values: Vec<String>) -> &mut Self {
        self.lists.insert(key, values);
        self
    }

    pub fn get(&self, key: K) -> &[String] {
        self.lists.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The longest list, but at least 1.
    pub fn max_len(&self) -> usize {
        self.lists.values().map(Vec::len).max().unwrap_or(0).max(1)
    }

    /// Parameters with at least one value.
    pub fn active(&self) -> impl Iterator<Item = (K, &Vec<String>)> + '_ {
        self.lists
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(k, values)| (*k, values))
    }
}

impl<K: Ord + Copy> Default for ValueLists<K> {
    fn default() -> Self {
        ValueLists::new()
    }
}

/// One point of a sweep: at most one value per parameter. Parameters without a value keep
/// whatever the base document has.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Assignment<K: Ord = Param> {
    values: BTreeMap<K, String>,
}

impl<K: Ord + Copy> Assignment<K> {
    pub fn new() -> Self {
        Assignment {
            values: BTreeMap::new(),
        }
    }

    pub fn set<V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.values.insert(key, value.into());
        self
    }

    /// Builder-style `set`.
    pub fn with<V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: K) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &str)> + '_ {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl<K: Ord + Copy> Default for Assignment<K> {
    fn default() -> Self {
        Assignment::new()
    }
}

impl<K: Ord + Copy + fmt::Display> fmt::Display for Assignment<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return f.write_str("(no parameters)");
        }
        let pairs = self.iter().map(|(k, v)| format!("{}={}", k, v));
        f.write_str(&pairs.collect::<Vec<_>>().join(", "))
    }
}

/// How to combine the value lists of a sweep.
#[derive(Clone, Debug, PartialEq)]
pub enum SweepMode<K = Param> {
    /// Zip all lists by index.
    Aligned,
    /// Cartesian product of all non-empty lists, without duplicate tuples.
    Product,
    /// Zip each pair, then take the product of the pairs and the remaining lists.
    PairedProduct(Vec<(K, K)>),
}

/// Expand `lists` into the assignments to generate, in a deterministic order.
pub fn expand<K>(lists: &ValueLists<K>, mode: &SweepMode<K>) -> Vec<Assignment<K>>
where
    K: Ord + Copy + std::hash::Hash + std::fmt::Display,
{
    match mode {
        SweepMode::Aligned => aligned(lists),
        SweepMode::Product => product(lists),
        SweepMode::PairedProduct(pairs) if pairs.is_empty() => product(lists),
        SweepMode::PairedProduct(pairs) => paired_product(lists, pairs),
    }
}

/// The index-aligned expansion. Always yields at least one (possibly empty) assignment.
pub fn aligned<K: Ord + Copy>(lists: &ValueLists<K>) -> Vec<Assignment<K>> {
    (0..lists.max_len())
        .map(|i| {
            let mut assignment = Assignment::new();
            for (key, values) in lists.active() {
                if let Some(value) = values.get(i) {
                    assignment.set(key, value.as_str());
                }
            }
            assignment
        })
        .collect()
}

fn product<K: Ord + Copy + std::hash::Hash>(lists: &ValueLists<K>) -> Vec<Assignment<K>> {
    let (keys, values): (Vec<K>, Vec<&Vec<String>>) = lists.active().unzip();

    // `multi_cartesian_product` of nothing is nothing; we want the single empty tuple.
    if keys.is_empty() {
        return vec![Assignment::new()];
    }

    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.iter())
        .multi_cartesian_product()
        .filter(|tuple| seen.insert(tuple.clone()))
        .map(|tuple| {
            let mut assignment = Assignment::new();
            for (key, value) in keys.iter().zip(tuple) {
                assignment.set(*key, value.as_str());
            }
            assignment
        })
        .collect()
}

fn paired_product<K>(lists: &ValueLists<K>, pairs: &[(K, K)]) -> Vec<Assignment<K>>
where
    K: Ord + Copy + std::fmt::Display,
{
    // Each unit is a column of the product: a list of rows, each row setting one or two keys.
    let mut units: Vec<Vec<Vec<(K, &str)>>> = vec![];
    let mut claimed = BTreeSet::new();
    let mut excluded = BTreeSet::new();

    for &(a, b) in pairs {
        let (va, vb) = (lists.get(a), lists.get(b));

        if a == b || claimed.contains(&a) || claimed.contains(&b) {
            warn!(
                "Skipping pair ({}, {}): a parameter may only be paired once",
                a, b
            );
            excluded.insert(a);
            excluded.insert(b);
            continue;
        }
        if va.is_empty() || vb.is_empty() {
            warn!(
                "Skipping pair ({}, {}): both parameters need values",
                a, b
            );
            excluded.insert(a);
            excluded.insert(b);
            continue;
        }
        if va.len() != vb.len() {
            warn!(
                "Skipping pair ({}, {}): lengths differ ({} vs {})",
                a,
                b,
                va.len(),
                vb.len()
            );
            excluded.insert(a);
            excluded.insert(b);
            continue;
        }

        claimed.insert(a);
        claimed.insert(b);
        units.push(
            va.iter()
                .zip(vb.iter())
                .map(|(x, y)| vec![(a, x.as_str()), (b, y.as_str())])
                .collect(),
        );
    }

    // A key from a rejected pair may have been claimed by a valid one first; the valid pair
    // keeps it.
    for (key, values) in lists.active() {
        if claimed.contains(&key) || excluded.contains(&key) {
            continue;
        }
        units.push(values.iter().map(|v| vec![(key, v.as_str())]).collect());
    }

    if units.is_empty() {
        return vec![Assignment::new()];
    }

    units
        .iter()
        .map(|unit| unit.iter())
        .multi_cartesian_product()
        .map(|rows| {
            let mut assignment = Assignment::new();
            for &(key, value) in rows.into_iter().flatten() {
                assignment.set(key, value);
            }
            assignment
        })
        .collect()
}

/// What a sweep did. A variant that fails does not stop its siblings; it is recorded here
/// instead.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepReport {
    /// Every file written, in sweep order.
    pub written: Vec<PathBuf>,
    /// The variants that were skipped, and why.
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// A one-line summary for the log.
    pub fn summary(&self) -> String {
        format!(
            "{} file(s) written, {} variant(s) failed",
            self.written.len(),
            self.failed.len()
        )
    }
}
