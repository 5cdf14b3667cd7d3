//! Hierarchical plan-item identifiers.
//!
//! A [`HierarchicalId`] is a non-empty sequence of positive integers rendered
//! dotted (`"2.2.1"`). It names a node in a plan tree: `"2"` is a root item,
//! `"2.1"` its first child, `"2.1.3"` that child's third child, and so on.
//! Depth is capped at [`MAX_DEPTH`].
//!
//! All operations here are pure and infallible once a valid [`HierarchicalId`]
//! exists; fallibility lives entirely in [`HierarchicalId::parse`] and the two
//! generator functions, which can refuse to produce an id deeper than
//! [`MAX_DEPTH`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum nesting depth of a hierarchical id (root counts as depth 1).
pub const MAX_DEPTH: usize = 10;

/// Errors produced while parsing or generating a [`HierarchicalId`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The id string had no parts at all.
    #[error("hierarchical id is empty")]
    Empty,
    /// A segment was not a valid positive integer.
    #[error("invalid id segment: {0:?}")]
    NonPositiveOrNonNumeric(String),
    /// The id (or a generated child) would exceed [`MAX_DEPTH`].
    #[error("hierarchical id exceeds max depth {MAX_DEPTH}")]
    TooDeep,
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A non-empty, depth-bounded, dotted sequence of positive integers.
///
/// Renders via [`fmt::Display`] as the canonical dotted string (`"2.1.3"`)
/// and serializes to/from that same string via `serde`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HierarchicalId {
    parts: Vec<u32>,
}

impl HierarchicalId {
    /// Parse a dotted id string.
    ///
    /// Fails if the string is empty, any segment is non-numeric or
    /// non-positive, or the resulting depth exceeds [`MAX_DEPTH`].
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::Empty);
        }
        let mut parts = Vec::new();
        for seg in s.split('.') {
            let n: u32 = seg
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| Error::NonPositiveOrNonNumeric(seg.to_string()))?;
            parts.push(n);
        }
        if parts.len() > MAX_DEPTH {
            return Err(Error::TooDeep);
        }
        Ok(Self { parts })
    }

    /// Build a root id directly from an integer (`HierarchicalId::root(3)` == `"3"`).
    #[must_use]
    pub fn root(n: u32) -> Self {
        Self { parts: vec![n.max(1)] }
    }

    /// Number of segments (depth), at least 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.parts.len()
    }

    /// The deepest (rightmost) segment value, a.k.a. the item's "level" among
    /// its siblings.
    #[must_use]
    pub fn level(&self) -> u32 {
        *self.parts.last().expect("non-empty by construction")
    }

    /// The parent id, or `None` if this is a root id.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.parts.len() <= 1 {
            None
        } else {
            Some(Self {
                parts: self.parts[..self.parts.len() - 1].to_vec(),
            })
        }
    }

    /// The root segment of this id, as a standalone root [`HierarchicalId`].
    #[must_use]
    pub fn root_of(&self) -> Self {
        Self {
            parts: vec![self.parts[0]],
        }
    }

    /// `true` if `self` is a (possibly indirect) ancestor of `other`, i.e.
    /// `other`'s dotted string starts with `self`'s dotted string + `"."`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.parts.len() > self.parts.len() && other.parts[..self.parts.len()] == self.parts[..]
    }

    /// `true` if `self` is a (possibly indirect) descendant of `other`.
    #[must_use]
    pub fn is_descendant_of(&self, other: &Self) -> bool {
        other.is_ancestor_of(self)
    }

    /// `true` iff `other` is exactly `self`'s direct child (one segment deeper,
    /// sharing the same prefix).
    #[must_use]
    pub fn is_direct_child(&self, other: &Self) -> bool {
        other.parts.len() == self.parts.len() + 1 && other.parts[..self.parts.len()] == self.parts[..]
    }

    /// Filter `population` down to the direct children of `self`.
    #[must_use]
    pub fn children_of<'a>(&self, population: &'a [Self]) -> Vec<&'a Self> {
        population
            .iter()
            .filter(|id| self.is_direct_child(id))
            .collect()
    }

    /// Filter `population` down to all (direct and indirect) descendants of `self`.
    #[must_use]
    pub fn descendants_of<'a>(&self, population: &'a [Self]) -> Vec<&'a Self> {
        population
            .iter()
            .filter(|id| self.is_ancestor_of(id))
            .collect()
    }

    /// Natural-order comparison: lexicographic over integer parts, with a
    /// missing trailing part treated as `0` (so `"2"` sorts before `"2.1"`).
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    /// Generate the next root id given the current population: `max(roots) + 1`,
    /// or `1` if the population has no roots.
    #[must_use]
    pub fn generate_next_root(population: &[Self]) -> Self {
        let max = population.iter().map(|id| id.parts[0]).max().unwrap_or(0);
        Self::root(max + 1)
    }

    /// Generate the next direct child of `parent` given the current
    /// population: `parent.(max(direct child levels) + 1)`.
    ///
    /// Fails with [`Error::TooDeep`] if the generated id would exceed
    /// [`MAX_DEPTH`].
    pub fn generate_next_child(parent: &Self, population: &[Self]) -> Result<Self> {
        if parent.parts.len() >= MAX_DEPTH {
            return Err(Error::TooDeep);
        }
        let max_existing = parent
            .children_of(population)
            .into_iter()
            .map(Self::level)
            .max()
            .unwrap_or(0);
        let mut parts = parent.parts.clone();
        parts.push(max_existing + 1);
        Ok(Self { parts })
    }
}

impl fmt::Display for HierarchicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.parts.iter().map(u32::to_string).collect();
        write!(f, "{}", rendered.join("."))
    }
}

impl FromStr for HierarchicalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialOrd for HierarchicalId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for HierarchicalId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl Serialize for HierarchicalId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HierarchicalId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(strs: &[&str]) -> Vec<HierarchicalId> {
        strs.iter().map(|s| HierarchicalId::parse(s).unwrap()).collect()
    }

    #[test]
    fn parse_rejects_empty_and_non_positive() {
        assert_eq!(HierarchicalId::parse(""), Err(Error::Empty));
        assert!(HierarchicalId::parse("0.1").is_err());
        assert!(HierarchicalId::parse("1.0").is_err());
        assert!(HierarchicalId::parse("1.a").is_err());
        assert!(HierarchicalId::parse("-1").is_err());
    }

    #[test]
    fn parse_rejects_excess_depth() {
        let deep = (1..=11).map(|n| n.to_string()).collect::<Vec<_>>().join(".");
        assert_eq!(HierarchicalId::parse(&deep), Err(Error::TooDeep));
        let ok = (1..=10).map(|n| n.to_string()).collect::<Vec<_>>().join(".");
        assert!(HierarchicalId::parse(&ok).is_ok());
    }

    #[test]
    fn parent_and_root_of() {
        let id = HierarchicalId::parse("2.1.3").unwrap();
        assert_eq!(id.parent().unwrap().to_string(), "2.1");
        assert_eq!(id.root_of().to_string(), "2");
        assert_eq!(id.depth(), 3);
        assert_eq!(id.level(), 3);
        assert!(HierarchicalId::parse("2").unwrap().parent().is_none());
    }

    #[test]
    fn ancestry_and_direct_child() {
        let a = HierarchicalId::parse("2").unwrap();
        let b = HierarchicalId::parse("2.1").unwrap();
        let c = HierarchicalId::parse("2.1.3").unwrap();
        assert!(a.is_ancestor_of(&b));
        assert!(a.is_ancestor_of(&c));
        assert!(!b.is_ancestor_of(&a));
        assert!(a.is_direct_child(&b));
        assert!(!a.is_direct_child(&c));
        assert!(c.is_descendant_of(&a));

        // a child id must never be a prefix of (i.e. ancestor of) its own ancestor.
        assert!(!c.is_ancestor_of(&a));
    }

    #[test]
    fn children_and_descendants_of_population() {
        let pop = ids(&["1", "2", "2.1", "2.2", "2.1.1", "3"]);
        let two = HierarchicalId::parse("2").unwrap();
        let children: Vec<String> = two.children_of(&pop).into_iter().map(|i| i.to_string()).collect();
        assert_eq!(children, vec!["2.1".to_string(), "2.2".to_string()]);

        let descendants: Vec<String> =
            two.descendants_of(&pop).into_iter().map(|i| i.to_string()).collect();
        assert_eq!(descendants, vec!["2.1".to_string(), "2.2".to_string(), "2.1.1".to_string()]);
    }

    #[test]
    fn natural_order_compare() {
        let a = HierarchicalId::parse("2").unwrap();
        let b = HierarchicalId::parse("2.1").unwrap();
        let c = HierarchicalId::parse("10").unwrap();
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(b.compare(&a), Ordering::Greater);
        assert_eq!(a.compare(&a), Ordering::Equal);
        // numeric, not lexicographic: "10" > "2"
        assert_eq!(a.compare(&c), Ordering::Less);

        let mut v = ids(&["10", "2", "2.1", "1"]);
        v.sort();
        let rendered: Vec<String> = v.iter().map(|i| i.to_string()).collect();
        assert_eq!(rendered, vec!["1", "2", "2.1", "10"]);
    }

    #[test]
    fn generate_next_root() {
        let pop = ids(&["1", "2", "2.1"]);
        assert_eq!(HierarchicalId::generate_next_root(&pop).to_string(), "3");
        assert_eq!(HierarchicalId::generate_next_root(&[]).to_string(), "1");
    }

    #[test]
    fn generate_next_child_skips_over_grandchildren() {
        let parent = HierarchicalId::parse("2").unwrap();
        let pop = ids(&["2", "2.1", "2.2", "2.2.1"]);
        let next = HierarchicalId::generate_next_child(&parent, &pop).unwrap();
        assert_eq!(next.to_string(), "2.3");
    }

    #[test]
    fn generate_next_child_refuses_past_max_depth() {
        let parent = HierarchicalId::parse("1.1.1.1.1.1.1.1.1.1").unwrap();
        assert_eq!(parent.depth(), MAX_DEPTH);
        assert_eq!(
            HierarchicalId::generate_next_child(&parent, &[]),
            Err(Error::TooDeep)
        );
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let id = HierarchicalId::parse("4.2.7").unwrap();
        assert_eq!(HierarchicalId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn serde_roundtrip() {
        let id = HierarchicalId::parse("3.4").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"3.4\"");
        let back: HierarchicalId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
