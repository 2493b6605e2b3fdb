//! Node and point naming.
//!
//! Names are compared in *reduced* form: lowercased, whitespace removed,
//! anything after `--` or `//` dropped and parenthesised segments stripped.
//! `"Lamp 1 (hall)"`, `"lamp1"` and `"LAMP1 -- spare"` are the same name.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reduce a name to the form used for equality and hashing.
pub fn reduce(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;

    for (i, &c) in chars.iter().enumerate() {
        let next = chars.get(i + 1).copied();
        if depth == 0 && ((c == '-' && next == Some('-')) || (c == '/' && next == Some('/'))) {
            break;
        }
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth > 0 || c.is_whitespace() => {}
            _ => out.extend(c.to_lowercase()),
        }
    }

    out
}

/// A name that remembers how it was written but compares by its reduced form.
#[derive(Clone)]
pub struct SimpleName {
    original: String,
    reduced: String,
}

impl SimpleName {
    pub fn new(name: impl Into<String>) -> Self {
        let original = name.into();
        let reduced = reduce(&original);
        Self { original, reduced }
    }

    /// The name as it was written. This is what goes on the wire.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn reduced(&self) -> &str {
        &self.reduced
    }

    pub fn is_empty(&self) -> bool {
        self.reduced.is_empty()
    }
}

impl PartialEq for SimpleName {
    fn eq(&self, other: &Self) -> bool {
        self.reduced == other.reduced
    }
}

impl Eq for SimpleName {}

impl Hash for SimpleName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reduced.hash(state);
    }
}

impl PartialOrd for SimpleName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimpleName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.reduced.cmp(&other.reduced)
    }
}

impl fmt::Debug for SimpleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.original)
    }
}

impl fmt::Display for SimpleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl From<&str> for SimpleName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SimpleName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&SimpleName> for SimpleName {
    fn from(value: &SimpleName) -> Self {
        value.clone()
    }
}

impl Serialize for SimpleName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for SimpleName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// A (node, action-or-event) pair.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodelPoint {
    pub node: SimpleName,
    pub point: SimpleName,
}

impl NodelPoint {
    pub fn new(node: impl Into<SimpleName>, point: impl Into<SimpleName>) -> Self {
        Self {
            node: node.into(),
            point: point.into(),
        }
    }
}

impl fmt::Debug for NodelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.point)
    }
}

impl fmt::Display for NodelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.point)
    }
}

/// Parse `NODE.POINT`, splitting at the first `.`.
impl FromStr for NodelPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((node, point)) if !node.trim().is_empty() && !point.trim().is_empty() => {
                Ok(Self::new(node.trim(), point.trim()))
            }
            _ => Err(format!("expected NODE.POINT, got '{s}'")),
        }
    }
}

/// Glob match with `*` wildcards, compared on reduced forms.
///
/// Every literal segment of the pattern must appear in the value, in order
/// and without overlapping. Segments are not anchored to either end.
pub fn filter_match(value: &str, filter: &str) -> bool {
    let value = reduce(value);
    let filter = reduce(filter);
    if filter.is_empty() {
        return false;
    }

    let mut rest = value.as_str();
    for segment in filter.split('*').filter(|segment| !segment.is_empty()) {
        match rest.find(segment) {
            Some(at) => rest = &rest[at + segment.len()..],
            None => return false,
        }
    }
    true
}

/// Ordered, de-duplicated set of glob filters.
///
/// An empty set matches nothing.
#[derive(Debug, Clone, Default)]
pub struct NameFilters {
    patterns: Vec<String>,
}

impl NameFilters {
    /// Add a filter. Returns `false` if an equivalent filter was already present.
    pub fn add(&mut self, pattern: &str) -> bool {
        let reduced = reduce(pattern);
        if self.patterns.contains(&reduced) {
            return false;
        }
        self.patterns.push(reduced);
        true
    }

    pub fn matches(&self, value: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| filter_match(value, pattern))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn reduce_folds_case_and_whitespace() {
        assert_eq!(reduce("Lamp 1"), "lamp1");
        assert_eq!(reduce("  TURN\tOn "), "turnon");
    }

    #[test]
    fn reduce_drops_comments_and_parentheses() {
        assert_eq!(reduce("Lamp1 -- spare unit"), "lamp1");
        assert_eq!(reduce("Lamp1 // hallway"), "lamp1");
        assert_eq!(reduce("Lamp (hall) 1"), "lamp1");
        assert_eq!(reduce("Proj (a (b)) X"), "projx");
        assert_eq!(reduce("a-b/c"), "a-b/c");
    }

    #[test]
    fn simple_names_compare_reduced() {
        let a = SimpleName::new("Lamp 1 (hall)");
        let b = SimpleName::new("lamp1");
        assert_eq!(a, b);
        assert_eq!(a.original(), "Lamp 1 (hall)");

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn point_parses_at_first_dot() {
        let point: NodelPoint = "Lamp1.TurnOn".parse().unwrap();
        assert_eq!(point, NodelPoint::new("lamp1", "turnon"));
        assert_eq!(point.to_string(), "Lamp1.TurnOn");
        assert!("Lamp1".parse::<NodelPoint>().is_err());
        assert!(".TurnOn".parse::<NodelPoint>().is_err());
    }

    #[test]
    fn filter_without_wildcard_matches_anywhere() {
        assert!(filter_match("Turn On", "turnon"));
        assert!(filter_match("TurnOnNow", "TurnOn"));
        assert!(!filter_match("TurnOff", "TurnOn"));
        assert!(!filter_match("TurnOn", " "));
    }

    #[test]
    fn filter_wildcards() {
        assert!(filter_match("anything", "*"));
        assert!(filter_match("projectoron", "Project*on"));
        assert!(!filter_match("projectoroff", "Project*on"));
        assert!(filter_match("MyProjectorOn", "Project*on"));
        assert!(filter_match("ProjectorPowerOn", "Proj*Power*On"));
        assert!(filter_match("MyProjector", "Projector*"));
        assert!(!filter_match("ProjectorOff", "*On"));
        assert!(!filter_match("PowerProjector", "Projector*Power"));
    }

    #[test]
    fn filter_segments_do_not_overlap() {
        assert!(!filter_match("abc", "ab*bc"));
        assert!(filter_match("abbc", "ab*bc"));
    }

    #[test]
    fn empty_filter_set_matches_nothing() {
        let mut filters = NameFilters::default();
        assert!(!filters.matches("Status"));
        assert!(filters.add("Stat*"));
        assert!(!filters.add("STAT*"));
        assert_eq!(filters.len(), 1);
        assert!(filters.matches("Status"));
    }
}
