//! Athlete identity resolution.
//!
//! Every accepted record contributes one `(id, name key)` pair. Pairs are
//! unioned in a disjoint-set forest together with the manual override table,
//! and each resulting set is assigned one canonical id. Because the canonical
//! id is the minimum of the set under a total order, the result does not
//! depend on the order in which unions were applied.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use tracing::debug;

use crate::error::{RowError, RowErrorKind};
use crate::overrides::ManualOverrides;

/// A numeric id rendered through a float column: `147939.0`
static FLOAT_ARTIFACT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.0+$").unwrap());

/// Orthographic variants of the same name particle, and the spelling they normalize to.
const PARTICLES: &[(&str, &str)] = &[
    ("al", "al"),
    ("el", "al"),
    ("bin", "bin"),
    ("ben", "bin"),
    ("ibn", "bin"),
    ("abu", "abu"),
    ("abou", "abu"),
];

/// Prefix for canonical keys of identities that carry no id.
pub const NAME_KEY_PREFIX: &str = "name:";

pub fn normalize_athlete_id(raw: &str) -> String {
    let trimmed = raw.trim();
    match FLOAT_ARTIFACT.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

/// Lower-cased name tokens with punctuation removed and particles glued to
/// the token that follows them (`Al-Jadani`, `al jadani` -> `aljadani`).
pub fn name_tokens(name: &str) -> Vec<String> {
    let cleaned: String = name
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let raw: Vec<&str> = cleaned.split_whitespace().collect();
    let mut tokens = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let particle = PARTICLES
            .iter()
            .find(|(spelling, _)| *spelling == raw[i])
            .map(|(_, canonical)| *canonical);
        match particle {
            Some(canonical) if i + 1 < raw.len() => {
                tokens.push(format!("{}{}", canonical, raw[i + 1]));
                i += 2;
            }
            _ => {
                tokens.push(raw[i].to_string());
                i += 1;
            }
        }
    }
    tokens
}

/// `first|last`, or `None` when the name has no letters or digits at all.
pub fn name_key(name: &str) -> Option<String> {
    let tokens = name_tokens(name);
    let first = tokens.first()?;
    let last = tokens.last()?;
    Some(format!("{}|{}", first, last))
}

/// Numeric ids by value, then everything else lexicographically.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    let is_numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match (is_numeric(a), is_numeric(b)) {
        (true, true) => {
            let a_digits = a.trim_start_matches('0');
            let b_digits = b.trim_start_matches('0');
            a_digits
                .len()
                .cmp(&b_digits.len())
                .then_with(|| a_digits.cmp(b_digits))
                .then_with(|| a.cmp(b))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    Id(String),
    Name(String),
}

struct DisjointSet {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new() -> Self {
        Self {
            parent: Vec::new(),
            rank: Vec::new(),
        }
    }

    fn push(&mut self) -> u32 {
        let idx = self.parent.len() as u32;
        self.parent.push(idx);
        self.rank.push(0);
        idx
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra as usize].cmp(&self.rank[rb as usize]) {
            Ordering::Less => self.parent[ra as usize] = rb,
            Ordering::Greater => self.parent[rb as usize] = ra,
            Ordering::Equal => {
                self.parent[rb as usize] = ra;
                self.rank[ra as usize] += 1;
            }
        }
    }
}

/// Accumulates identity pairs during the indexing pass.
pub struct IdentityBuilder {
    nodes: Vec<Node>,
    lookup: FxHashMap<Node, u32>,
    sets: DisjointSet,
    overrides: ManualOverrides,
}

impl IdentityBuilder {
    pub fn new(overrides: ManualOverrides) -> Self {
        let mut builder = Self {
            nodes: Vec::new(),
            lookup: FxHashMap::default(),
            sets: DisjointSet::new(),
            overrides: ManualOverrides::default(),
        };
        for (from, to) in overrides.iter() {
            let a = builder.intern(Node::Id(from.to_string()));
            let b = builder.intern(Node::Id(to.to_string()));
            builder.sets.union(a, b);
        }
        builder.overrides = overrides;
        builder
    }

    fn intern(&mut self, node: Node) -> u32 {
        if let Some(&idx) = self.lookup.get(&node) {
            return idx;
        }
        let idx = self.sets.push();
        self.nodes.push(node.clone());
        self.lookup.insert(node, idx);
        idx
    }

    /// `id` must already be normalized. Empty ids and absent keys add nothing.
    pub fn add(&mut self, id: &str, key: Option<&str>) {
        let id_node = (!id.is_empty()).then(|| self.intern(Node::Id(id.to_string())));
        let name_node = key.map(|k| self.intern(Node::Name(k.to_string())));
        if let (Some(a), Some(b)) = (id_node, name_node) {
            self.sets.union(a, b);
        }
    }

    pub fn finish(mut self) -> IdentityIndex {
        let count = self.nodes.len() as u32;
        let roots: Vec<u32> = (0..count).map(|i| self.sets.find(i)).collect();

        // Best id per set: preferred skips override sources, fallback does not.
        let mut preferred: FxHashMap<u32, &str> = FxHashMap::default();
        let mut fallback: FxHashMap<u32, &str> = FxHashMap::default();
        for (node, &root) in self.nodes.iter().zip(&roots) {
            if let Node::Id(id) = node {
                keep_min(&mut fallback, root, id);
                if !self.overrides.is_source(id) {
                    keep_min(&mut preferred, root, id);
                }
            }
        }

        let mut ids = FxHashMap::default();
        let mut names = FxHashMap::default();
        for (node, root) in self.nodes.iter().zip(&roots) {
            let canonical = preferred.get(root).or_else(|| fallback.get(root));
            match node {
                Node::Id(id) => {
                    let canonical = canonical.map_or_else(|| id.clone(), |c| c.to_string());
                    ids.insert(id.clone(), canonical);
                }
                Node::Name(key) => {
                    let canonical = canonical
                        .map_or_else(|| format!("{}{}", NAME_KEY_PREFIX, key), |c| c.to_string());
                    names.insert(key.clone(), canonical);
                }
            }
        }

        debug!(ids = ids.len(), names = names.len(), "Identity sets resolved");
        IdentityIndex::from_maps(ids, names)
    }
}

fn keep_min<'a>(best: &mut FxHashMap<u32, &'a str>, root: u32, id: &'a str) {
    best.entry(root)
        .and_modify(|current| {
            if compare_ids(id, current) == Ordering::Less {
                *current = id;
            }
        })
        .or_insert(id);
}

/// Read-only identity map used while stamping records.
pub struct IdentityIndex {
    ids: FxHashMap<String, String>,
    names: FxHashMap<String, String>,
}

impl IdentityIndex {
    pub fn from_maps(ids: FxHashMap<String, String>, names: FxHashMap<String, String>) -> Self {
        Self { ids, names }
    }

    pub fn maps(&self) -> (&FxHashMap<String, String>, &FxHashMap<String, String>) {
        (&self.ids, &self.names)
    }

    /// (distinct ids, distinct name keys)
    pub fn stats(&self) -> (usize, usize) {
        (self.ids.len(), self.names.len())
    }

    pub fn resolve(&self, athlete_id_raw: &str, athlete_name: &str) -> Result<String, RowError> {
        let id = normalize_athlete_id(athlete_id_raw);
        if !id.is_empty() {
            return Ok(self.ids.get(&id).cloned().unwrap_or(id));
        }
        match name_key(athlete_name) {
            Some(key) => Ok(self
                .names
                .get(&key)
                .cloned()
                .unwrap_or_else(|| format!("{}{}", NAME_KEY_PREFIX, key))),
            None => Err(RowError::new(
                RowErrorKind::UnresolvableIdentity,
                "athlete_id_raw",
                athlete_id_raw,
                "record has neither an athlete id nor a name",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(pairs: &[(&str, &str)], overrides: ManualOverrides) -> IdentityIndex {
        let mut builder = IdentityBuilder::new(overrides);
        for (id, name) in pairs {
            builder.add(&normalize_athlete_id(id), name_key(name).as_deref());
        }
        builder.finish()
    }

    #[test]
    fn float_artifact_is_stripped() {
        assert_eq!(normalize_athlete_id("147939.0"), "147939");
        assert_eq!(normalize_athlete_id(" 147939.00 "), "147939");
        assert_eq!(normalize_athlete_id("147939"), "147939");
        assert_eq!(normalize_athlete_id("147939.5"), "147939.5");
        assert_eq!(normalize_athlete_id("A-17"), "A-17");
        assert_eq!(normalize_athlete_id(""), "");
    }

    #[test]
    fn particle_spellings_share_a_key() {
        let expected = Some("abdulaziz|aljadani".to_string());
        assert_eq!(name_key("Abdulaziz Al-Jadani"), expected);
        assert_eq!(name_key("Abdulaziz Al Jadani"), expected);
        assert_eq!(name_key("abdulaziz AlJadani"), expected);
        assert_eq!(name_key("ABDULAZIZ el-jadani"), expected);
        assert_eq!(name_key("Abdulaziz Rabie Al Jadani"), expected);
    }

    #[test]
    fn variant_particles_normalize() {
        assert_eq!(name_key("Mohammed Ibn Saud"), name_key("Mohammed bin Saud"));
        assert_eq!(name_key("Ali Abou Taleb"), name_key("Ali Abu-Taleb"));
    }

    #[test]
    fn single_token_and_empty_names() {
        assert_eq!(name_key("Kipchoge"), Some("kipchoge|kipchoge".to_string()));
        assert_eq!(name_key("  -- "), None);
        assert_eq!(name_key(""), None);
        // A trailing particle has nothing to attach to
        assert_eq!(name_key("Omar Al"), Some("omar|al".to_string()));
    }

    #[test]
    fn id_ordering_is_numeric_first() {
        assert_eq!(compare_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_ids("147939", "652065"), Ordering::Less);
        assert_eq!(compare_ids("999999", "A1"), Ordering::Less);
        assert_eq!(compare_ids("B", "A"), Ordering::Greater);
        assert_eq!(compare_ids("007", "7"), Ordering::Less);
    }

    #[test]
    fn float_and_integer_ids_resolve_together() {
        let idx = index(
            &[("147939", "Abdulaziz Al-Jadani"), ("147939.0", "Abdulaziz Al-Jadani")],
            ManualOverrides::default(),
        );
        assert_eq!(idx.resolve("147939", "Abdulaziz Al-Jadani").unwrap(), "147939");
        assert_eq!(idx.resolve("147939.0", "Abdulaziz Al-Jadani").unwrap(), "147939");
    }

    #[test]
    fn override_pulls_variant_into_target() {
        let overrides = ManualOverrides::builder().map("652065", "147939").build().unwrap();
        let idx = index(
            &[("652065", "Al-Jadani"), ("147939", "Al Jadani")],
            overrides,
        );
        assert_eq!(idx.resolve("652065", "Al-Jadani").unwrap(), "147939");
        assert_eq!(idx.resolve("147939", "Al Jadani").unwrap(), "147939");
    }

    #[test]
    fn override_target_wins_even_when_larger() {
        let overrides = ManualOverrides::builder().map("100", "900").build().unwrap();
        let idx = index(&[("100", "A B"), ("900", "C D")], overrides);
        assert_eq!(idx.resolve("100", "A B").unwrap(), "900");
        assert_eq!(idx.resolve("900", "C D").unwrap(), "900");
    }

    #[test]
    fn shared_name_unions_ids_and_picks_smallest() {
        let idx = index(
            &[("300", "Jane Doe"), ("20", "jane doe"), ("1000", "Someone Else")],
            ManualOverrides::default(),
        );
        assert_eq!(idx.resolve("300", "Jane Doe").unwrap(), "20");
        assert_eq!(idx.resolve("20", "jane doe").unwrap(), "20");
        assert_eq!(idx.resolve("1000", "Someone Else").unwrap(), "1000");
        // A name-only row joins the id-bearing identity with the same key
        assert_eq!(idx.resolve("", "JANE DOE").unwrap(), "20");
    }

    #[test]
    fn transitive_unions_through_names() {
        // 5 and 7 share a name, 7 and 3 share another name
        let idx = index(
            &[("5", "A X"), ("7", "A X"), ("7", "B Y"), ("3", "B Y")],
            ManualOverrides::default(),
        );
        assert_eq!(idx.resolve("5", "A X").unwrap(), "3");
    }

    #[test]
    fn name_only_identity_gets_synthetic_key() {
        let idx = index(&[("", "Solo Runner")], ManualOverrides::default());
        assert_eq!(idx.resolve("", "Solo Runner").unwrap(), "name:solo|runner");
    }

    #[test]
    fn no_id_and_no_name_is_unresolvable() {
        let idx = index(&[], ManualOverrides::default());
        let err = idx.resolve("  ", "").unwrap_err();
        assert_eq!(err.kind, RowErrorKind::UnresolvableIdentity);
    }

    #[test]
    fn unseen_ids_resolve_to_themselves() {
        let idx = index(&[], ManualOverrides::default());
        assert_eq!(idx.resolve("42.0", "Anyone").unwrap(), "42");
    }

    #[test]
    fn resolution_does_not_depend_on_insertion_order() {
        let pairs = [
            ("300", "Jane Doe"),
            ("20", "Jane Doe"),
            ("20", "J Doe"),
            ("55", "J Doe"),
            ("652065", "X"),
        ];
        let overrides = || ManualOverrides::builder().map("652065", "55").build().unwrap();
        let forward = index(&pairs, overrides());
        let mut reversed = pairs;
        reversed.reverse();
        let backward = index(&reversed, overrides());

        for (id, name) in pairs {
            assert_eq!(
                forward.resolve(id, name).unwrap(),
                backward.resolve(id, name).unwrap()
            );
        }
        assert_eq!(forward.resolve("652065", "X").unwrap(), "20");
    }

    #[test]
    fn override_cycle_falls_back_to_smallest() {
        let overrides = ManualOverrides::builder()
            .map("8", "4")
            .map("4", "8")
            .build()
            .unwrap();
        let idx = index(&[("8", "P Q")], overrides);
        assert_eq!(idx.resolve("8", "P Q").unwrap(), "4");
    }
}
