//! Page hierarchy snapshot.
//!
//! A [`HierarchySnapshot`] is an immutable view of every page and database
//! visible to the credential, with derived `path`s and a child index. A new
//! snapshot is built for every rebuild and swapped in whole by
//! [`PageCache`](crate::cache::PageCache); nothing mutates a snapshot after
//! construction.
//!
//! # Construction
//!
//! [`HierarchySnapshot::from_records`] runs three passes:
//!
//! 1. **Orphan promotion**: a record whose parent is not in the snapshot
//!    (a page or block the integration cannot read) becomes a root.
//! 2. **Path derivation**: each record's parent chain is walked to a root
//!    and the titles collected. Completed paths are memoized, so shared
//!    ancestors are walked once. A walk that revisits a record is a cycle;
//!    the revisited record becomes a root with path `[title]`.
//! 3. **Indexes**: child lists and the root list, sorted by title.
//!
//! # Persistence
//!
//! Snapshots are stored as JSON:
//!
//! ```json
//! { "version": 1, "built_at": "2024-03-01T10:00:00Z", "records": [ ... ] }
//! ```
//!
//! Paths are not trusted on load; they are re-derived by `from_records`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::models::PageRecord;
use crate::scoring::tokenize;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct HierarchySnapshot {
    records: BTreeMap<String, PageRecord>,
    children: HashMap<String, Vec<String>>,
    roots: Vec<String>,
    built_at: DateTime<Utc>,
}

/// Summary statistics, as returned by `hierarchy_info` and `refresh_cache`.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyStats {
    pub total_pages: usize,
    pub top_level_pages: usize,
    pub databases: usize,
    pub max_depth: usize,
    pub archived_pages: usize,
    pub pages_by_depth: BTreeMap<usize, usize>,
    pub sample_paths: Vec<SamplePath>,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplePath {
    pub depth: usize,
    pub title: String,
    pub path: String,
    pub id: String,
}

#[derive(Serialize, Deserialize)]
struct PersistedSnapshot {
    version: u32,
    built_at: DateTime<Utc>,
    records: Vec<PageRecord>,
}

impl HierarchySnapshot {
    /// Build a snapshot from raw records. Duplicate ids keep the last record.
    pub fn from_records(records: Vec<PageRecord>, built_at: DateTime<Utc>) -> Self {
        let mut records: BTreeMap<String, PageRecord> =
            records.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut parents: HashMap<String, Option<String>> = HashMap::new();
        let mut orphans = 0usize;
        for record in records.values() {
            let parent = match &record.parent_id {
                Some(p) if records.contains_key(p) => Some(p.clone()),
                Some(_) => {
                    orphans += 1;
                    None
                }
                None => None,
            };
            parents.insert(record.id.clone(), parent);
        }
        if orphans > 0 {
            tracing::debug!(orphans, "promoted records with unreadable parents to roots");
        }

        let paths = derive_paths(&records, &mut parents);

        for (id, record) in records.iter_mut() {
            record.parent_id = parents.get(id).cloned().flatten();
            record.path = paths
                .get(id)
                .cloned()
                .unwrap_or_else(|| vec![record.title.clone()]);
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut roots = Vec::new();
        for record in records.values() {
            match &record.parent_id {
                Some(p) => children.entry(p.clone()).or_default().push(record.id.clone()),
                None => roots.push(record.id.clone()),
            }
        }
        let by_title = |ids: &mut Vec<String>| {
            ids.sort_by(|a, b| {
                let ta = records[a].title.to_lowercase();
                let tb = records[b].title.to_lowercase();
                ta.cmp(&tb).then(a.cmp(b))
            })
        };
        by_title(&mut roots);
        for ids in children.values_mut() {
            by_title(ids);
        }

        Self {
            records,
            children,
            roots,
            built_at,
        }
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True once `ttl` has elapsed since the snapshot was built.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.built_at);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age >= ttl,
            Err(_) => false,
        }
    }

    /// All records in id order.
    pub fn records(&self) -> impl Iterator<Item = &PageRecord> {
        self.records.values()
    }

    pub fn get(&self, id: &str) -> Option<&PageRecord> {
        self.records.get(id)
    }

    /// Direct children of `id`, sorted by title.
    pub fn children(&self, id: &str) -> Vec<&PageRecord> {
        self.children
            .get(id)
            .map(|ids| ids.iter().filter_map(|c| self.records.get(c)).collect())
            .unwrap_or_default()
    }

    /// Non-archived roots, sorted by title.
    pub fn top_level(&self) -> Vec<&PageRecord> {
        self.roots
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|r| !r.archived)
            .collect()
    }

    /// Tiered title lookup.
    ///
    /// Exact case-insensitive matches come first, then substring matches,
    /// then (with `fuzzy`) records sharing at least one token with the
    /// query. Within a tier, records keep id order.
    pub fn find_by_title(&self, query: &str, fuzzy: bool) -> Vec<PageRecord> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let mut exact = Vec::new();
        let mut substring = Vec::new();
        let mut overlap = Vec::new();
        let query_tokens = tokenize(&needle);

        for record in self.records.values() {
            let title = record.title.trim().to_lowercase();
            if title == needle {
                exact.push(record.clone());
            } else if title.contains(&needle) {
                substring.push(record.clone());
            } else if fuzzy {
                let title_tokens = tokenize(&title);
                if query_tokens.iter().any(|t| title_tokens.contains(t)) {
                    overlap.push(record.clone());
                }
            }
        }

        exact.extend(substring);
        exact.extend(overlap);
        exact
    }

    /// Walk from the roots matching one trimmed, case-insensitive segment per
    /// depth. The first full match wins.
    pub fn find_by_path(&self, segments: &[String]) -> Option<PageRecord> {
        let wanted: Vec<String> = segments
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if wanted.is_empty() {
            return None;
        }
        self.match_path(&self.roots, &wanted).cloned()
    }

    fn match_path<'a>(&'a self, level: &[String], wanted: &[String]) -> Option<&'a PageRecord> {
        let (head, rest) = wanted.split_first()?;
        for id in level {
            let Some(record) = self.records.get(id) else {
                continue;
            };
            if record.title.trim().to_lowercase() != *head {
                continue;
            }
            if rest.is_empty() {
                return Some(record);
            }
            let kids = self.children.get(id).map(Vec::as_slice).unwrap_or_default();
            if let Some(found) = self.match_path(kids, rest) {
                return Some(found);
            }
        }
        None
    }

    /// Every record whose path starts with segments containing `prefix`
    /// (case-insensitive substring per depth).
    pub fn find_under_path(&self, prefix: &[String]) -> Vec<PageRecord> {
        let wanted: Vec<String> = prefix.iter().map(|s| s.trim().to_lowercase()).collect();
        self.records
            .values()
            .filter(|r| {
                r.path.len() >= wanted.len()
                    && wanted
                        .iter()
                        .zip(&r.path)
                        .all(|(w, seg)| seg.to_lowercase().contains(w.as_str()))
            })
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> HierarchyStats {
        let mut pages_by_depth: BTreeMap<usize, usize> = BTreeMap::new();
        for record in self.records.values() {
            *pages_by_depth.entry(record.depth()).or_default() += 1;
        }
        let max_depth = pages_by_depth.keys().next_back().copied().unwrap_or(0);

        let sample_paths = (0..=max_depth.min(3))
            .filter_map(|depth| {
                self.records
                    .values()
                    .find(|r| r.depth() == depth && !r.archived)
                    .map(|r| SamplePath {
                        depth,
                        title: r.title.clone(),
                        path: r.display_path(),
                        id: r.id.clone(),
                    })
            })
            .collect();

        HierarchyStats {
            total_pages: self.records.len(),
            top_level_pages: self.roots.len(),
            databases: self.records.values().filter(|r| r.is_database).count(),
            max_depth,
            archived_pages: self.records.values().filter(|r| r.archived).count(),
            pages_by_depth,
            sample_paths,
            built_at: self.built_at,
        }
    }

    /// Indented outline of the hierarchy, two spaces per level.
    ///
    /// `max_depth` of `Some(0)` lists roots only. Archived records (and
    /// their subtrees) are skipped unless `include_archived`.
    pub fn render_tree(&self, max_depth: Option<usize>, include_archived: bool) -> String {
        let mut out = String::new();
        for id in &self.roots {
            self.render_node(id, 0, max_depth, include_archived, &mut out);
        }
        out
    }

    fn render_node(
        &self,
        id: &str,
        depth: usize,
        max_depth: Option<usize>,
        include_archived: bool,
        out: &mut String,
    ) {
        let Some(record) = self.records.get(id) else {
            return;
        };
        if record.archived && !include_archived {
            return;
        }

        out.push_str(&"  ".repeat(depth));
        out.push_str("- ");
        out.push_str(&record.title);
        if record.is_database {
            out.push_str(" [database]");
        }
        if record.archived {
            out.push_str(" [archived]");
        }
        out.push_str(&format!(" ({})\n", record.id));

        if max_depth.is_some_and(|max| depth >= max) {
            return;
        }
        for kid in self.children(id) {
            self.render_node(&kid.id, depth + 1, max_depth, include_archived, out);
        }
    }

    // ============ Persistence ============

    /// Write the snapshot to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

        let persisted = PersistedSnapshot {
            version: FORMAT_VERSION,
            built_at: self.built_at,
            records: self.records.values().cloned().collect(),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, &persisted)?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace cache file: {}", path.display()))?;
        Ok(())
    }

    /// Read a snapshot written by [`save`](Self::save). Paths are re-derived.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
        let persisted: PersistedSnapshot =
            serde_json::from_str(&content).with_context(|| "Failed to parse cache file")?;
        if persisted.version != FORMAT_VERSION {
            bail!(
                "Unsupported cache file version {} (expected {})",
                persisted.version,
                FORMAT_VERSION
            );
        }
        Ok(Self::from_records(persisted.records, persisted.built_at))
    }
}

/// Compute root-first title paths for every record.
///
/// `parents` must only reference ids present in `records`. When a walk
/// revisits a record, that record's parent link is cut (it becomes a root)
/// and the walk restarts.
///
/// Only the revisited record falls back to `[title]`. The other members of
/// the cycle keep a path derived through it, so every path is still its
/// parent's path plus its own title. For `a -> b -> a` walked from `a`,
/// `a` is revisited and gets `["A"]`, while `b` gets `["A", "B"]`.
fn derive_paths(
    records: &BTreeMap<String, PageRecord>,
    parents: &mut HashMap<String, Option<String>>,
) -> HashMap<String, Vec<String>> {
    let mut memo: HashMap<String, Vec<String>> = HashMap::new();

    for id in records.keys() {
        if memo.contains_key(id) {
            continue;
        }

        loop {
            let mut chain: Vec<&str> = vec![id.as_str()];
            let mut cursor = parents.get(id).cloned().flatten();
            let mut base: Option<Vec<String>> = None;
            let mut cycle_at: Option<String> = None;

            while let Some(parent) = cursor {
                if let Some(done) = memo.get(&parent) {
                    base = Some(done.clone());
                    break;
                }
                if chain.contains(&parent.as_str()) {
                    cycle_at = Some(parent);
                    break;
                }
                let Some((key, _)) = records.get_key_value(&parent) else {
                    break;
                };
                chain.push(key.as_str());
                cursor = parents.get(key).cloned().flatten();
            }

            if let Some(looped) = cycle_at {
                tracing::warn!(page_id = %looped, "parent cycle detected, treating page as a root");
                parents.insert(looped, None);
                continue;
            }

            let mut path = base.unwrap_or_default();
            for node in chain.iter().rev() {
                path.push(records[*node].title.clone());
                memo.insert(node.to_string(), path.clone());
            }
            break;
        }
    }

    memo
}
