//! Compiled stylesheet cache.
//!
//! Stylesheets are keyed by the SHA-1 fingerprint of their exact text. A hit
//! returns the shared [`CompiledTemplate`] without touching the engine; a miss
//! compiles, inserts and returns. Failed compilations are never cached so a
//! corrected stylesheet (or a retry) compiles again.
//!
//! The map is an `scc::HashMap`, so lookups and first-time compilations can run
//! concurrently. Two requests missing on the same fingerprint at the same time
//! may both compile; the first insert wins and both callers receive an
//! equivalent template. With `max_entries` set the cache evicts the least
//! recently used entry before inserting a new one.
//!
//! Runs go through [`StylesheetCache::transform`], which also counts the
//! programs worker threads had to build for templates compiled elsewhere.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use scc::HashMap;
use sha1::{Digest, Sha1};

use crate::core::{
    engine::{CompiledTemplate, XsltEngine},
    error::{CompileError, TransformError},
};

/// SHA-1 digest of a stylesheet's exact byte sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    pub fn of(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha1::digest(bytes);
        let mut raw = [0u8; 20];
        raw.copy_from_slice(&digest);
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Immutable stylesheet text paired with its fingerprint.
#[derive(Debug, Clone)]
pub struct StylesheetSource {
    text: Arc<str>,
    fingerprint: Fingerprint,
}

impl StylesheetSource {
    pub fn new(text: &str) -> Self {
        Self {
            fingerprint: Fingerprint::of(text),
            text: Arc::from(text),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub compilations: u64,
    /// Programs built by worker threads for an already compiled template
    pub program_builds: u64,
    pub evictions: u64,
}

struct CacheEntry {
    template: Arc<CompiledTemplate>,
    last_used: AtomicU64,
}

/// Fingerprint keyed cache of compiled stylesheets.
///
/// Created when a policy is loaded and dropped with it; nothing here is global.
pub struct StylesheetCache {
    engine: XsltEngine,
    entries: HashMap<Fingerprint, CacheEntry>,
    max_entries: Option<usize>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    program_builds: AtomicU64,
    evictions: AtomicU64,
}

impl StylesheetCache {
    /// Unbounded cache compiling through `engine`.
    pub fn new(engine: XsltEngine) -> Self {
        Self::with_capacity(engine, None)
    }

    /// Cache holding at most `max_entries` templates (`None` = unbounded).
    pub fn with_capacity(engine: XsltEngine, max_entries: Option<usize>) -> Self {
        Self {
            engine,
            entries: HashMap::new(),
            max_entries,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            compilations: AtomicU64::new(0),
            program_builds: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &XsltEngine {
        &self.engine
    }

    /// Return the compiled template for `text`, compiling it on a miss.
    pub fn get_or_compile(&self, text: &str) -> Result<Arc<CompiledTemplate>, CompileError> {
        let source = StylesheetSource::new(text);
        let fingerprint = source.fingerprint();
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);

        if let Some(template) = self.entries.read(&fingerprint, |_, entry| {
            entry.last_used.store(tick, Ordering::Relaxed);
            entry.template.clone()
        }) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(fingerprint = %fingerprint, "Stylesheet cache hit");
            return Ok(template);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let template = match self.engine.compile(source) {
            Ok(template) => Arc::new(template),
            Err(e) => {
                tracing::warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "An error occurred while compiling the stylesheet"
                );
                return Err(e);
            }
        };
        self.compilations.fetch_add(1, Ordering::Relaxed);

        self.make_room();
        let entry = CacheEntry {
            template: template.clone(),
            last_used: AtomicU64::new(tick),
        };
        if self.entries.insert(fingerprint, entry).is_err() {
            // Another caller compiled the same text first; keep its entry.
            return Ok(self
                .entries
                .read(&fingerprint, |_, entry| entry.template.clone())
                .unwrap_or(template));
        }

        tracing::debug!(
            fingerprint = %fingerprint,
            entries = self.entries.len(),
            "Compiled and cached stylesheet"
        );
        Ok(template)
    }

    /// Run a template obtained from this cache against `input`.
    pub fn transform(
        &self,
        template: &CompiledTemplate,
        bindings: &[(String, String)],
        input: &str,
    ) -> Result<String, TransformError> {
        let transformation = self.engine.transform(template, bindings, input)?;
        if transformation.program_built {
            self.program_builds.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                fingerprint = %template.fingerprint(),
                "Built stylesheet program on worker thread"
            );
        }
        Ok(transformation.output)
    }

    /// Whether a compiled template for `text` is currently cached.
    pub fn contains(&self, text: &str) -> bool {
        self.entries.contains(&Fingerprint::of(text))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached template.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            program_builds: self.program_builds.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evict least recently used entries until one more fits.
    fn make_room(&self) {
        let Some(max_entries) = self.max_entries else {
            return;
        };

        while self.entries.len() >= max_entries {
            let mut oldest: Option<(Fingerprint, u64)> = None;
            self.entries.scan(|fingerprint, entry| {
                let used = entry.last_used.load(Ordering::Relaxed);
                if oldest.is_none_or(|(_, seen)| used < seen) {
                    oldest = Some((*fingerprint, used));
                }
            });

            let Some((fingerprint, _)) = oldest else {
                break;
            };
            if self.entries.remove(&fingerprint).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint = %fingerprint, "Evicted stylesheet from cache");
            }
        }
    }
}

impl fmt::Debug for StylesheetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StylesheetCache")
            .field("max_entries", &self.max_entries)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/"><out><xsl:value-of select="/root/name"/></out></xsl:template>
</xsl:stylesheet>"#;

    fn stylesheet(marker: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:template match="/"><{marker}/></xsl:template>
</xsl:stylesheet>"#
        )
    }

    #[test]
    fn test_fingerprint_is_stable_and_hex_encoded() {
        let a = Fingerprint::of("abc");
        assert_eq!(a, Fingerprint::of("abc"));
        assert_ne!(a, Fingerprint::of("abd"));
        assert_eq!(a.to_string(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_second_lookup_does_not_recompile() {
        let cache = StylesheetCache::new(XsltEngine::default());
        let first = cache.get_or_compile(IDENTITY).unwrap();
        let second = cache.get_or_compile(IDENTITY).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!(stats.compilations, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_distinct_texts_get_distinct_entries() {
        let cache = StylesheetCache::new(XsltEngine::default());
        let a = cache.get_or_compile(&stylesheet("a")).unwrap();
        let b = cache.get_or_compile(&stylesheet("b")).unwrap();

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().compilations, 2);
    }

    #[test]
    fn test_failed_compilation_is_not_cached() {
        let cache = StylesheetCache::new(XsltEngine::default());
        let broken = "<xsl:stylesheet version=\"1.0\" xmlns:xsl=\"http://www.w3.org/1999/XSL/Transform\"><xsl:template></xsl:stylesheet>";

        assert!(cache.get_or_compile(broken).is_err());
        assert!(cache.get_or_compile(broken).is_err());
        assert!(!cache.contains(broken));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 2);
        assert_eq!(cache.stats().compilations, 0);
    }

    #[test]
    fn test_bounded_cache_evicts_least_recently_used() {
        let cache = StylesheetCache::with_capacity(XsltEngine::default(), Some(2));
        let (a, b, c) = (stylesheet("a"), stylesheet("b"), stylesheet("c"));

        cache.get_or_compile(&a).unwrap();
        cache.get_or_compile(&b).unwrap();
        // Touch `a` so `b` becomes the eviction candidate
        cache.get_or_compile(&a).unwrap();
        cache.get_or_compile(&c).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_concurrent_lookups_share_one_entry() {
        let cache = Arc::new(StylesheetCache::new(XsltEngine::default()));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = cache.clone();
                scope.spawn(move || {
                    for _ in 0..10 {
                        cache.get_or_compile(IDENTITY).unwrap();
                    }
                });
            }
        });

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert!(stats.compilations >= 1 && stats.compilations <= 8);
        assert_eq!(stats.hits + stats.misses, 80);
    }

    #[test]
    fn test_worker_thread_builds_program_once() {
        let greeting = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:param name="region" select="'none'"/>
  <xsl:template match="/"><r><xsl:value-of select="$region"/></r></xsl:template>
</xsl:stylesheet>"#;
        let cache = StylesheetCache::new(XsltEngine::default());
        let template = cache.get_or_compile(greeting).unwrap();

        // The compiling thread already holds the program
        let bindings = vec![("region".to_string(), "eu".to_string())];
        assert!(cache.transform(&template, &bindings, "<root/>").unwrap().contains("<r>eu</r>"));
        assert_eq!(cache.stats().program_builds, 0);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for region in ["eu", "us", "apac"] {
                    let bindings = vec![("region".to_string(), region.to_string())];
                    let output = cache.transform(&template, &bindings, "<root/>").unwrap();
                    assert!(output.contains(&format!("<r>{region}</r>")));
                }
            });
        });

        let stats = cache.stats();
        assert_eq!(stats.program_builds, 1);
        assert_eq!(stats.compilations, 1);
    }

    #[test]
    fn test_clear_empties_cache() {
        let cache = StylesheetCache::new(XsltEngine::default());
        cache.get_or_compile(IDENTITY).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        cache.get_or_compile(IDENTITY).unwrap();
        assert_eq!(cache.stats().compilations, 2);
    }
}
