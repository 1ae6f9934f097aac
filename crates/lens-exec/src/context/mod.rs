//! Cached diff/file context consumed by tools.
//!
//! Entries expire `ttl` after `generated_at`; an expired entry reads as absent and is evicted.
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{PoisonError, RwLock},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    /// Unified source diff.
    Diff,
    /// Single source file.
    File,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Diff => "diff",
            ContextKind::File => "file",
        }
    }

    /// Code reported when a tool needs this context and none is cached.
    pub fn missing_code(&self) -> &'static str {
        match self {
            ContextKind::Diff => "E_NO_DIFF",
            ContextKind::File => "E_NO_FILE",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "diff" => Ok(ContextKind::Diff),
            "file" => Ok(ContextKind::File),
            other => Err(format!("unknown context kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    pub bytes: usize,
    pub lines: usize,
    pub files: usize,
}

impl ContextStats {
    pub fn measure(kind: ContextKind, content: &str) -> Self {
        let files = match kind {
            ContextKind::File => 1,
            ContextKind::Diff => {
                let git = content.lines().filter(|l| l.starts_with("diff --git ")).count();
                if git > 0 {
                    git
                } else {
                    content.lines().filter(|l| l.starts_with("+++ ")).count()
                }
            }
        };
        Self {
            bytes: content.len(),
            lines: content.lines().count(),
            files,
        }
    }
}

/// One cached context entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContext {
    pub kind: ContextKind,
    pub content: String,
    /// Path or label of the content, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub stats: ContextStats,
    #[serde(skip, default = "SystemTime::now")]
    pub generated_at: SystemTime,
}

impl CachedContext {
    pub fn new(kind: ContextKind, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            kind,
            stats: ContextStats::measure(kind, &content),
            content,
            source: None,
            generated_at: SystemTime::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_generated_at(mut self, at: SystemTime) -> Self {
        self.generated_at = at;
        self
    }

    fn is_expired(&self, now: SystemTime, ttl: Duration) -> bool {
        now.duration_since(self.generated_at)
            .is_ok_and(|age| age > ttl)
    }
}

/// Keyed store of the latest context per kind.
pub trait ContextCache: Send + Sync + 'static {
    fn get(&self, kind: ContextKind) -> Option<CachedContext>;

    fn put(&self, context: CachedContext);

    fn clear(&self, kind: ContextKind);
}

/// In-process [`ContextCache`] with TTL expiry.
pub struct MemoryContextCache {
    ttl: Duration,
    entries: RwLock<HashMap<ContextKind, CachedContext>>,
}

impl MemoryContextCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get_at(&self, kind: ContextKind, now: SystemTime) -> Option<CachedContext> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&kind) {
                None => return None,
                Some(ctx) if !ctx.is_expired(now, self.ttl) => return Some(ctx.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // A put may have landed between the two locks.
        if entries.get(&kind).is_some_and(|c| c.is_expired(now, self.ttl)) {
            entries.remove(&kind);
            tracing::debug!(kind = %kind, "evicted expired context");
            return None;
        }
        entries.get(&kind).cloned()
    }
}

impl ContextCache for MemoryContextCache {
    fn get(&self, kind: ContextKind) -> Option<CachedContext> {
        self.get_at(kind, SystemTime::now())
    }

    fn put(&self, context: CachedContext) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(context.kind, context);
    }

    fn clear(&self, kind: ContextKind) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "diff --git a/src/a.rs b/src/a.rs\n--- a/src/a.rs\n+++ b/src/a.rs\n@@ -1 +1 @@\n-a\n+b\ndiff --git a/b.rs b/b.rs\n";

    #[test]
    fn stats_count_diff_files() {
        let stats = ContextStats::measure(ContextKind::Diff, DIFF);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.lines, 7);
        assert_eq!(stats.bytes, DIFF.len());

        let plain = "--- a\n+++ b\n@@\n";
        assert_eq!(ContextStats::measure(ContextKind::Diff, plain).files, 1);
        assert_eq!(ContextStats::measure(ContextKind::File, "fn main() {}").files, 1);
    }

    #[test]
    fn put_then_get_returns_snapshot() {
        let cache = MemoryContextCache::new(Duration::from_secs(60));
        assert!(cache.get(ContextKind::Diff).is_none());

        cache.put(CachedContext::new(ContextKind::Diff, DIFF));
        let ctx = cache.get(ContextKind::Diff).unwrap();
        assert_eq!(ctx.content, DIFF);
        assert!(cache.get(ContextKind::File).is_none());

        cache.clear(ContextKind::Diff);
        assert!(cache.get(ContextKind::Diff).is_none());
    }

    #[test]
    fn expired_entry_reads_as_absent_and_is_evicted() {
        let cache = MemoryContextCache::new(Duration::from_secs(60));
        let old = SystemTime::now() - Duration::from_secs(120);
        cache.put(CachedContext::new(ContextKind::File, "x").with_generated_at(old));

        assert!(cache.get(ContextKind::File).is_none());
        assert!(cache.entries.read().unwrap().is_empty());
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("DIFF".parse::<ContextKind>(), Ok(ContextKind::Diff));
        assert_eq!("file".parse::<ContextKind>(), Ok(ContextKind::File));
        assert!("patch".parse::<ContextKind>().is_err());
        assert_eq!(ContextKind::Diff.missing_code(), "E_NO_DIFF");
    }
}
