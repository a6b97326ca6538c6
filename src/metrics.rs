use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

pub struct Metrics {
    // Case records
    pub case_reads_total: AtomicU64,
    pub case_writes_total: AtomicU64,
    pub search_queries_total: AtomicU64,
    pub duplicate_conflicts_total: AtomicU64,

    // Caches
    pub cache_hits_total: AtomicU64,
    pub cache_misses_total: AtomicU64,

    // Documents
    pub documents_uploaded_total: AtomicU64,
    pub document_failures_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            case_reads_total: AtomicU64::new(0),
            case_writes_total: AtomicU64::new(0),
            search_queries_total: AtomicU64::new(0),
            duplicate_conflicts_total: AtomicU64::new(0),
            cache_hits_total: AtomicU64::new(0),
            cache_misses_total: AtomicU64::new(0),
            documents_uploaded_total: AtomicU64::new(0),
            document_failures_total: AtomicU64::new(0),
        }
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::default)
}

pub(crate) fn record_case_read() {
    metrics().case_reads_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_case_write() {
    metrics().case_writes_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_search_query() {
    metrics().search_queries_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_duplicate_conflict() {
    metrics()
        .duplicate_conflicts_total
        .fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_cache_hit() {
    metrics().cache_hits_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_cache_miss() {
    metrics().cache_misses_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_document_upload() {
    metrics()
        .documents_uploaded_total
        .fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_document_failure() {
    metrics()
        .document_failures_total
        .fetch_add(1, Ordering::Relaxed);
}

pub fn render_prometheus() -> String {
    let m = metrics();
    let mut s = String::new();
    let _ = writeln!(
        s,
        "# TYPE case_reads_total counter\ncase_reads_total {}",
        m.case_reads_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE case_writes_total counter\ncase_writes_total {}",
        m.case_writes_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE search_queries_total counter\nsearch_queries_total {}",
        m.search_queries_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE duplicate_conflicts_total counter\nduplicate_conflicts_total {}",
        m.duplicate_conflicts_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE cache_hits_total counter\ncache_hits_total {}",
        m.cache_hits_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE cache_misses_total counter\ncache_misses_total {}",
        m.cache_misses_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE documents_uploaded_total counter\ndocuments_uploaded_total {}",
        m.documents_uploaded_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE document_failures_total counter\ndocument_failures_total {}",
        m.document_failures_total.load(Ordering::Relaxed)
    );
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_output_lists_every_counter() {
        record_case_read();
        let rendered = render_prometheus();
        assert!(rendered.contains("case_reads_total"));
        assert!(rendered.contains("documents_uploaded_total"));
    }
}
