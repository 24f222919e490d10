use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use unikey_cache::{
    CacheContext, CacheError, EntityDescriptor, IndirectionCache, MemoryStore, Query, QueryLog,
    attributes,
};

#[tokio::test]
async fn cache_assisted_reads_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    unikey_cache::telemetry::describe_metrics();

    let cache = IndirectionCache::new(
        Arc::new(MemoryStore::new()),
        Arc::new(CacheContext::new("App")),
        Arc::new(QueryLog::new(true)),
    );
    let descriptor = EntityDescriptor::new("User", "id");
    let lookup = attributes! { "id" => 7 };
    let query = Query::new("select * from users where id = ?").bind(7);

    // miss, then hit
    for _ in 0..2 {
        cache
            .fetch(&descriptor, &lookup, &query, || async {
                Ok::<_, CacheError>(Some(attributes! { "id" => 7 }))
            })
            .await
            .expect("fetch");
    }

    // A disabled log records neither entries nor metrics.
    let quiet = IndirectionCache::new(
        Arc::new(MemoryStore::new()),
        Arc::new(CacheContext::new("Quiet")),
        Arc::new(QueryLog::new(false)),
    );
    quiet
        .fetch(&EntityDescriptor::new("Quiet", "id"), &lookup, &query, || async {
            Ok::<_, CacheError>(None)
        })
        .await
        .expect("fetch");

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        "unikey_cache_hit_total",
        "unikey_cache_miss_total",
        "unikey_cache_lookup_ms",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let classes: HashSet<String> = snapshot
        .iter()
        .flat_map(|(composite_key, _, _, _)| composite_key.key().labels())
        .filter(|label| label.key() == "class")
        .map(|label| label.value().to_string())
        .collect();
    assert!(classes.contains("User"));
    assert!(!classes.contains("Quiet"));
}
