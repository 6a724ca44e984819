//! Prometheus counters registered in the default registry
//!
//! Gathered by `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

lazy_static! {
    /// Catalog rebuild attempts by outcome (ok, failed, skipped)
    pub static ref CATALOG_REBUILDS: IntCounterVec = register_int_counter_vec!(
        "catalog_rebuilds_total",
        "Channel catalog rebuild attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref CATALOG_CHANNELS: IntGauge = register_int_gauge!(
        "catalog_channels",
        "Channels in the installed catalog snapshot"
    )
    .unwrap();

    /// EPG refresh attempts by outcome (ok, degraded, skipped)
    pub static ref EPG_REFRESHES: IntCounterVec = register_int_counter_vec!(
        "epg_refreshes_total",
        "EPG refresh attempts by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref EPG_PROGRAMMES_INGESTED: IntCounter = register_int_counter!(
        "epg_programmes_ingested_total",
        "Programme entries accepted into the guide"
    )
    .unwrap();

    pub static ref EPG_PARSE_ERRORS: IntCounter = register_int_counter!(
        "epg_parse_errors_total",
        "XML errors reported while streaming EPG documents"
    )
    .unwrap();

    pub static ref STREAM_CACHE_HITS: IntCounter = register_int_counter!(
        "resolved_stream_cache_hits_total",
        "Resolved stream cache hits"
    )
    .unwrap();

    pub static ref STREAM_CACHE_MISSES: IntCounter = register_int_counter!(
        "resolved_stream_cache_misses_total",
        "Resolved stream cache misses"
    )
    .unwrap();
}
