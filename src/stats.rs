//! Index and pipeline overview.
//!
//! Counts documents and terms in the index store, reads the feed
//! watermark, and groups the pipeline state table by state. Used by
//! `ontotag stats` to check that scheduling and indexing keep up.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::SearchConfig;
use crate::db;
use crate::error::Result;
use crate::index_client::IndexClient;
use crate::pipeline::state_counts;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub documents: u64,
    pub terms: u64,
    pub watermark: Option<DateTime<Utc>>,
    pub states: Vec<(String, i64)>,
}

pub async fn collect(index: &IndexClient, config: &SearchConfig, pool: &SqlitePool) -> Result<Stats> {
    Ok(Stats {
        documents: index.count(&config.documents_index).await?,
        terms: index.count(&config.terms_index).await?,
        watermark: db::get_watermark(pool).await?,
        states: state_counts(pool).await?,
    })
}

/// Print a human-readable summary to stdout.
pub fn print_stats(stats: &Stats) {
    println!("ontotag stats");
    println!("=============");
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Terms:       {}", stats.terms);
    println!(
        "  Watermark:   {}",
        stats
            .watermark
            .map(format_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.states.is_empty() {
        println!();
        println!("  Pipeline:");
        println!("  {:<20} {:>8}", "STATE", "DOCS");
        println!("  {}", "-".repeat(29));
        for (state, n) in &stats.states {
            println!("  {:<20} {:>8}", state, n);
        }
    }
    println!();
}

/// `2024-05-01 10:00 (3 hours ago)`.
fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();
    let absolute = ts.format("%Y-%m-%d %H:%M").to_string();
    let ago = if delta < 0 {
        return absolute;
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        plural(delta / 60, "min")
    } else if delta < 86400 {
        plural(delta / 3600, "hour")
    } else {
        plural(delta / 86400, "day")
    };
    format!("{} ({})", absolute, ago)
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}
