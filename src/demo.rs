//! Built-in tutorial app
//!
//! A small script exercising every core piece: a click counter kept in
//! session state, an expensive computation memoized with `CopyOnRead`, and a
//! lookup table loaded once per process and shared with `ShareOnRead`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::fingerprint::{Args, FunctionIdentity};
use crate::function_identity;
use crate::rerun::{register_script, ScriptHandle, Widget};

/// Widget key of the increment button
pub const INCREMENT_KEY: &str = "increment";
/// Widget key of the sample-size slider
pub const ROWS_KEY: &str = "rows";

/// Deterministic pseudo-random column, standing in for a slow data load
fn generate_rows(rows: u64, seed: u64) -> Vec<u64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..rows)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) % 100
        })
        .collect()
}

fn load_rows_identity() -> FunctionIdentity {
    function_identity!("load_rows", |rows: u64, seed: u64| generate_rows(rows, seed))
}

fn labels_identity() -> FunctionIdentity {
    FunctionIdentity::versioned("bucket_labels", "1")
}

/// Register the tutorial app
///
/// `compute_delay` simulates how slow the memoized load is.
pub fn tutorial_app(compute_delay: Duration) -> ScriptHandle {
    register_script("tutorial", move |ctx| {
        ctx.write("# Counter");
        let count: u64 = ctx.state().get_or_insert_with("count", || 0)?;
        let clicked = ctx.widget(Widget::button(INCREMENT_KEY, "Increment"))?;
        let count = if clicked.as_bool() == Some(true) {
            ctx.state().set("count", &(count + 1))?;
            count + 1
        } else {
            count
        };
        ctx.write(format!("Count = {}", count));

        ctx.write("# Cached data");
        let rows = ctx
            .widget(Widget::slider(ROWS_KEY, "Rows", 20))?
            .as_u64()
            .unwrap_or(20);
        let args = Args::new().arg(&rows)?.kwarg("seed", &42u64)?;
        let data: Vec<u64> = ctx.cache_data(&load_rows_identity(), &args, || {
            std::thread::sleep(compute_delay);
            Ok(generate_rows(rows, 42))
        })?;

        let labels = ctx.cache_resource(&labels_identity(), &Args::new(), || {
            Ok(BTreeMap::from([(0u64, "low"), (1, "mid"), (2, "high")]))
        })?;
        let summary = bucket_summary(&data, &labels);

        ctx.write(format!("Loaded {} rows", data.len()));
        ctx.json(&summary)?;
        Ok(())
    })
}

fn bucket_summary(
    data: &[u64],
    labels: &Arc<BTreeMap<u64, &'static str>>,
) -> BTreeMap<&'static str, usize> {
    let mut summary = BTreeMap::new();
    for value in data {
        let bucket = (value / 34).min(2);
        if let Some(label) = labels.get(&bucket) {
            *summary.entry(*label).or_insert(0) += 1;
        }
    }
    summary
}
