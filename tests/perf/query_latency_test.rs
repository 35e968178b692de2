use std::time::Instant;

use crate::model::AppInfo;
use crate::search::rank_apps;

fn p95_ms(samples: &mut [f64]) -> f64 {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let last = samples.len().saturating_sub(1);
    let idx = ((last as f64) * 0.95).round() as usize;
    samples[idx.min(last)]
}

#[test]
fn warm_app_filter_p95_under_25ms() {
    let mut apps: Vec<AppInfo> = (0..10_000)
        .map(|i| {
            AppInfo::new(
                &format!("Utility {i:05}"),
                &format!("C:\\ProgramData\\Microsoft\\Windows\\Start Menu\\Programs\\Utility {i:05}.lnk"),
            )
        })
        .collect();

    apps.push(AppInfo::new(
        "Visual Studio Code",
        "C:\\ProgramData\\Microsoft\\Windows\\Start Menu\\Programs\\Visual Studio Code.lnk",
    ));

    for _ in 0..30 {
        let _ = rank_apps(&apps, "vs cde", 20);
    }

    let mut batch_p95 = Vec::with_capacity(5);
    for _ in 0..5 {
        let mut samples = Vec::with_capacity(80);
        for _ in 0..80 {
            let start = Instant::now();
            let _ = rank_apps(&apps, "vs cde", 20);
            samples.push(start.elapsed().as_secs_f64() * 1000.0);
        }
        batch_p95.push(p95_ms(&mut samples));
    }

    let ranked = rank_apps(&apps, "vs cde", 20);
    assert_eq!(ranked[0].name, "Visual Studio Code");

    batch_p95.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_p95 = batch_p95[batch_p95.len() / 2];

    assert!(
        median_p95 <= 25.0,
        "median batch p95 too high: {median_p95:.3}ms (budget 25.0ms); batches={batch_p95:?}",
    );
}
