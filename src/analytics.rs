use crate::model::{CountryCount, DailyCount, DeviceCount, QrCode, QrScan, ReferrerCount, ScanStats};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};

/// How many of the newest scans feed the statistics.
pub const STATS_SAMPLE_SIZE: i64 = 1000;
const TOP_COUNTRIES: usize = 10;
const TOP_REFERRERS: usize = 5;

fn tally<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<(String, u64)> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    let mut counts: Vec<(String, u64)> = counts
        .into_iter()
        .map(|(key, count)| (key.to_string(), count))
        .collect();
    counts.sort_by(|(a_key, a_count), (b_key, b_count)| {
        b_count.cmp(a_count).then_with(|| a_key.cmp(b_key))
    });
    counts
}

pub fn scan_stats(qr_code: &QrCode, scans: &[QrScan], now: DateTime<Utc>) -> ScanStats {
    let week_ago = now - Duration::days(7);

    let mut by_day: BTreeMap<String, u64> = BTreeMap::new();
    for scan in scans {
        *by_day
            .entry(scan.scanned_at.format("%Y-%m-%d").to_string())
            .or_default() += 1;
    }

    ScanStats {
        total_scans: qr_code.scan_count,
        scans_last_7_days: scans.iter().filter(|scan| scan.scanned_at > week_ago).count() as u64,
        scans_by_day: by_day
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
        top_countries: tally(scans.iter().map(|scan| scan.country.as_deref().unwrap_or("Unknown")))
            .into_iter()
            .take(TOP_COUNTRIES)
            .map(|(country, count)| CountryCount { country, count })
            .collect(),
        device_breakdown: tally(
            scans
                .iter()
                .map(|scan| scan.device_type.as_deref().unwrap_or("Unknown")),
        )
        .into_iter()
        .map(|(device, count)| DeviceCount { device, count })
        .collect(),
        top_referrers: tally(scans.iter().map(|scan| scan.referrer.as_deref().unwrap_or("Direct")))
            .into_iter()
            .take(TOP_REFERRERS)
            .map(|(referrer, count)| ReferrerCount { referrer, count })
            .collect(),
    }
}
