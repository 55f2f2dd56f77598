//! Scan recording: turns request headers into a scan event, appends it to the
//! scan log and bumps the QR code's counter, off the response path.

use crate::model::{DeviceType, NewScan};
use crate::store::{QrStore, StoreError};
use crate::utils::get_header;
use axum::http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::Job;
use uuid::Uuid;

const MOBILE_MARKERS: [&str; 4] = ["mobile", "android", "iphone", "ipod"];
const TABLET_MARKERS: [&str; 2] = ["ipad", "tablet"];
const UNKNOWN_IP: &str = "unknown";

// Edge networks inject geography; first header present wins.
const COUNTRY_HEADERS: [&str; 2] = ["x-vercel-ip-country", "cf-ipcountry"];
const CITY_HEADERS: [&str; 2] = ["x-vercel-ip-city", "cf-ipcity"];

/// Substring heuristic. Mobile markers are checked before tablet ones.
pub fn classify_device(user_agent: Option<&str>) -> DeviceType {
    let Some(user_agent) = user_agent else {
        return DeviceType::Unknown;
    };
    let user_agent = user_agent.to_ascii_lowercase();
    if MOBILE_MARKERS.iter().any(|marker| user_agent.contains(marker)) {
        DeviceType::Mobile
    } else if TABLET_MARKERS.iter().any(|marker| user_agent.contains(marker)) {
        DeviceType::Tablet
    } else {
        DeviceType::Desktop
    }
}

/// First entry of `x-forwarded-for`, then `x-real-ip`, then `unknown`.
/// The value is not validated.
pub fn client_ip(headers: &HeaderMap) -> String {
    get_header("x-forwarded-for", headers)
        .and_then(|forwarded| {
            forwarded
                .split(',')
                .next()
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
        })
        .or_else(|| get_header("x-real-ip", headers))
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

fn first_header(names: &[&str], headers: &HeaderMap) -> Option<String> {
    names.iter().find_map(|name| get_header(name, headers))
}

/// Everything a scan event records about the request, captured before the
/// response is sent so recording does not hold on to the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanMetadata {
    pub ip: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: DeviceType,
}

impl ScanMetadata {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = get_header("user-agent", headers);
        Self {
            ip: client_ip(headers),
            device_type: classify_device(user_agent.as_deref()),
            user_agent,
            referrer: first_header(&["referer", "referrer"], headers),
            country: first_header(&COUNTRY_HEADERS, headers),
            city: first_header(&CITY_HEADERS, headers),
        }
    }

    fn into_scan(self, qr_id: Uuid) -> NewScan {
        NewScan {
            qr_id,
            ip: self.ip,
            user_agent: self.user_agent,
            referrer: self.referrer,
            country: self.country,
            city: self.city,
            device_type: self.device_type,
        }
    }
}

#[derive(Clone)]
pub struct ScanRecorder {
    store: Arc<dyn QrStore>,
    timeout: Duration,
}

impl ScanRecorder {
    pub fn new(store: Arc<dyn QrStore>, timeout_ms: u64) -> Self {
        Self {
            store,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Records on a detached task. The handle is only for callers that want
    /// to observe completion; the redirect path drops it.
    pub fn dispatch(&self, qr_id: Uuid, metadata: ScanMetadata) -> JoinHandle<()> {
        let recorder = self.clone();
        tokio::spawn(async move { recorder.record(qr_id, metadata).await })
    }

    /// Appends the scan and increments the counter concurrently. Failures are
    /// logged and dropped, never retried.
    pub async fn record(&self, qr_id: Uuid, metadata: ScanMetadata) {
        let scan = metadata.into_scan(qr_id);
        let recording = async {
            tokio::join!(self.store.insert_scan(&scan), self.increment(qr_id))
        };
        match tokio::time::timeout(self.timeout, recording).await {
            Err(elapsed) => tracing::error!(%qr_id, "Recording scan timed out: {}", elapsed),
            Ok((inserted, incremented)) => {
                if let Err(err) = inserted {
                    tracing::error!(%qr_id, "Saving scan failed: {}", err);
                }
                if let Err(err) = incremented {
                    tracing::error!(%qr_id, "Incrementing scan count failed: {}", err);
                }
                tracing::debug!(%qr_id, device = scan.device_type.as_str(), "Scan recorded");
            }
        }
    }

    async fn increment(&self, qr_id: Uuid) -> Result<(), StoreError> {
        match self.store.increment_scan_count(qr_id).await {
            Err(StoreError::Unsupported(primitive)) => {
                // Read-then-write loses updates under concurrent scans.
                tracing::warn!(%qr_id, "{} unavailable, using non-atomic scan count update", primitive);
                let current = self.store.scan_count(qr_id).await?.unwrap_or(0);
                self.store.set_scan_count(qr_id, current + 1).await
            }
            result => result,
        }
    }
}

/// Periodically raises lagging scan counters to the scan-log total.
///
/// Scan insert and increment are not one transaction, so a run landing between
/// them can count a scan the increment is about to add. That over-count of one
/// is accepted.
pub fn create_reconcile_job(cron_expression: &str, store: Arc<dyn QrStore>) -> Job {
    Job::new_async(cron_expression, move |_, _| {
        let store = store.clone();
        Box::pin(async move {
            match store.reconcile_scan_counts().await {
                Ok(0) => tracing::debug!("Scan counts consistent"),
                Ok(changed) => tracing::info!("Reconciled {} scan counts", changed),
                Err(err) => tracing::error!("Reconciling scan counts failed: {}", err),
            }
        })
    })
    .expect("Creating reconcile job failed")
}
