use crate::model::{NewQrCode, NewScan, Owner, QrCode, QrScan, QrUpdate};
use crate::store::{QrStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    qr_codes: Vec<QrCode>,
    scans: Vec<QrScan>,
}

/// In-process store used when no database is configured, and by tests.
///
/// Every operation runs under one lock, which makes the increment atomic.
/// [`MemoryStore::without_atomic_increment`] removes that primitive so the
/// recorder has to fall back to read-then-write.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    atomic_increment: bool,
    fail_scan_inserts: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            atomic_increment: true,
            fail_scan_inserts: AtomicBool::new(false),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_atomic_increment() -> Self {
        Self {
            atomic_increment: false,
            ..Self::default()
        }
    }

    /// Makes every following `insert_scan` fail with a backend error.
    pub fn fail_scan_inserts(&self, fail: bool) {
        self.fail_scan_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn scan_records(&self, qr_id: Uuid) -> Vec<QrScan> {
        let tables = self.tables.lock().await;
        tables
            .scans
            .iter()
            .filter(|scan| scan.qr_id == qr_id)
            .cloned()
            .collect()
    }

    pub async fn total_scan_records(&self) -> usize {
        self.tables.lock().await.scans.len()
    }
}

#[async_trait]
impl QrStore for MemoryStore {
    async fn find_by_short_code(&self, short_code: &str) -> Result<Option<QrCode>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .qr_codes
            .iter()
            .find(|qr_code| qr_code.short_code == short_code)
            .cloned())
    }

    async fn find(&self, id: Uuid, owner: &Owner) -> Result<Option<QrCode>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .qr_codes
            .iter()
            .find(|qr_code| qr_code.id == id && qr_code.is_owned_by(owner))
            .cloned())
    }

    async fn list(&self, owner: &Owner) -> Result<Vec<QrCode>, StoreError> {
        let tables = self.tables.lock().await;
        let mut qr_codes: Vec<QrCode> = tables
            .qr_codes
            .iter()
            .rev()
            .filter(|qr_code| qr_code.is_owned_by(owner))
            .cloned()
            .collect();
        qr_codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(qr_codes)
    }

    async fn insert(
        &self,
        new_qr_code: &NewQrCode,
        anonymous_limit: Option<i64>,
    ) -> Result<QrCode, StoreError> {
        let mut tables = self.tables.lock().await;
        if let (Some(limit), Owner::Anonymous(_)) = (anonymous_limit, &new_qr_code.owner) {
            let existing = tables
                .qr_codes
                .iter()
                .filter(|qr_code| qr_code.is_owned_by(&new_qr_code.owner))
                .count() as i64;
            if existing >= limit {
                return Err(StoreError::QuotaExceeded(limit));
            }
        }
        if tables
            .qr_codes
            .iter()
            .any(|qr_code| qr_code.short_code == new_qr_code.short_code)
        {
            return Err(StoreError::DuplicateShortCode);
        }
        let now = Utc::now();
        let qr_code = QrCode {
            id: Uuid::new_v4(),
            user_id: new_qr_code.owner.user_id().map(str::to_string),
            anonymous_token: new_qr_code.owner.anonymous_token().map(str::to_string),
            short_code: new_qr_code.short_code.clone(),
            destination_url: new_qr_code.destination_url.clone(),
            title: new_qr_code.title.clone(),
            fg_color: new_qr_code.fg_color.clone(),
            bg_color: new_qr_code.bg_color.clone(),
            is_active: true,
            scan_count: 0,
            created_at: now,
            updated_at: now,
        };
        tables.qr_codes.push(qr_code.clone());
        Ok(qr_code)
    }

    async fn update(
        &self,
        id: Uuid,
        owner: &Owner,
        update: &QrUpdate,
    ) -> Result<Option<QrCode>, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(qr_code) = tables
            .qr_codes
            .iter_mut()
            .find(|qr_code| qr_code.id == id && qr_code.is_owned_by(owner))
        else {
            return Ok(None);
        };
        if let Some(destination_url) = &update.destination_url {
            qr_code.destination_url = destination_url.clone();
        }
        if let Some(title) = &update.title {
            qr_code.title = title.clone();
        }
        if let Some(fg_color) = &update.fg_color {
            qr_code.fg_color = fg_color.clone();
        }
        if let Some(bg_color) = &update.bg_color {
            qr_code.bg_color = bg_color.clone();
        }
        if let Some(is_active) = update.is_active {
            qr_code.is_active = is_active;
        }
        qr_code.updated_at = Utc::now();
        Ok(Some(qr_code.clone()))
    }

    async fn delete(&self, id: Uuid, owner: &Owner) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.qr_codes.len();
        tables
            .qr_codes
            .retain(|qr_code| !(qr_code.id == id && qr_code.is_owned_by(owner)));
        let deleted = tables.qr_codes.len() < before;
        if deleted {
            tables.scans.retain(|scan| scan.qr_id != id);
        }
        Ok(deleted)
    }

    async fn insert_scan(&self, scan: &NewScan) -> Result<(), StoreError> {
        if self.fail_scan_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("scan log unavailable".into()));
        }
        let mut tables = self.tables.lock().await;
        if !tables.qr_codes.iter().any(|qr_code| qr_code.id == scan.qr_id) {
            return Err(StoreError::Backend(format!(
                "qr code {} does not exist",
                scan.qr_id
            )));
        }
        tables.scans.push(QrScan {
            id: Uuid::new_v4(),
            qr_id: scan.qr_id,
            ip: Some(scan.ip.clone()),
            user_agent: scan.user_agent.clone(),
            referrer: scan.referrer.clone(),
            country: scan.country.clone(),
            city: scan.city.clone(),
            device_type: Some(scan.device_type.as_str().to_string()),
            scanned_at: Utc::now(),
        });
        Ok(())
    }

    async fn increment_scan_count(&self, id: Uuid) -> Result<(), StoreError> {
        if !self.atomic_increment {
            return Err(StoreError::Unsupported("increment_scan_count"));
        }
        let mut tables = self.tables.lock().await;
        if let Some(qr_code) = tables.qr_codes.iter_mut().find(|qr_code| qr_code.id == id) {
            qr_code.scan_count += 1;
        }
        Ok(())
    }

    async fn scan_count(&self, id: Uuid) -> Result<Option<i64>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .qr_codes
            .iter()
            .find(|qr_code| qr_code.id == id)
            .map(|qr_code| qr_code.scan_count))
    }

    async fn set_scan_count(&self, id: Uuid, scan_count: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(qr_code) = tables.qr_codes.iter_mut().find(|qr_code| qr_code.id == id) {
            qr_code.scan_count = scan_count;
        }
        Ok(())
    }

    async fn recent_scans(&self, qr_id: Uuid, limit: i64) -> Result<Vec<QrScan>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .scans
            .iter()
            .rev()
            .filter(|scan| scan.qr_id == qr_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn reconcile_scan_counts(&self) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut totals: HashMap<Uuid, i64> = HashMap::new();
        for scan in &tables.scans {
            *totals.entry(scan.qr_id).or_default() += 1;
        }
        let mut changed = 0;
        for qr_code in tables.qr_codes.iter_mut() {
            let total = totals.get(&qr_code.id).copied().unwrap_or(0);
            if qr_code.scan_count < total {
                qr_code.scan_count = total;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
