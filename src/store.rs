use crate::model::{NewQrCode, NewScan, Owner, QrCode, QrScan, QrUpdate};
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("short code already taken")]
    DuplicateShortCode,
    #[error("anonymous limit of {0} QR codes reached")]
    QuotaExceeded(i64),
    #[error("{0} is not supported by this store")]
    Unsupported(&'static str),
    #[error("{0}")]
    Backend(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistent home of QR records and their scan log.
///
/// Methods taking an [`Owner`] only ever see records belonging to it; a
/// record owned by someone else behaves exactly like a missing one.
#[async_trait]
pub trait QrStore: Send + Sync {
    async fn find_by_short_code(&self, short_code: &str) -> Result<Option<QrCode>, StoreError>;

    async fn find(&self, id: Uuid, owner: &Owner) -> Result<Option<QrCode>, StoreError>;

    /// Newest first.
    async fn list(&self, owner: &Owner) -> Result<Vec<QrCode>, StoreError>;

    /// Inserts a record. With `anonymous_limit` set and an anonymous owner,
    /// fails with [`StoreError::QuotaExceeded`] when the token already holds
    /// that many records. The count and the insert are one atomic step.
    async fn insert(
        &self,
        new_qr_code: &NewQrCode,
        anonymous_limit: Option<i64>,
    ) -> Result<QrCode, StoreError>;

    async fn update(
        &self,
        id: Uuid,
        owner: &Owner,
        update: &QrUpdate,
    ) -> Result<Option<QrCode>, StoreError>;

    /// Scan records go with the QR record.
    async fn delete(&self, id: Uuid, owner: &Owner) -> Result<bool, StoreError>;

    async fn insert_scan(&self, scan: &NewScan) -> Result<(), StoreError>;

    /// Atomic `scan_count + 1` at the storage layer. Returns
    /// [`StoreError::Unsupported`] when the primitive is not available.
    async fn increment_scan_count(&self, id: Uuid) -> Result<(), StoreError>;

    async fn scan_count(&self, id: Uuid) -> Result<Option<i64>, StoreError>;

    async fn set_scan_count(&self, id: Uuid, scan_count: i64) -> Result<(), StoreError>;

    /// Newest first, at most `limit`.
    async fn recent_scans(&self, qr_id: Uuid, limit: i64) -> Result<Vec<QrScan>, StoreError>;

    /// Raises every counter that lags behind its number of logged scans. A
    /// counter ahead of the log is left alone; counters never go down.
    /// Returns how many counters changed.
    async fn reconcile_scan_counts(&self) -> Result<u64, StoreError>;
}
