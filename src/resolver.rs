use crate::store::{QrStore, StoreError};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Redirect { destination: String, qr_id: Uuid },
    NotFound,
    Inactive,
}

impl Resolution {
    /// Machine-readable reason passed to the landing page.
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            Resolution::Redirect { .. } => None,
            Resolution::NotFound => Some("not_found"),
            Resolution::Inactive => Some("inactive"),
        }
    }
}

/// Exact-match lookup of a short code. Never writes.
pub async fn resolve(store: &dyn QrStore, short_code: &str) -> Result<Resolution, StoreError> {
    let resolution = match store.find_by_short_code(short_code).await? {
        None => Resolution::NotFound,
        Some(qr_code) if !qr_code.is_active => Resolution::Inactive,
        Some(qr_code) => Resolution::Redirect {
            destination: qr_code.destination_url,
            qr_id: qr_code.id,
        },
    };
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::model::{NewQrCode, Owner, QrUpdate, DEFAULT_BG_COLOR, DEFAULT_FG_COLOR};

    async fn store_with(short_code: &str) -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let qr_code = store
            .insert(
                &NewQrCode {
                    owner: Owner::Anonymous("anon_1".into()),
                    short_code: short_code.into(),
                    destination_url: "https://example.com/menu".into(),
                    title: Some("Menu".into()),
                    fg_color: DEFAULT_FG_COLOR.into(),
                    bg_color: DEFAULT_BG_COLOR.into(),
                },
                None,
            )
            .await
            .unwrap();
        (store, qr_code.id)
    }

    #[tokio::test]
    async fn resolves_active_code() {
        let (store, qr_id) = store_with("Ab3dE6gH").await;
        assert_eq!(
            resolve(&store, "Ab3dE6gH").await.unwrap(),
            Resolution::Redirect {
                destination: "https://example.com/menu".into(),
                qr_id
            }
        );
    }

    #[tokio::test]
    async fn matches_exactly() {
        let (store, _) = store_with("Ab3dE6gH").await;
        assert_eq!(resolve(&store, "ab3de6gh").await.unwrap(), Resolution::NotFound);
        assert_eq!(resolve(&store, "Ab3dE6g").await.unwrap(), Resolution::NotFound);
        assert_eq!(store.total_scan_records().await, 0);
    }

    #[tokio::test]
    async fn inactive_code_never_yields_destination() {
        let (store, qr_id) = store_with("Ab3dE6gH").await;
        let deactivate = QrUpdate {
            is_active: Some(false),
            ..QrUpdate::default()
        };
        store
            .update(qr_id, &Owner::Anonymous("anon_1".into()), &deactivate)
            .await
            .unwrap();
        let resolution = resolve(&store, "Ab3dE6gH").await.unwrap();
        assert_eq!(resolution, Resolution::Inactive);
        assert_eq!(resolution.failure_reason(), Some("inactive"));
    }
}
