use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_FG_COLOR: &str = "#000000";
pub const DEFAULT_BG_COLOR: &str = "#FFFFFF";

#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct QrCode {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub anonymous_token: Option<String>,
    pub short_code: String,
    pub destination_url: String,
    pub title: Option<String>,
    pub fg_color: String,
    pub bg_color: String,
    pub is_active: bool,
    pub scan_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QrCode {
    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        match owner {
            Owner::User(user_id) => self.user_id.as_deref() == Some(user_id.as_str()),
            Owner::Anonymous(token) => self.anonymous_token.as_deref() == Some(token.as_str()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct QrScan {
    pub id: Uuid,
    pub qr_id: Uuid,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

/// The identity a QR record belongs to. Exactly one is set on every record
/// the service creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Owner {
    User(String),
    Anonymous(String),
}

impl Owner {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Owner::User(user_id) => Some(user_id),
            Owner::Anonymous(_) => None,
        }
    }

    pub fn anonymous_token(&self) -> Option<&str> {
        match self {
            Owner::User(_) => None,
            Owner::Anonymous(token) => Some(token),
        }
    }
}

/// A validated record ready to be inserted.
#[derive(Clone, Debug)]
pub struct NewQrCode {
    pub owner: Owner,
    pub short_code: String,
    pub destination_url: String,
    pub title: Option<String>,
    pub fg_color: String,
    pub bg_color: String,
}

#[derive(Clone, Debug)]
pub struct NewScan {
    pub qr_id: Uuid,
    pub ip: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: DeviceType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "Mobile",
            DeviceType::Tablet => "Tablet",
            DeviceType::Desktop => "Desktop",
            DeviceType::Unknown => "Unknown",
        }
    }
}

#[derive(Deserialize)]
pub struct CreateQrRequest {
    #[serde(default)]
    pub destination_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub fg_color: Option<String>,
    #[serde(default)]
    pub bg_color: Option<String>,
    #[serde(default)]
    pub anonymous_token: Option<String>,
}

/// Partial update restricted to the mutable fields. Anything else in the
/// request body is dropped during deserialization.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct QrUpdate {
    #[serde(default)]
    pub destination_url: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub title: Option<Option<String>>,
    #[serde(default)]
    pub fg_color: Option<String>,
    #[serde(default)]
    pub bg_color: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

// Distinguishes `"title": null` (clear) from an absent key (keep).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DailyCount {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CountryCount {
    pub country: String,
    pub count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DeviceCount {
    pub device: String,
    pub count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ReferrerCount {
    pub referrer: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct ScanStats {
    pub total_scans: i64,
    pub scans_last_7_days: u64,
    pub scans_by_day: Vec<DailyCount>,
    pub top_countries: Vec<CountryCount>,
    pub device_breakdown: Vec<DeviceCount>,
    pub top_referrers: Vec<ReferrerCount>,
}

#[derive(Deserialize)]
pub struct ScansQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}
