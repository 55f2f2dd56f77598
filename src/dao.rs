use crate::model::{NewQrCode, NewScan, Owner, QrCode, QrScan, QrUpdate};
use crate::store::{QrStore, StoreError};
use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::{Error, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

const UNDEFINED_FUNCTION: &str = "42883";

/// Postgres-backed store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    db_connection_pool: PgPool,
}

impl PgStore {
    pub fn new(db_connection_pool: PgPool) -> Self {
        Self { db_connection_pool }
    }
}

fn push_owner_filter(builder: &mut QueryBuilder<'_, Postgres>, owner: &Owner) {
    match owner {
        Owner::User(user_id) => builder.push(" and user_id = ").push_bind(user_id.clone()),
        Owner::Anonymous(token) => builder
            .push(" and anonymous_token = ")
            .push_bind(token.clone()),
    };
}

#[async_trait]
impl QrStore for PgStore {
    async fn find_by_short_code(&self, short_code: &str) -> Result<Option<QrCode>, StoreError> {
        let qr_code = sqlx::query_as(
            r#"
              select id, user_id, anonymous_token, short_code, destination_url, title, fg_color,
                     bg_color, is_active, scan_count, created_at, updated_at
              from qr_codes where short_code = $1
            "#,
        )
        .bind(short_code)
        .fetch_optional(&self.db_connection_pool)
        .await?;
        Ok(qr_code)
    }

    async fn find(&self, id: Uuid, owner: &Owner) -> Result<Option<QrCode>, StoreError> {
        let qr_code = sqlx::query_as(
            r#"
              select id, user_id, anonymous_token, short_code, destination_url, title, fg_color,
                     bg_color, is_active, scan_count, created_at, updated_at
              from qr_codes where id = $1 and (user_id = $2 or anonymous_token = $3)
            "#,
        )
        .bind(id)
        .bind(owner.user_id())
        .bind(owner.anonymous_token())
        .fetch_optional(&self.db_connection_pool)
        .await?;
        Ok(qr_code)
    }

    async fn list(&self, owner: &Owner) -> Result<Vec<QrCode>, StoreError> {
        let qr_codes = sqlx::query_as(
            r#"
              select id, user_id, anonymous_token, short_code, destination_url, title, fg_color,
                     bg_color, is_active, scan_count, created_at, updated_at
              from qr_codes where user_id = $1 or anonymous_token = $2
              order by created_at desc
            "#,
        )
        .bind(owner.user_id())
        .bind(owner.anonymous_token())
        .fetch_all(&self.db_connection_pool)
        .await?;
        Ok(qr_codes)
    }

    async fn insert(
        &self,
        new_qr_code: &NewQrCode,
        anonymous_limit: Option<i64>,
    ) -> Result<QrCode, StoreError> {
        let mut transaction = self.db_connection_pool.begin().await?;
        if let (Some(limit), Owner::Anonymous(token)) = (anonymous_limit, &new_qr_code.owner) {
            // Serializes creates per token until commit, so count-then-insert cannot race.
            sqlx::query("select pg_advisory_xact_lock(hashtext($1))")
                .bind(token)
                .execute(&mut *transaction)
                .await?;
            let existing: i64 =
                sqlx::query_scalar("select count(*) from qr_codes where anonymous_token = $1")
                    .bind(token)
                    .fetch_one(&mut *transaction)
                    .await?;
            if existing >= limit {
                return Err(StoreError::QuotaExceeded(limit));
            }
        }
        let inserted = sqlx::query_as(
            r#"
              insert into qr_codes(user_id, anonymous_token, short_code, destination_url, title, fg_color, bg_color)
              values ($1, $2, $3, $4, $5, $6, $7)
              returning id, user_id, anonymous_token, short_code, destination_url, title, fg_color,
                        bg_color, is_active, scan_count, created_at, updated_at
            "#,
        )
        .bind(new_qr_code.owner.user_id())
        .bind(new_qr_code.owner.anonymous_token())
        .bind(&new_qr_code.short_code)
        .bind(&new_qr_code.destination_url)
        .bind(&new_qr_code.title)
        .bind(&new_qr_code.fg_color)
        .bind(&new_qr_code.bg_color)
        .fetch_one(&mut *transaction)
        .await;
        let qr_code = match inserted {
            Ok(qr_code) => qr_code,
            Err(Error::Database(db_err)) if db_err.kind() == ErrorKind::UniqueViolation => {
                return Err(StoreError::DuplicateShortCode)
            }
            Err(err) => return Err(err.into()),
        };
        transaction.commit().await?;
        Ok(qr_code)
    }

    async fn update(
        &self,
        id: Uuid,
        owner: &Owner,
        update: &QrUpdate,
    ) -> Result<Option<QrCode>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("update qr_codes set updated_at = now()");
        if let Some(destination_url) = &update.destination_url {
            builder
                .push(", destination_url = ")
                .push_bind(destination_url.clone());
        }
        if let Some(title) = &update.title {
            builder.push(", title = ").push_bind(title.clone());
        }
        if let Some(fg_color) = &update.fg_color {
            builder.push(", fg_color = ").push_bind(fg_color.clone());
        }
        if let Some(bg_color) = &update.bg_color {
            builder.push(", bg_color = ").push_bind(bg_color.clone());
        }
        if let Some(is_active) = update.is_active {
            builder.push(", is_active = ").push_bind(is_active);
        }
        builder.push(" where id = ").push_bind(id);
        push_owner_filter(&mut builder, owner);
        builder.push(
            " returning id, user_id, anonymous_token, short_code, destination_url, title, \
             fg_color, bg_color, is_active, scan_count, created_at, updated_at",
        );
        let qr_code = builder
            .build_query_as::<QrCode>()
            .fetch_optional(&self.db_connection_pool)
            .await?;
        Ok(qr_code)
    }

    async fn delete(&self, id: Uuid, owner: &Owner) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "delete from qr_codes where id = $1 and (user_id = $2 or anonymous_token = $3)",
        )
        .bind(id)
        .bind(owner.user_id())
        .bind(owner.anonymous_token())
        .execute(&self.db_connection_pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_scan(&self, scan: &NewScan) -> Result<(), StoreError> {
        sqlx::query(
            r#"
              insert into qr_scans(qr_id, ip, user_agent, referrer, country, city, device_type)
              values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(scan.qr_id)
        .bind(&scan.ip)
        .bind(&scan.user_agent)
        .bind(&scan.referrer)
        .bind(&scan.country)
        .bind(&scan.city)
        .bind(scan.device_type.as_str())
        .execute(&self.db_connection_pool)
        .await?;
        Ok(())
    }

    async fn increment_scan_count(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("select increment_scan_count($1)")
            .bind(id)
            .execute(&self.db_connection_pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(Error::Database(db_err)) if db_err.code().as_deref() == Some(UNDEFINED_FUNCTION) => {
                Err(StoreError::Unsupported("increment_scan_count"))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn scan_count(&self, id: Uuid) -> Result<Option<i64>, StoreError> {
        let scan_count = sqlx::query_scalar("select scan_count from qr_codes where id = $1")
            .bind(id)
            .fetch_optional(&self.db_connection_pool)
            .await?;
        Ok(scan_count)
    }

    async fn set_scan_count(&self, id: Uuid, scan_count: i64) -> Result<(), StoreError> {
        sqlx::query("update qr_codes set scan_count = $1 where id = $2")
            .bind(scan_count)
            .bind(id)
            .execute(&self.db_connection_pool)
            .await?;
        Ok(())
    }

    async fn recent_scans(&self, qr_id: Uuid, limit: i64) -> Result<Vec<QrScan>, StoreError> {
        let scans = sqlx::query_as(
            r#"
              select id, qr_id, ip, user_agent, referrer, country, city, device_type, scanned_at
              from qr_scans where qr_id = $1 order by scanned_at desc limit $2
            "#,
        )
        .bind(qr_id)
        .bind(limit)
        .fetch_all(&self.db_connection_pool)
        .await?;
        Ok(scans)
    }

    async fn reconcile_scan_counts(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
              with totals as (
                  select q.id, count(s.id) as total
                  from qr_codes q left join qr_scans s on s.qr_id = q.id
                  group by q.id
              )
              update qr_codes set scan_count = totals.total
              from totals where qr_codes.id = totals.id and qr_codes.scan_count < totals.total
            "#,
        )
        .execute(&self.db_connection_pool)
        .await?;
        Ok(result.rows_affected())
    }
}
