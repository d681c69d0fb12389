//! # Postgres store
//!
//! Maps the relational schema in `migrations/` to the domain records.
//! Compare-and-swap is a conditional `UPDATE ... WHERE version = $n` run in
//! the same transaction as the row change.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domains::{
    Ad, AdRepo, AdRequest, AdSlot, AdminNotification, BoxRoute, DomainError, FleetRepo, Monitor,
    MonitorAd, MonitorSnapshot, NotificationKind, Notifier, RefusedAd, Result, SubscriptionMonitor,
    SubscriptionSlot, Validation,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

fn storage(e: sqlx::Error) -> DomainError {
    DomainError::Storage(e.to_string())
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| DomainError::Storage(format!("negative value in {column}")))
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| DomainError::Validation(format!("{value} is out of range")))
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| DomainError::Validation(format!("{value} is out of range")))
}

fn monitor_from_row(row: &PgRow) -> Result<Monitor> {
    Ok(Monitor {
        id: row.try_get("id").map_err(storage)?,
        address: row.try_get("address").map_err(storage)?,
        max_blocks: to_u32(row.try_get("max_blocks").map_err(storage)?, "max_blocks")?,
        partner_id: row.try_get("partner_id").map_err(storage)?,
        box_id: row.try_get("box_id").map_err(storage)?,
        active: row.try_get("active").map_err(storage)?,
        version: row.try_get::<i64, _>("version").map_err(storage)?.max(0) as u64,
    })
}

fn monitor_ad_from_row(row: &PgRow) -> Result<MonitorAd> {
    Ok(MonitorAd {
        monitor_id: row.try_get("monitor_id").map_err(storage)?,
        ad_id: row.try_get("ad_id").map_err(storage)?,
        order_index: to_u32(row.try_get("order_index").map_err(storage)?, "order_index")?,
        block_quantity: to_u32(row.try_get("block_quantity").map_err(storage)?, "block_quantity")?,
    })
}

fn ad_from_row(row: &PgRow) -> Result<Ad> {
    let validation: String = row.try_get("validation").map_err(storage)?;
    let Json(refusals): Json<Vec<RefusedAd>> = row.try_get("refusals").map_err(storage)?;
    Ok(Ad {
        id: row.try_get("id").map_err(storage)?,
        client_id: row.try_get("client_id").map_err(storage)?,
        file_name: row.try_get("file_name").map_err(storage)?,
        validation: validation.parse::<Validation>().map_err(DomainError::Storage)?,
        refusals,
        refusal_count: to_u32(row.try_get("refusal_count").map_err(storage)?, "refusal_count")?,
        ad_request_id: row.try_get("ad_request_id").map_err(storage)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(storage)?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<SubscriptionMonitor> {
    Ok(SubscriptionMonitor {
        id: row.try_get("id").map_err(storage)?,
        client_id: row.try_get("client_id").map_err(storage)?,
        monitor_id: row.try_get("monitor_id").map_err(storage)?,
        slots_quantity: to_u32(row.try_get("slots_quantity").map_err(storage)?, "slots_quantity")?,
        active: row.try_get("active").map_err(storage)?,
    })
}

fn kind_label(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::CapacityRejected => "capacity_rejected",
        NotificationKind::MonitorDeactivated => "monitor_deactivated",
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(storage)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DomainError::Storage(e.to_string()))?;
        info!("database migrations applied");
        Ok(())
    }

    /// Moves the version forward if it still equals `expected`.
    async fn advance_version(tx: &mut Transaction<'_, Postgres>, monitor_id: Uuid, expected: u64) -> Result<u64> {
        let bumped: Option<i64> = sqlx::query_scalar(
            "UPDATE monitors SET version = version + 1 WHERE id = $1 AND version = $2 RETURNING version",
        )
        .bind(monitor_id)
        .bind(to_i64(expected)?)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;

        match bumped {
            Some(version) => Ok(version.max(0) as u64),
            None => {
                let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM monitors WHERE id = $1")
                    .bind(monitor_id)
                    .fetch_optional(&mut **tx)
                    .await
                    .map_err(storage)?;
                match exists {
                    Some(_) => Err(DomainError::VersionConflict { monitor_id, expected }),
                    None => Err(DomainError::not_found("monitor", monitor_id)),
                }
            }
        }
    }

    async fn bump_version(tx: &mut Transaction<'_, Postgres>, monitor_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE monitors SET version = version + 1 WHERE id = $1")
            .bind(monitor_id)
            .execute(&mut **tx)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl FleetRepo for PgStore {
    async fn monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        let row = sqlx::query("SELECT * FROM monitors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(monitor_from_row).transpose()
    }

    async fn monitors_for_box(&self, box_id: Uuid) -> Result<Vec<Monitor>> {
        let rows = sqlx::query("SELECT * FROM monitors WHERE box_id = $1 ORDER BY address")
            .bind(box_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(monitor_from_row).collect()
    }

    async fn snapshot(&self, monitor_id: Uuid) -> Result<Option<MonitorSnapshot>> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let Some(row) = sqlx::query("SELECT * FROM monitors WHERE id = $1")
            .bind(monitor_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
        else {
            return Ok(None);
        };
        let monitor = monitor_from_row(&row)?;

        let ads = sqlx::query(
            "SELECT ma.ad_id, a.client_id, a.file_name, ma.order_index, ma.block_quantity
             FROM monitor_ads ma JOIN ads a ON a.id = ma.ad_id
             WHERE ma.monitor_id = $1 ORDER BY ma.order_index",
        )
        .bind(monitor_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?
        .iter()
        .map(|row| {
            Ok(AdSlot {
                ad_id: row.try_get("ad_id").map_err(storage)?,
                client_id: row.try_get("client_id").map_err(storage)?,
                file_name: row.try_get("file_name").map_err(storage)?,
                order_index: to_u32(row.try_get("order_index").map_err(storage)?, "order_index")?,
                block_quantity: to_u32(row.try_get("block_quantity").map_err(storage)?, "block_quantity")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        let subscriptions = sqlx::query(
            "SELECT id, client_id, slots_quantity FROM subscription_monitors WHERE monitor_id = $1 AND active",
        )
        .bind(monitor_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?
        .iter()
        .map(|row| {
            Ok(SubscriptionSlot {
                subscription_id: row.try_get("id").map_err(storage)?,
                client_id: row.try_get("client_id").map_err(storage)?,
                slots_quantity: to_u32(row.try_get("slots_quantity").map_err(storage)?, "slots_quantity")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

        tx.commit().await.map_err(storage)?;
        Ok(Some(MonitorSnapshot { monitor, ads, subscriptions }))
    }

    async fn commit_assignment(&self, monitor_id: Uuid, expected_version: u64, row: MonitorAd) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let version = Self::advance_version(&mut tx, monitor_id, expected_version).await?;

        let inserted = sqlx::query(
            "INSERT INTO monitor_ads (monitor_id, ad_id, order_index, block_quantity)
             VALUES ($1, $2, $3, $4) ON CONFLICT (monitor_id, ad_id) DO NOTHING",
        )
        .bind(monitor_id)
        .bind(row.ad_id)
        .bind(to_i32(row.order_index)?)
        .bind(to_i32(row.block_quantity)?)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        if inserted.rows_affected() == 0 {
            return Err(DomainError::Conflict(format!("ad {} is already on monitor {monitor_id}", row.ad_id)));
        }

        tx.commit().await.map_err(storage)?;
        Ok(version)
    }

    async fn remove_assignments(&self, monitor_id: Uuid, ad_ids: Vec<Uuid>) -> Result<Vec<MonitorAd>> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let removed = sqlx::query("DELETE FROM monitor_ads WHERE monitor_id = $1 AND ad_id = ANY($2) RETURNING *")
            .bind(monitor_id)
            .bind(&ad_ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(storage)?
            .iter()
            .map(monitor_ad_from_row)
            .collect::<Result<Vec<_>>>()?;
        if removed.is_empty() {
            return Ok(removed);
        }

        sqlx::query(
            "UPDATE monitor_ads ma SET order_index = ranked.position
             FROM (SELECT ad_id, ROW_NUMBER() OVER (ORDER BY order_index) AS position
                   FROM monitor_ads WHERE monitor_id = $1) ranked
             WHERE ma.monitor_id = $1 AND ma.ad_id = ranked.ad_id",
        )
        .bind(monitor_id)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        Self::bump_version(&mut tx, monitor_id).await?;

        tx.commit().await.map_err(storage)?;
        debug!(monitor_id = %monitor_id, removed = removed.len(), "assignments removed");
        Ok(removed)
    }

    async fn reorder_assignments(&self, monitor_id: Uuid, expected_version: u64, order: Vec<(Uuid, u32)>) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let version = Self::advance_version(&mut tx, monitor_id, expected_version).await?;
        for (ad_id, order_index) in order {
            let updated = sqlx::query("UPDATE monitor_ads SET order_index = $3 WHERE monitor_id = $1 AND ad_id = $2")
                .bind(monitor_id)
                .bind(ad_id)
                .bind(to_i32(order_index)?)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            if updated.rows_affected() == 0 {
                return Err(DomainError::Validation(format!("ad {ad_id} is not on monitor {monitor_id}")));
            }
        }
        tx.commit().await.map_err(storage)?;
        Ok(version)
    }

    async fn assignments_for_ad(&self, ad_id: Uuid) -> Result<Vec<MonitorAd>> {
        sqlx::query("SELECT * FROM monitor_ads WHERE ad_id = $1")
            .bind(ad_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?
            .iter()
            .map(monitor_ad_from_row)
            .collect()
    }

    async fn set_monitor_active(&self, monitor_id: Uuid, active: bool) -> Result<Option<bool>> {
        // The subquery reads the row before the update is applied.
        sqlx::query_scalar(
            "UPDATE monitors m SET active = $2 FROM (SELECT id, active FROM monitors WHERE id = $1 FOR UPDATE) prev
             WHERE m.id = prev.id RETURNING prev.active",
        )
        .bind(monitor_id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)
    }

    async fn bind_box(&self, monitor_id: Uuid, box_id: Option<Uuid>) -> Result<Option<Uuid>> {
        let previous: Option<Option<Uuid>> = sqlx::query_scalar(
            "UPDATE monitors m SET box_id = $2 FROM (SELECT id, box_id FROM monitors WHERE id = $1 FOR UPDATE) prev
             WHERE m.id = prev.id RETURNING prev.box_id",
        )
        .bind(monitor_id)
        .bind(box_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        previous.ok_or_else(|| DomainError::not_found("monitor", monitor_id))
    }

    async fn box_route(&self, box_id: Uuid) -> Result<Option<BoxRoute>> {
        let row = sqlx::query(
            "SELECT b.id, b.active, a.ip, a.mac FROM boxes b JOIN box_addresses a ON a.id = b.address_id WHERE b.id = $1",
        )
        .bind(box_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.map(|row| {
            Ok(BoxRoute {
                box_id: row.try_get("id").map_err(storage)?,
                ip: row.try_get("ip").map_err(storage)?,
                mac: row.try_get("mac").map_err(storage)?,
                active: row.try_get("active").map_err(storage)?,
            })
        })
        .transpose()
    }

    async fn subscription(&self, id: Uuid) -> Result<Option<SubscriptionMonitor>> {
        let row = sqlx::query("SELECT * FROM subscription_monitors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn deactivate_subscription(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let monitor_id: Option<Uuid> =
            sqlx::query_scalar("UPDATE subscription_monitors SET active = FALSE WHERE id = $1 RETURNING monitor_id")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;
        let monitor_id = monitor_id.ok_or_else(|| DomainError::not_found("subscription", id))?;
        Self::bump_version(&mut tx, monitor_id).await?;
        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn subscribed_monitors(&self, client_id: Uuid) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            "SELECT DISTINCT monitor_id FROM subscription_monitors WHERE client_id = $1 AND active ORDER BY monitor_id",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)
    }
}

#[async_trait]
impl AdRepo for PgStore {
    async fn ad(&self, id: Uuid) -> Result<Option<Ad>> {
        let row = sqlx::query("SELECT * FROM ads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(ad_from_row).transpose()
    }

    async fn save_ad(&self, ad: Ad) -> Result<()> {
        sqlx::query(
            "INSERT INTO ads (id, client_id, file_name, validation, refusals, refusal_count, ad_request_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                file_name = EXCLUDED.file_name,
                validation = EXCLUDED.validation,
                refusals = EXCLUDED.refusals,
                refusal_count = EXCLUDED.refusal_count",
        )
        .bind(ad.id)
        .bind(ad.client_id)
        .bind(&ad.file_name)
        .bind(ad.validation.as_str())
        .bind(Json(&ad.refusals))
        .bind(to_i32(ad.refusal_count)?)
        .bind(ad.ad_request_id)
        .bind(ad.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn ad_request(&self, id: Uuid) -> Result<Option<AdRequest>> {
        let row = sqlx::query("SELECT * FROM ad_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.map(|row| {
            Ok(AdRequest {
                id: row.try_get("id").map_err(storage)?,
                client_id: row.try_get("client_id").map_err(storage)?,
                description: row.try_get("description").map_err(storage)?,
                active: row.try_get("active").map_err(storage)?,
            })
        })
        .transpose()
    }

    async fn save_ad_request(&self, request: AdRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO ad_requests (id, client_id, description, active) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET description = EXCLUDED.description, active = EXCLUDED.active",
        )
        .bind(request.id)
        .bind(request.client_id)
        .bind(&request.description)
        .bind(request.active)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for PgStore {
    async fn notify(&self, notification: AdminNotification) -> Result<()> {
        sqlx::query(
            "INSERT INTO admin_notifications (id, kind, message, monitor_id, ad_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(notification.id)
        .bind(kind_label(notification.kind))
        .bind(&notification.message)
        .bind(notification.monitor_id)
        .bind(notification.ad_id)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_columns_are_storage_errors() {
        assert!(matches!(to_u32(-1, "max_blocks"), Err(DomainError::Storage(_))));
        assert_eq!(to_u32(7, "max_blocks").unwrap(), 7);
    }

    #[test]
    fn notification_kinds_have_stable_labels() {
        assert_eq!(kind_label(NotificationKind::CapacityRejected), "capacity_rejected");
        assert_eq!(kind_label(NotificationKind::MonitorDeactivated), "monitor_deactivated");
    }
}
