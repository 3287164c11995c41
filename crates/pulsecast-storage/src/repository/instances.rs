//! Gateway instance directory

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateInstance, Instance};
use async_trait::async_trait;
use pulsecast_common::types::{InstanceId, TenantId};
use pulsecast_common::Result;
use uuid::Uuid;

/// Instance repository trait
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn create(&self, input: CreateInstance) -> Result<Instance>;
    async fn get(&self, id: InstanceId) -> Result<Option<Instance>>;
    /// Connected instances of the tenant among `ids`, in the order of `ids`
    async fn list_connected(&self, tenant_id: TenantId, ids: &[InstanceId]) -> Result<Vec<Instance>>;
}

/// Database instance repository
#[derive(Clone)]
pub struct DbInstanceRepository {
    pool: DatabasePool,
}

impl DbInstanceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstanceRepository for DbInstanceRepository {
    async fn create(&self, input: CreateInstance) -> Result<Instance> {
        sqlx::query_as::<_, Instance>(
            r#"
            INSERT INTO instances (id, tenant_id, instance_name, status)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.tenant_id)
        .bind(&input.instance_name)
        .bind(input.status.as_str())
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, id: InstanceId) -> Result<Option<Instance>> {
        sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list_connected(&self, tenant_id: TenantId, ids: &[InstanceId]) -> Result<Vec<Instance>> {
        let found = sqlx::query_as::<_, Instance>(
            r#"
            SELECT * FROM instances
            WHERE tenant_id = $1 AND id = ANY($2) AND status = 'connected'
            "#,
        )
        .bind(tenant_id)
        .bind(ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        // Preserve caller order; rotation depends on it
        Ok(ids
            .iter()
            .filter_map(|id| found.iter().find(|i| i.id == *id).cloned())
            .collect())
    }
}
