use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::error::StoreError;
use super::models::{OrgAttributes, OrgNode, Organization, System, User};
use super::store::{LocalStore, StoreTx};
use crate::types::OrgKind;

const ORG_COLUMNS: &str = "id, remote_id, name, description, custom_data, active, suspended_at, \
     suspended_by_org_id, synced_at, sync_error, created_at, updated_at, deleted_at";

const NODE_COLUMNS: &str = "id, remote_id, kind, parent_remote_id, active, suspended_by_org_id";

const USER_COLUMNS: &str = "id, remote_id, username, email, name, phone, organization_id, role_ids, \
     custom_data, suspended_at, suspended_by_org_id, synced_at, sync_error, created_at, updated_at, deleted_at";

const SYSTEM_COLUMNS: &str = "id, name, system_type, creator_org_id, secret_hash, suspended_at, \
     suspended_by_org_id, created_at, updated_at, deleted_at";

/// Name of the partial unique index guarding VAT numbers per organization kind
const VAT_CONSTRAINT: &str = "organizations_vat_unique";

#[derive(FromRow)]
struct OrganizationRow {
    id: Uuid,
    remote_id: Option<String>,
    name: String,
    description: String,
    custom_data: Json<Map<String, Value>>,
    active: bool,
    suspended_at: Option<DateTime<Utc>>,
    suspended_by_org_id: Option<String>,
    synced_at: Option<DateTime<Utc>>,
    sync_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrganizationRow> for Organization {
    type Error = StoreError;

    fn try_from(row: OrganizationRow) -> Result<Self, Self::Error> {
        let attributes = OrgAttributes::from_custom_data(&row.custom_data.0)
            .map_err(|e| StoreError::Corrupt(format!("organization {}: {}", row.id, e)))?;
        Ok(Organization {
            id: row.id,
            remote_id: row.remote_id,
            name: row.name,
            description: row.description,
            attributes,
            active: row.active,
            suspended_at: row.suspended_at,
            suspended_by_org_id: row.suspended_by_org_id,
            synced_at: row.synced_at,
            sync_error: row.sync_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct OrgNodeRow {
    id: Uuid,
    remote_id: String,
    kind: String,
    parent_remote_id: Option<String>,
    active: bool,
    suspended_by_org_id: Option<String>,
}

impl TryFrom<OrgNodeRow> for OrgNode {
    type Error = StoreError;

    fn try_from(row: OrgNodeRow) -> Result<Self, Self::Error> {
        let kind: OrgKind = row
            .kind
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("organization {} has kind {}", row.id, row.kind)))?;
        Ok(OrgNode {
            id: row.id,
            remote_id: row.remote_id,
            kind,
            parent_id: row.parent_remote_id,
            active: row.active,
            suspended_by_org_id: row.suspended_by_org_id,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    remote_id: Option<String>,
    username: String,
    email: String,
    name: String,
    phone: Option<String>,
    organization_id: String,
    role_ids: Vec<String>,
    custom_data: Json<Map<String, Value>>,
    suspended_at: Option<DateTime<Utc>>,
    suspended_by_org_id: Option<String>,
    synced_at: Option<DateTime<Utc>>,
    sync_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            remote_id: row.remote_id,
            username: row.username,
            email: row.email,
            name: row.name,
            phone: row.phone,
            organization_id: row.organization_id,
            role_ids: row.role_ids,
            custom_data: row.custom_data.0,
            suspended_at: row.suspended_at,
            suspended_by_org_id: row.suspended_by_org_id,
            synced_at: row.synced_at,
            sync_error: row.sync_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

/// Map driver errors, turning unique violations into conflicts with a readable message
fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            if db.constraint() == Some(VAT_CONSTRAINT) {
                return StoreError::Conflict("VAT already exists".to_string());
            }
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Sqlx(err)
}

/// Postgres-backed `LocalStore`
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LocalStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(map_sqlx)?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn get_organization(&self, id: Uuid) -> Result<Option<Organization>, StoreError> {
        let row: Option<OrganizationRow> =
            sqlx::query_as(&format!("SELECT {} FROM organizations WHERE id = $1", ORG_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(Organization::try_from).transpose()
    }

    async fn find_organization_by_remote_id(&self, remote_id: &str) -> Result<Option<Organization>, StoreError> {
        let row: Option<OrganizationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE remote_id = $1 AND deleted_at IS NULL",
            ORG_COLUMNS
        ))
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(Organization::try_from).transpose()
    }

    async fn find_organization_node(&self, remote_id: &str) -> Result<Option<OrgNode>, StoreError> {
        let row: Option<OrgNodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE remote_id = $1 AND deleted_at IS NULL",
            NODE_COLUMNS
        ))
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(OrgNode::try_from).transpose()
    }

    async fn list_organization_nodes(&self) -> Result<Vec<OrgNode>, StoreError> {
        let rows: Vec<OrgNodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE remote_id IS NOT NULL AND deleted_at IS NULL ORDER BY remote_id",
            NODE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(OrgNode::try_from).collect()
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(row.map(User::from))
    }

    async fn list_users_by_organizations(&self, org_ids: &[String]) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE organization_id = ANY($1) AND deleted_at IS NULL ORDER BY created_at",
            USER_COLUMNS
        ))
        .bind(org_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn get_system(&self, id: Uuid) -> Result<Option<System>, StoreError> {
        sqlx::query_as(&format!("SELECT {} FROM systems WHERE id = $1", SYSTEM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn list_system_ids_by_creators(&self, org_ids: &[String]) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM systems WHERE creator_org_id = ANY($1) AND deleted_at IS NULL")
                .bind(org_ids)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Open Postgres transaction; rolls back on drop
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

impl PgStoreTx {
    async fn execute(&mut self, query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>) -> Result<u64, StoreError> {
        let result = query.execute(&mut *self.tx).await.map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn ensure_remote_id(&mut self, table: &'static str, entity: &'static str, id: Uuid) -> Result<(), StoreError> {
        let existing: Option<(Option<String>,)> = sqlx::query_as(&format!("SELECT remote_id FROM {} WHERE id = $1", table))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        match existing {
            None => Err(StoreError::NotFound(format!("{} {}", entity, id))),
            Some(_) => Err(StoreError::RemoteIdAlreadyAssigned {
                entity,
                id: id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn insert_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        let query = sqlx::query(
            "INSERT INTO organizations (id, remote_id, kind, parent_remote_id, name, description, custom_data, \
             active, suspended_at, suspended_by_org_id, synced_at, sync_error, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(org.id)
        .bind(org.remote_id.clone())
        .bind(org.kind().as_str())
        .bind(org.parent_id().map(str::to_string))
        .bind(org.name.clone())
        .bind(org.description.clone())
        .bind(Json(org.attributes.to_custom_data()))
        .bind(org.active)
        .bind(org.suspended_at)
        .bind(org.suspended_by_org_id.clone())
        .bind(org.synced_at)
        .bind(org.sync_error.clone())
        .bind(org.created_at)
        .bind(org.updated_at)
        .bind(org.deleted_at);
        self.execute(query).await?;
        Ok(())
    }

    async fn update_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE organizations SET name = $2, description = $3, custom_data = $4, updated_at = $5 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(org.id)
        .bind(org.name.clone())
        .bind(org.description.clone())
        .bind(Json(org.attributes.to_custom_data()))
        .bind(org.updated_at);
        if self.execute(query).await? == 0 {
            return Err(StoreError::NotFound(format!("organization {}", org.id)));
        }
        Ok(())
    }

    async fn mark_organization_synced(&mut self, id: Uuid, remote_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE organizations SET remote_id = $2, synced_at = $3, sync_error = NULL \
             WHERE id = $1 AND (remote_id IS NULL OR remote_id = $2)",
        )
        .bind(id)
        .bind(remote_id.to_string())
        .bind(at);
        if self.execute(query).await? == 0 {
            return self.ensure_remote_id("organizations", "organization", id).await;
        }
        Ok(())
    }

    async fn record_organization_sync_error(&mut self, id: Uuid, message: &str) -> Result<(), StoreError> {
        let query = sqlx::query("UPDATE organizations SET sync_error = $2 WHERE id = $1")
            .bind(id)
            .bind(message.to_string());
        self.execute(query).await?;
        Ok(())
    }

    async fn soft_delete_organization(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let query = sqlx::query(
            "UPDATE organizations SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at);
        Ok(self.execute(query).await? > 0)
    }

    async fn suspend_organization(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let query = sqlx::query(
            "UPDATE organizations SET active = FALSE, suspended_at = $2, suspended_by_org_id = NULL, updated_at = $2 \
             WHERE id = $1 AND active AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at);
        Ok(self.execute(query).await? > 0)
    }

    async fn reactivate_organization(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let query = sqlx::query(
            "UPDATE organizations SET active = TRUE, suspended_at = NULL, suspended_by_org_id = NULL, updated_at = NOW() \
             WHERE id = $1 AND NOT active AND deleted_at IS NULL",
        )
        .bind(id);
        Ok(self.execute(query).await? > 0)
    }

    async fn suspend_organizations(&mut self, remote_ids: &[String], by: &str, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = sqlx::query(
            "UPDATE organizations SET active = FALSE, suspended_at = $3, suspended_by_org_id = $2, updated_at = $3 \
             WHERE remote_id = ANY($1) AND active AND deleted_at IS NULL",
        )
        .bind(remote_ids.to_vec())
        .bind(by.to_string())
        .bind(at);
        self.execute(query).await
    }

    async fn reactivate_organizations_suspended_by(&mut self, by: &str) -> Result<u64, StoreError> {
        let query = sqlx::query(
            "UPDATE organizations SET active = TRUE, suspended_at = NULL, suspended_by_org_id = NULL, updated_at = NOW() \
             WHERE suspended_by_org_id = $1 AND deleted_at IS NULL",
        )
        .bind(by.to_string());
        self.execute(query).await
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        let query = sqlx::query(
            "INSERT INTO users (id, remote_id, username, email, name, phone, organization_id, role_ids, custom_data, \
             suspended_at, suspended_by_org_id, synced_at, sync_error, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(user.id)
        .bind(user.remote_id.clone())
        .bind(user.username.clone())
        .bind(user.email.clone())
        .bind(user.name.clone())
        .bind(user.phone.clone())
        .bind(user.organization_id.clone())
        .bind(user.role_ids.clone())
        .bind(Json(user.custom_data.clone()))
        .bind(user.suspended_at)
        .bind(user.suspended_by_org_id.clone())
        .bind(user.synced_at)
        .bind(user.sync_error.clone())
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.deleted_at);
        self.execute(query).await?;
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE users SET name = $2, email = $3, phone = $4, custom_data = $5, updated_at = $6 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user.id)
        .bind(user.name.clone())
        .bind(user.email.clone())
        .bind(user.phone.clone())
        .bind(Json(user.custom_data.clone()))
        .bind(user.updated_at);
        if self.execute(query).await? == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    async fn mark_user_synced(&mut self, id: Uuid, remote_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let query = sqlx::query(
            "UPDATE users SET remote_id = $2, synced_at = $3, sync_error = NULL \
             WHERE id = $1 AND (remote_id IS NULL OR remote_id = $2)",
        )
        .bind(id)
        .bind(remote_id.to_string())
        .bind(at);
        if self.execute(query).await? == 0 {
            return self.ensure_remote_id("users", "user", id).await;
        }
        Ok(())
    }

    async fn record_user_sync_error(&mut self, id: Uuid, message: &str) -> Result<(), StoreError> {
        let query = sqlx::query("UPDATE users SET sync_error = $2 WHERE id = $1")
            .bind(id)
            .bind(message.to_string());
        self.execute(query).await?;
        Ok(())
    }

    async fn soft_delete_user(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let query = sqlx::query("UPDATE users SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .bind(at);
        Ok(self.execute(query).await? > 0)
    }

    async fn set_user_suspended(&mut self, id: Uuid, at: Option<DateTime<Utc>>) -> Result<bool, StoreError> {
        let query = sqlx::query(
            "UPDATE users SET suspended_at = $2, suspended_by_org_id = NULL, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at);
        Ok(self.execute(query).await? > 0)
    }

    async fn suspend_users(&mut self, org_ids: &[String], by: &str, at: DateTime<Utc>) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET suspended_at = $3, suspended_by_org_id = $2, updated_at = $3 \
             WHERE organization_id = ANY($1) AND suspended_at IS NULL AND deleted_at IS NULL \
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(org_ids.to_vec())
        .bind(by.to_string())
        .bind(at)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn reactivate_users_suspended_by(&mut self, by: &str) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET suspended_at = NULL, suspended_by_org_id = NULL, updated_at = NOW() \
             WHERE suspended_by_org_id = $1 AND deleted_at IS NULL \
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(by.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn insert_system(&mut self, system: &System) -> Result<(), StoreError> {
        let query = sqlx::query(
            "INSERT INTO systems (id, name, system_type, creator_org_id, secret_hash, suspended_at, \
             suspended_by_org_id, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(system.id)
        .bind(system.name.clone())
        .bind(system.system_type.clone())
        .bind(system.creator_org_id.clone())
        .bind(system.secret_hash.clone())
        .bind(system.suspended_at)
        .bind(system.suspended_by_org_id.clone())
        .bind(system.created_at)
        .bind(system.updated_at)
        .bind(system.deleted_at);
        self.execute(query).await?;
        Ok(())
    }

    async fn soft_delete_system(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let query = sqlx::query("UPDATE systems SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .bind(at);
        Ok(self.execute(query).await? > 0)
    }

    async fn soft_delete_systems_by_creators(&mut self, org_ids: &[String], at: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = sqlx::query(
            "UPDATE systems SET deleted_at = $2, updated_at = $2 WHERE creator_org_id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(org_ids.to_vec())
        .bind(at);
        self.execute(query).await
    }

    async fn suspend_systems(&mut self, org_ids: &[String], by: &str, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = sqlx::query(
            "UPDATE systems SET suspended_at = $3, suspended_by_org_id = $2, updated_at = $3 \
             WHERE creator_org_id = ANY($1) AND suspended_at IS NULL AND deleted_at IS NULL",
        )
        .bind(org_ids.to_vec())
        .bind(by.to_string())
        .bind(at);
        self.execute(query).await
    }

    async fn reactivate_systems_suspended_by(&mut self, by: &str) -> Result<u64, StoreError> {
        let query = sqlx::query(
            "UPDATE systems SET suspended_at = NULL, suspended_by_org_id = NULL, updated_at = NOW() \
             WHERE suspended_by_org_id = $1 AND deleted_at IS NULL",
        )
        .bind(by.to_string());
        self.execute(query).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx)
    }
}
