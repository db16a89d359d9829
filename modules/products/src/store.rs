//! Typed storage access for the product catalog.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Select,
};
use tracing::debug;
use uuid::Uuid;

use crm_db::{DbHandle, StorageContract};

use crate::entity::product;

/// Storage contract of the products module.
#[derive(Debug)]
pub struct ProductsStore {
    db: Arc<DbHandle>,
}

impl StorageContract for ProductsStore {
    const MODULE: &'static str = crate::MODULE;
    const CONNECTION: &'static str = crate::CONNECTION;

    fn bind(db: Arc<DbHandle>) -> Self {
        Self { db }
    }
}

impl ProductsStore {
    /// The handle this store is bound to.
    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Typed query entry point over products.
    pub fn products(&self) -> Select<product::Entity> {
        product::Entity::find()
    }

    /// Add a product to the catalog.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn add_product(
        &self,
        tenant_id: Uuid,
        name: &str,
        price_cents: i64,
        stock_count: i32,
    ) -> crm_db::Result<product::Model> {
        let now = Utc::now();
        let am = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            name: Set(name.to_owned()),
            price_cents: Set(price_cents),
            stock_count: Set(stock_count),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db.conn()).await?;
        debug!(product_id = %model.id, "product added");
        Ok(model)
    }

    /// Fetch one product scoped to a tenant.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_product(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> crm_db::Result<Option<product::Model>> {
        Ok(product::Entity::find_by_id(id)
            .filter(product::Column::TenantId.eq(tenant_id))
            .one(self.db.conn())
            .await?)
    }

    /// Active catalog entries of a tenant, alphabetically.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_active(&self, tenant_id: Uuid) -> crm_db::Result<Vec<product::Model>> {
        Ok(product::Entity::find()
            .filter(product::Column::TenantId.eq(tenant_id))
            .filter(product::Column::IsActive.eq(true))
            .order_by_asc(product::Column::Name)
            .all(self.db.conn())
            .await?)
    }

    /// Adjust the stock count by a signed delta inside a unit of work.
    ///
    /// # Errors
    /// Returns an error if the product does not exist, the adjustment
    /// would drive the count negative or overflow it, or the update fails.
    pub async fn adjust_stock(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        delta: i32,
    ) -> crm_db::Result<product::Model> {
        self.db
            .with_tx(move |tx| {
                Box::pin(async move {
                    let found = product::Entity::find_by_id(id)
                        .filter(product::Column::TenantId.eq(tenant_id))
                        .one(tx)
                        .await?;
                    let Some(model) = found else {
                        return Err(DbErr::RecordNotFound(format!("product {id} not found")).into());
                    };
                    let next = model
                        .stock_count
                        .checked_add(delta)
                        .filter(|n| *n >= 0)
                        .ok_or_else(|| {
                            DbErr::Custom(format!("stock adjustment out of range for product {id}"))
                        })?;
                    let mut am: product::ActiveModel = model.into();
                    am.stock_count = Set(next);
                    am.updated_at = Set(Utc::now());
                    Ok(am.update(tx).await?)
                })
            })
            .await
    }

    /// Soft-delete: mark a product inactive.
    ///
    /// # Errors
    /// Returns an error if the product does not exist or the update fails.
    pub async fn deactivate(&self, tenant_id: Uuid, id: Uuid) -> crm_db::Result<product::Model> {
        self.db
            .with_tx(move |tx| {
                Box::pin(async move {
                    let found = product::Entity::find_by_id(id)
                        .filter(product::Column::TenantId.eq(tenant_id))
                        .one(tx)
                        .await?;
                    let Some(model) = found else {
                        return Err(DbErr::RecordNotFound(format!("product {id} not found")).into());
                    };
                    let mut am: product::ActiveModel = model.into();
                    am.is_active = Set(false);
                    am.updated_at = Set(Utc::now());
                    Ok(am.update(tx).await?)
                })
            })
            .await
    }
}
