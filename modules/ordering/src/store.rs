//! Typed storage access for the ordering module.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Select,
};
use tracing::debug;
use uuid::Uuid;

use crm_db::{DbHandle, StorageContract};

use crate::entity::{OrderStatus, order, order_line};

/// Line item for [`OrderingStore::create_order`].
#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

/// Storage contract of the ordering module.
///
/// Bound to whichever connection the resolver picked for
/// [`crate::CONNECTION`]; all queries run against that handle.
pub struct OrderingStore {
    db: Arc<DbHandle>,
}

impl StorageContract for OrderingStore {
    const MODULE: &'static str = crate::MODULE;
    const CONNECTION: &'static str = crate::CONNECTION;

    fn bind(db: Arc<DbHandle>) -> Self {
        Self { db }
    }
}

impl OrderingStore {
    /// The handle this store is bound to.
    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Typed query entry point over orders.
    pub fn orders(&self) -> Select<order::Entity> {
        order::Entity::find()
    }

    /// Typed query entry point over order lines.
    pub fn order_lines(&self) -> Select<order_line::Entity> {
        order_line::Entity::find()
    }

    /// Insert an order together with its lines in one unit of work.
    ///
    /// The order total is derived from the lines. Either everything lands
    /// or nothing does.
    ///
    /// # Errors
    /// Returns an error if any of the inserts fail.
    pub async fn create_order(
        &self,
        tenant_id: Uuid,
        customer_name: &str,
        lines: Vec<NewOrderLine>,
    ) -> crm_db::Result<order::Model> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let total_cents: i64 = lines
            .iter()
            .map(|l| i64::from(l.quantity) * l.unit_price_cents)
            .sum();

        let order_am = order::ActiveModel {
            id: Set(order_id),
            tenant_id: Set(tenant_id),
            customer_name: Set(customer_name.to_owned()),
            status: Set(OrderStatus::Placed.into()),
            total_cents: Set(total_cents),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let line_ams: Vec<order_line::ActiveModel> = lines
            .into_iter()
            .map(|l| order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(tenant_id),
                order_id: Set(order_id),
                product_id: Set(l.product_id),
                quantity: Set(l.quantity),
                unit_price_cents: Set(l.unit_price_cents),
                created_at: Set(now),
                updated_at: Set(now),
            })
            .collect();

        let model = self
            .db
            .with_tx(move |tx| {
                Box::pin(async move {
                    let model = order_am.insert(tx).await?;
                    for am in line_ams {
                        am.insert(tx).await?;
                    }
                    Ok(model)
                })
            })
            .await?;

        debug!(order_id = %model.id, total_cents, "order created");
        Ok(model)
    }

    /// Fetch one order scoped to a tenant.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_order(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> crm_db::Result<Option<order::Model>> {
        Ok(order::Entity::find_by_id(id)
            .filter(order::Column::TenantId.eq(tenant_id))
            .one(self.db.conn())
            .await?)
    }

    /// All orders of a tenant, newest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn list_orders(&self, tenant_id: Uuid) -> crm_db::Result<Vec<order::Model>> {
        Ok(order::Entity::find()
            .filter(order::Column::TenantId.eq(tenant_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(self.db.conn())
            .await?)
    }

    /// Lines of one order, scoped to a tenant.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn lines_of(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> crm_db::Result<Vec<order_line::Model>> {
        Ok(order_line::Entity::find()
            .filter(order_line::Column::TenantId.eq(tenant_id))
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(self.db.conn())
            .await?)
    }

    /// Move an order to a new status.
    ///
    /// # Errors
    /// Returns an error if the order does not exist or the update fails.
    pub async fn set_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: OrderStatus,
    ) -> crm_db::Result<order::Model> {
        self.db
            .with_tx(move |tx| {
                Box::pin(async move {
                    let found = order::Entity::find_by_id(id)
                        .filter(order::Column::TenantId.eq(tenant_id))
                        .one(tx)
                        .await?;
                    let Some(model) = found else {
                        return Err(DbErr::RecordNotFound(format!("order {id} not found")).into());
                    };
                    let mut am: order::ActiveModel = model.into();
                    am.status = Set(status.into());
                    am.updated_at = Set(Utc::now());
                    Ok(am.update(tx).await?)
                })
            })
            .await
    }
}
