use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        NotificationKind, OrderStatus,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel,
    },
    errors::ServiceError,
    services::catalog::ResolvedLineItem,
};

/// The promo's effect at order-creation time. The discount amount is computed
/// by the caller (via the promo evaluator) before persistence is invoked, so
/// order creation never performs promo-lookup I/O of its own.
#[derive(Clone, Debug)]
pub struct PromoSnapshot {
    pub code: String,
    pub discount: i64,
}

/// Sum of `unit_price × quantity` over resolved line items.
pub fn subtotal(items: &[ResolvedLineItem]) -> i64 {
    items
        .iter()
        .map(|item| item.unit_price * item.quantity as i64)
        .sum()
}

/// Persistence for the order aggregate. All post-creation mutations are
/// narrow, field-scoped conditional updates; the order row is the only
/// mutable shared resource in this subsystem.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Creates an order with its item snapshots in one transaction; on any
    /// failure nothing is persisted.
    #[instrument(skip(self, items, customer, promo), fields(item_count = items.len()))]
    pub async fn create_order(
        &self,
        items: &[ResolvedLineItem],
        customer: serde_json::Value,
        promo: Option<PromoSnapshot>,
    ) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let sub = subtotal(items);
        let discount = promo.as_ref().map(|p| p.discount).unwrap_or(0);
        let amount = (sub - discount).max(0);

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_active_model = OrderActiveModel {
            id: Set(order_id),
            status: Set(OrderStatus::Pending),
            amount: Set(amount),
            customer: Set(customer),
            payment_id: Set(None),
            promo_code: Set(promo.as_ref().map(|p| p.code.clone())),
            promo_discount: Set(promo.as_ref().map(|p| p.discount)),
            payment_success_notified_at: Set(None),
            payment_fail_notified_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let order_model = order_active_model.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        for (position, item) in items.iter().enumerate() {
            let item_active_model = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id.clone()),
                title: Set(item.title.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
                position: Set(position as i32),
            };
            item_active_model.insert(&txn).await.map_err(|e| {
                error!(error = %e, order_id = %order_id, "failed to insert order item");
                ServiceError::DatabaseError(e)
            })?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, amount, discount, "order created");
        Ok(order_model)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    /// Order with its item snapshots in submitted position order.
    pub async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<Option<(OrderModel, Vec<OrderItemModel>)>, ServiceError> {
        let order = match OrderEntity::find_by_id(order_id).one(&*self.db).await? {
            Some(order) => order,
            None => return Ok(None),
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db)
            .await?;

        Ok(Some((order, items)))
    }

    /// Records a freshly initialized payment session: moves the order to
    /// `payment_pending` and stores the gateway payment id. Field-scoped
    /// update, guarded against touching a settled order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn set_payment_pending(
        &self,
        order_id: Uuid,
        payment_id: &str,
    ) -> Result<(), ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::PaymentPending))
            .col_expr(order::Column::PaymentId, Expr::value(payment_id))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in([OrderStatus::Pending, OrderStatus::PaymentPending]))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "order {} can no longer accept a payment session",
                order_id
            )));
        }

        info!(order_id = %order_id, payment_id, "payment session recorded");
        Ok(())
    }

    /// Compare-and-set status transition: applies `to` only if the order is
    /// still in `from`. Returns whether this caller won the update; a `false`
    /// result means a concurrent delivery got there first.
    #[instrument(skip(self), fields(order_id = %order_id, from = %from, to = %to))]
    pub async fn transition_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        payment_id: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(from));

        if let Some(payment_id) = payment_id {
            update = update.col_expr(order::Column::PaymentId, Expr::value(payment_id));
        }

        let result = update.exec(&*self.db).await?;
        let won = result.rows_affected == 1;
        if won {
            info!(order_id = %order_id, %from, %to, "order status transitioned");
        }
        Ok(won)
    }

    /// Atomic check-and-set on a notification idempotency flag:
    /// `UPDATE orders SET flag = now() WHERE id = ? AND flag IS NULL`.
    /// Returns `true` for exactly one caller per order and kind; payment
    /// gateways redeliver webhooks, so a read-then-write would race.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn try_mark_notified(
        &self,
        order_id: Uuid,
        kind: NotificationKind,
    ) -> Result<bool, ServiceError> {
        let flag_column = match kind {
            NotificationKind::PaymentSuccess => order::Column::PaymentSuccessNotifiedAt,
            NotificationKind::PaymentFailed => order::Column::PaymentFailNotifiedAt,
        };

        let result = OrderEntity::update_many()
            .col_expr(flag_column, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order_id))
            .filter(flag_column.is_null())
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }
}
