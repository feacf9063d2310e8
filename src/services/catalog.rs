use sea_orm::EntityTrait;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::{
    db::DbPool,
    entities::product::Entity as Product,
    errors::ServiceError,
};

/// An item as requested by the client: id and quantity only. Any price the
/// client may have sent is discarded before this point.
#[derive(Clone, Debug)]
pub struct RequestedItem {
    pub product_id: String,
    pub quantity: i32,
}

/// A requested item with its authoritative catalog price attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLineItem {
    pub product_id: String,
    pub title: String,
    pub unit_price: i64,
    pub quantity: i32,
}

/// Resolves authoritative prices from the catalog store. This is the total-price
/// safeguard: a compromised or buggy client cannot set its own prices.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Resolves every requested item or fails the whole request. Items that do
    /// not resolve (unknown id, inactive product) produce a validation error
    /// naming the offending id; no partial orders.
    #[instrument(skip(self, requested), fields(item_count = requested.len()))]
    pub async fn resolve_items(
        &self,
        requested: &[RequestedItem],
    ) -> Result<Vec<ResolvedLineItem>, ServiceError> {
        if requested.is_empty() {
            return Err(ServiceError::ValidationError(
                "order must contain at least one item".to_string(),
            ));
        }

        let mut resolved = Vec::with_capacity(requested.len());
        for item in requested {
            if item.quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "quantity for product '{}' must be at least 1",
                    item.product_id
                )));
            }

            let product = Product::find_by_id(item.product_id.clone())
                .one(&*self.db)
                .await?;

            let product = match product {
                Some(p) if p.is_active => p,
                _ => {
                    warn!(product_id = %item.product_id, "requested product did not resolve");
                    return Err(ServiceError::ValidationError(format!(
                        "unknown or unavailable product: {}",
                        item.product_id
                    )));
                }
            };

            resolved.push(ResolvedLineItem {
                product_id: product.id,
                title: product.name,
                unit_price: product.price,
                quantity: item.quantity,
            });
        }

        Ok(resolved)
    }
}
