use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

/// On-hand quantity of one item at one pharmacy branch.
///
/// `quantity` is only ever changed through [`crate::services::stock_ledger::StockLedger`].
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pharmacy_branch_stock")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub pharmacy_branch_id: i32,
    pub item_id: i32,
    pub quantity: i32,
    /// Unit cost
    pub initial_price: Decimal,
    /// Unit sale price charged on orders
    pub sold_price: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        active_model.last_updated = Set(Utc::now());
        Ok(active_model)
    }
}
