pub mod delivery;
pub mod medicine;
pub mod order;
pub mod order_item;
pub mod reservation;
pub mod stock_entry;
