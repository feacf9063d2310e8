pub mod catalog;
pub mod gateway;
pub mod notifications;
pub mod order_status;
pub mod orders;
pub mod promos;
