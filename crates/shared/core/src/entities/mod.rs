mod account;
mod fill;
mod intent;
mod order;
mod order_status;
mod order_type;
mod position;
mod side;
mod time_in_force;

pub use account::AccountState;
pub use fill::Fill;
pub use intent::{IntentQuantity, TradeIntent};
pub use order::{BrokerOrderId, Order, OrderId, StatusChange};
pub use order_status::OrderStatus;
pub use order_type::OrderType;
pub use position::Position;
pub use side::Side;
pub use time_in_force::TimeInForce;
