//! Exchange, operator-channel, and news clients.

mod exchange;
mod messenger;
mod news;
mod retry;

pub use exchange::{Exchange, OrderReceipt, RestExchange};
pub use messenger::{Messenger, OperatorCommand};
pub use news::NewsClient;
pub use retry::RetryPolicy;
