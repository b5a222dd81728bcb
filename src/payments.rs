pub use self::flow::{PaymentError, PaymentFlow, VerificationError};
pub use self::gateway::{Checkout, GatewayError, PaymentGateway, SettlementStatus};
pub use self::paystack::PaystackClient;

mod flow;
pub mod gateway;
mod paystack;
