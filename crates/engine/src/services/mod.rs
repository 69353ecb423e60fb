//! External service interfaces.

pub mod payment;

pub use payment::{
    GatewayError, InMemoryPaymentGateway, PaymentGateway, PaymentNotification, PaymentOutcome,
    PaymentRequest,
};
