pub mod invoice;
pub mod lifecycle;
pub mod qpay;

pub use invoice::PaymentInvoiceService;
pub use lifecycle::PaymentLifecycleService;
pub use qpay::{PaymentProvider, QPayClient};
