mod job;
mod order;
mod payment;
mod receipt;
mod webhook;

pub use job::{CloudStorageLog, DeliveryStatus, EmailLog, Job, JobLog, JobStatus};
pub use order::{CreateOrder, Order, OrderItem, OrderStatus, Store, User};
pub use payment::{PaymentTransaction, TransactionStatus};
pub use receipt::{format_receipt_number, parse_receipt_number, Receipt, ReceiptStatus};
pub use webhook::{
    PaymentDisposition, PaymentNotification, WebhookLog, WebhookOutcome, WebhookResponse,
    WebhookResultType,
};
