pub mod classifier;
pub mod element;
pub mod gateway;
pub mod provider;
pub mod settlement;

pub use classifier::{classify, ErrorCategory, ErrorSeverity, FailureContext, PaymentError};
pub use element::{ElementPhase, PaymentElementController};
pub use gateway::{CartPaymentMapping, PaymentAuthorization, PaymentIntentGateway};
pub use settlement::{SettlementResult, SettlementRetryEngine};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transient record of the last successful settlement, cached for the
/// confirmation view. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub order_id: Uuid,
    pub order_code: String,
    pub amount: Decimal,
    pub currency: String,
    pub completed_at: DateTime<Utc>,
}
