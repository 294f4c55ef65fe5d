//! Order Model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order processing status
///
/// `PROCESSED` and `INVALID` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// Parse the value stored in the `orders.status` column
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(OrderStatus::New),
            "PROCESSING" => Some(OrderStatus::Processing),
            "INVALID" => Some(OrderStatus::Invalid),
            "PROCESSED" => Some(OrderStatus::Processed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uploaded order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub number: String,
    pub status: OrderStatus,
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
}

/// Order as returned by `GET /api/user/orders`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let accrual = (order.status == OrderStatus::Processed).then_some(order.accrual);
        Self {
            number: order.number,
            status: order.status,
            accrual,
            uploaded_at: order.uploaded_at,
        }
    }
}

// =============================================================================
// Accrual system
// =============================================================================

/// Status reported by the external accrual system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Body of `GET /api/orders/{number}` on the accrual system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

/// Accrual answer mapped onto the order lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualResult {
    pub number: String,
    pub status: OrderStatus,
    pub accrual: Decimal,
}

impl From<AccrualResponse> for AccrualResult {
    fn from(resp: AccrualResponse) -> Self {
        let status = OrderStatus::from(resp.status);
        // Only a processed order carries points
        let accrual = match status {
            OrderStatus::Processed => resp.accrual.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        };
        Self {
            number: resp.order,
            status,
            accrual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_db_roundtrip() {
        for status in [
            OrderStatus::New,
            OrderStatus::Processing,
            OrderStatus::Invalid,
            OrderStatus::Processed,
        ] {
            assert_eq!(OrderStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::from_db("DONE"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(OrderStatus::Processed.is_terminal());
    }

    #[test]
    fn test_accrual_status_mapping() {
        assert_eq!(OrderStatus::from(AccrualStatus::Registered), OrderStatus::Processing);
        assert_eq!(OrderStatus::from(AccrualStatus::Processing), OrderStatus::Processing);
        assert_eq!(OrderStatus::from(AccrualStatus::Invalid), OrderStatus::Invalid);
        assert_eq!(OrderStatus::from(AccrualStatus::Processed), OrderStatus::Processed);
    }

    #[test]
    fn test_accrual_response_decoding() {
        let resp: AccrualResponse = serde_json::from_str(
            r#"{"order":"4561261212345467","status":"PROCESSED","accrual":500}"#,
        )
        .unwrap();
        let result = AccrualResult::from(resp);
        assert_eq!(result.status, OrderStatus::Processed);
        assert_eq!(result.accrual, Decimal::new(500, 0));

        let resp: AccrualResponse =
            serde_json::from_str(r#"{"order":"79927398713","status":"REGISTERED"}"#).unwrap();
        let result = AccrualResult::from(resp);
        assert_eq!(result.status, OrderStatus::Processing);
        assert_eq!(result.accrual, Decimal::ZERO);
    }

    #[test]
    fn test_order_response_hides_accrual_until_processed() {
        let order = Order {
            id: 1,
            user_id: 1,
            number: "79927398713".into(),
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            uploaded_at: Utc::now(),
        };
        let json = serde_json::to_string(&OrderResponse::from(order.clone())).unwrap();
        assert!(json.contains("\"status\":\"NEW\""));
        assert!(!json.contains("accrual"));

        let processed = Order {
            status: OrderStatus::Processed,
            accrual: Decimal::new(72998, 2),
            ..order
        };
        let json = serde_json::to_string(&OrderResponse::from(processed)).unwrap();
        assert!(json.contains("\"accrual\":729.98"));
    }
}
