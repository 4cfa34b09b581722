use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::OrderError;
use super::value_objects::{CartItem, DeliveryAddress, PaymentMethod, ShopOrderStatus};
use crate::domain::otp::OtpDraft;

// ============================================================================
// Shop Order Commands
// ============================================================================
//
// Commands carry their own timestamps and OTP material so that
// `ShopOrder::handle_command` is a pure decision.
//
// ============================================================================

#[derive(Debug, Clone)]
pub enum ShopOrderCommand {
    ChangeStatus {
        to: ShopOrderStatus,
        actor_id: Uuid,
        reason: Option<String>,
        /// Required when `to` is out of delivery
        otp: Option<OtpDraft>,
        at: DateTime<Utc>,
    },
    AcceptAssignment {
        partner_id: Uuid,
        at: DateTime<Utc>,
    },
    IssueOtp {
        actor_id: Uuid,
        otp: OtpDraft,
    },
    VerifyOtp {
        actor_id: Uuid,
        code: String,
        at: DateTime<Utc>,
    },
    /// Online payment for the parent order went through
    SettlePayment {
        at: DateTime<Utc>,
    },
}

impl ShopOrderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ShopOrderCommand::ChangeStatus { .. } => "change_status",
            ShopOrderCommand::AcceptAssignment { .. } => "accept_assignment",
            ShopOrderCommand::IssueOtp { .. } => "issue_otp",
            ShopOrderCommand::VerifyOtp { .. } => "verify_otp",
            ShopOrderCommand::SettlePayment { .. } => "settle_payment",
        }
    }
}

/// Largest accepted unit price
pub const MAX_ITEM_PRICE: i64 = 1_000_000;

/// Checkout request. Creates the order and its shop orders in one write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub customer_id: Uuid,
    pub items: Vec<CartItem>,
    pub delivery_address: DeliveryAddress,
    /// `cod` or `online`
    pub payment_method: String,
}

impl PlaceOrder {
    pub fn validate(&self) -> Result<PaymentMethod, OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::Validation("cart is empty".into()));
        }

        for item in &self.items {
            if item.quantity == 0 {
                return Err(OrderError::Validation(format!("item '{}' has zero quantity", item.name)));
            }
            if item.price < Decimal::ZERO {
                return Err(OrderError::Validation(format!("item '{}' has a negative price", item.name)));
            }
            if item.price > Decimal::from(MAX_ITEM_PRICE) {
                return Err(OrderError::Validation(format!(
                    "item '{}' costs more than {MAX_ITEM_PRICE}",
                    item.name
                )));
            }
        }

        self.delivery_address.coordinates()?;
        self.payment_method.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::GeoPoint;

    fn request(items: Vec<CartItem>, payment_method: &str) -> PlaceOrder {
        PlaceOrder {
            customer_id: Uuid::new_v4(),
            items,
            delivery_address: DeliveryAddress::new("4 Park Street", GeoPoint::new(22.55, 88.35)),
            payment_method: payment_method.into(),
        }
    }

    fn item(quantity: u32, price: i64) -> CartItem {
        CartItem {
            shop_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            name: "Masala Dosa".into(),
            price: Decimal::new(price, 0),
            quantity,
        }
    }

    #[test]
    fn test_validation_rules() {
        assert!(matches!(request(vec![], "cod").validate(), Err(OrderError::Validation(_))));
        assert!(matches!(request(vec![item(0, 10)], "cod").validate(), Err(OrderError::Validation(_))));
        assert!(matches!(request(vec![item(1, -1)], "cod").validate(), Err(OrderError::Validation(_))));
        assert!(matches!(request(vec![item(1, 10)], "upi").validate(), Err(OrderError::Validation(_))));
        assert_eq!(request(vec![item(1, 10)], "online").validate().unwrap(), PaymentMethod::Online);

        assert!(matches!(
            request(vec![item(1, MAX_ITEM_PRICE + 1)], "cod").validate(),
            Err(OrderError::Validation(_))
        ));
        assert!(request(vec![item(1, MAX_ITEM_PRICE)], "cod").validate().is_ok());

        let mut no_coords = request(vec![item(1, 10)], "cod");
        no_coords.delivery_address.location = None;
        assert!(matches!(no_coords.validate(), Err(OrderError::Validation(_))));
    }

    #[test]
    fn test_decimal_max_price_is_rejected() {
        let mut huge = item(2, 1);
        huge.price = Decimal::MAX;
        assert!(matches!(request(vec![huge], "cod").validate(), Err(OrderError::Validation(_))));
    }
}
