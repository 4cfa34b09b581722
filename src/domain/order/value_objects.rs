use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::OrderError;

// ============================================================================
// Order Value Objects
// ============================================================================

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in kilometres (haversine)
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub text: String,
    pub location: Option<GeoPoint>,
}

impl DeliveryAddress {
    pub fn new(text: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            text: text.into(),
            location: Some(location),
        }
    }

    pub fn coordinates(&self) -> Result<GeoPoint, OrderError> {
        match self.location {
            Some(point) if point.is_valid() => Ok(point),
            Some(_) => Err(OrderError::Validation("delivery address has invalid coordinates".into())),
            None => Err(OrderError::Validation("delivery address is missing coordinates".into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cod,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "cod",
            PaymentMethod::Online => "online",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cod" => Ok(PaymentMethod::Cod),
            "online" => Ok(PaymentMethod::Online),
            other => Err(OrderError::Validation(format!(
                "unsupported payment method '{other}', expected 'cod' or 'online'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

/// Status of a single shop's part of an order.
///
/// ```text
/// pending -> preparing -> ready -> out of delivery -> delivered
///    \___________\___________\___________\__________-> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShopOrderStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "preparing")]
    Preparing,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "out of delivery")]
    OutOfDelivery,
    #[serde(rename = "delivered")]
    Delivered,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl ShopOrderStatus {
    pub const ALL: [ShopOrderStatus; 6] = [
        ShopOrderStatus::Pending,
        ShopOrderStatus::Preparing,
        ShopOrderStatus::Ready,
        ShopOrderStatus::OutOfDelivery,
        ShopOrderStatus::Delivered,
        ShopOrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShopOrderStatus::Pending => "pending",
            ShopOrderStatus::Preparing => "preparing",
            ShopOrderStatus::Ready => "ready",
            ShopOrderStatus::OutOfDelivery => "out of delivery",
            ShopOrderStatus::Delivered => "delivered",
            ShopOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ShopOrderStatus::Delivered | ShopOrderStatus::Cancelled)
    }

    /// True iff `self -> next` is an edge of the transition graph
    pub fn can_transition_to(self, next: ShopOrderStatus) -> bool {
        use ShopOrderStatus::*;

        matches!(
            (self, next),
            (Pending, Preparing)
                | (Preparing, Ready)
                | (Ready, OutOfDelivery)
                | (OutOfDelivery, Delivered)
                | (Pending | Preparing | Ready | OutOfDelivery, Cancelled)
        )
    }
}

impl fmt::Display for ShopOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShopOrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| OrderError::Validation(format!("unknown order status '{wanted}'")))
    }
}

/// One line of the customer's cart at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub shop_id: Uuid,
    pub item_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
}

/// Item as snapshotted onto a shop order; never changes after placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopOrderItem {
    pub item_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
}

impl ShopOrderItem {
    /// `None` when the amount does not fit in a `Decimal`
    pub fn line_total(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.quantity))
    }
}

impl From<&CartItem> for ShopOrderItem {
    fn from(item: &CartItem) -> Self {
        Self {
            item_id: item.item_id,
            name: item.name.clone(),
            price: item.price,
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRating {
    pub stars: u8,
    pub review: Option<String>,
    pub rated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Customer,
    Owner,
    DeliveryPartner,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&ShopOrderStatus::OutOfDelivery).unwrap();
        assert_eq!(json, "\"out of delivery\"");

        let parsed: ShopOrderStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(parsed, ShopOrderStatus::Cancelled);
        assert_eq!("Out Of Delivery".parse::<ShopOrderStatus>().unwrap(), ShopOrderStatus::OutOfDelivery);
    }

    #[test]
    fn test_graph_has_eight_edges_and_terminals_have_none() {
        let edges = ShopOrderStatus::ALL
            .iter()
            .flat_map(|from| ShopOrderStatus::ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .count();
        assert_eq!(edges, 8);

        for to in ShopOrderStatus::ALL {
            assert!(!ShopOrderStatus::Delivered.can_transition_to(to));
            assert!(!ShopOrderStatus::Cancelled.can_transition_to(to));
        }
    }

    #[test]
    fn test_payment_method_parsing() {
        assert_eq!("cod".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cod);
        assert_eq!(" ONLINE ".parse::<PaymentMethod>().unwrap(), PaymentMethod::Online);
        assert!(matches!("card".parse::<PaymentMethod>(), Err(OrderError::Validation(_))));
    }

    #[test]
    fn test_haversine_distance() {
        let delhi = GeoPoint::new(28.6139, 77.2090);
        let mumbai = GeoPoint::new(19.0760, 72.8777);
        let km = delhi.distance_km(&mumbai);
        assert!((1100.0..1200.0).contains(&km), "got {km}");

        let a = GeoPoint::new(12.9716, 77.5946);
        let b = GeoPoint::new(12.9816, 77.5946);
        assert!((a.distance_km(&b) - 1.112).abs() < 0.01);
        assert_eq!(a.distance_km(&a), 0.0);
    }

    #[test]
    fn test_address_requires_coordinates() {
        let missing = DeliveryAddress { text: "12 MG Road".into(), location: None };
        assert!(matches!(missing.coordinates(), Err(OrderError::Validation(_))));

        let bogus = DeliveryAddress::new("nowhere", GeoPoint::new(120.0, 0.0));
        assert!(bogus.coordinates().is_err());
    }

    #[test]
    fn test_line_total() {
        let item = ShopOrderItem {
            item_id: Uuid::new_v4(),
            name: "Paneer Tikka".into(),
            price: Decimal::new(12050, 2),
            quantity: 2,
        };
        assert_eq!(item.line_total(), Some(Decimal::new(24100, 2)));

        let absurd = ShopOrderItem {
            price: Decimal::MAX,
            ..item
        };
        assert_eq!(absurd.line_total(), None);
    }
}
