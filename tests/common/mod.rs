#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::Decimal;
use uuid::Uuid;

use delivery_orders::config::ServiceConfig;
use delivery_orders::domain::assignment::InMemoryPartnerDirectory;
use delivery_orders::domain::order::{
    CartItem, DeliveryAddress, GeoPoint, InMemoryShopDirectory, Order, PlaceOrder, ShopOrder, ShopOrderStatus,
    ShopProfile,
};
use delivery_orders::metrics::Metrics;
use delivery_orders::notify::{Handoff, InMemoryNotifier, Mailer, Notifier};
use delivery_orders::store::InMemoryOrderStore;
use delivery_orders::utils::{Clock, ManualClock};
use delivery_orders::{Collaborators, OrderService};

/// Keeps every hand-off so tests can read the OTP the customer received.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Handoff>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Handoff> {
        self.sent.lock().unwrap().clone()
    }

    /// Most recent code handed to the customer for `shop_order_id`
    pub fn last_code(&self, shop_order_id: Uuid) -> Option<String> {
        self.sent().into_iter().rev().find_map(|handoff| match handoff {
            Handoff::DeliveryOtp {
                shop_order_id: id,
                code,
                ..
            } if id == shop_order_id => Some(code),
            _ => None,
        })
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, handoff: &Handoff) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(handoff.clone());
        Ok(())
    }
}

pub struct Harness {
    pub service: OrderService,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<InMemoryNotifier>,
    pub mailer: Arc<RecordingMailer>,
    pub partners: Arc<InMemoryPartnerDirectory>,
    pub metrics: Arc<Metrics>,
    pub shop_a: ShopProfile,
    pub shop_b: ShopProfile,
    pub customer: Uuid,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_notifier(None).await
    }

    /// Same wiring, but realtime events go to `notifier` instead
    pub async fn with_notifier(notifier: Option<Arc<dyn Notifier>>) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let local = Arc::new(InMemoryNotifier::new());
        let mailer = Arc::new(RecordingMailer::default());
        let partners = Arc::new(InMemoryPartnerDirectory::new());
        let metrics = Arc::new(Metrics::new().unwrap());

        let shops = Arc::new(InMemoryShopDirectory::new());
        let shop_a = ShopProfile {
            id: Uuid::new_v4(),
            name: "Shop A".into(),
            owner_id: Uuid::new_v4(),
            location: GeoPoint::new(12.9716, 77.5946),
        };
        let shop_b = ShopProfile {
            id: Uuid::new_v4(),
            name: "Shop B".into(),
            owner_id: Uuid::new_v4(),
            location: GeoPoint::new(12.9352, 77.6245),
        };
        shops.register(shop_a.clone()).await;
        shops.register(shop_b.clone()).await;

        let service = OrderService::new(
            Collaborators {
                store: Arc::new(InMemoryOrderStore::new()),
                shops,
                partners: partners.clone(),
                notifier: notifier.unwrap_or_else(|| local.clone() as Arc<dyn Notifier>),
                mailer: mailer.clone(),
                clock: clock.clone(),
                metrics: metrics.clone(),
            },
            &ServiceConfig::default(),
        );

        Self {
            service,
            clock,
            notifier: local,
            mailer,
            partners,
            metrics,
            shop_a,
            shop_b,
            customer: Uuid::new_v4(),
        }
    }

    /// An available partner `km_north` kilometres north of shop A
    pub async fn partner_near_a(&self, km_north: f64) -> Uuid {
        let id = Uuid::new_v4();
        let location = GeoPoint::new(self.shop_a.location.lat + km_north / 111.0, self.shop_a.location.lng);
        self.partners.register(id, location, self.clock.now()).await;
        id
    }

    pub fn cart(&self) -> Vec<CartItem> {
        vec![
            item(&self.shop_a, "Paneer roll", 100, 2),
            item(&self.shop_a, "Lassi", 50, 1),
            item(&self.shop_b, "Thali", 200, 1),
        ]
    }

    pub fn request(&self, payment_method: &str) -> PlaceOrder {
        PlaceOrder {
            customer_id: self.customer,
            items: self.cart(),
            delivery_address: DeliveryAddress::new("221B MG Road", GeoPoint::new(12.9750, 77.6060)),
            payment_method: payment_method.into(),
        }
    }

    pub async fn place_cod(&self) -> Order {
        self.service.place_order(self.request("cod")).await.unwrap()
    }

    /// Shop A's shop order moved to ready; an offer goes to nearby partners
    pub async fn ready_shop_order(&self) -> (Order, ShopOrder) {
        let order = self.place_cod().await;
        let id = order.shop_orders[0].id;
        let owner = self.shop_a.owner_id;
        self.service.transition(id, ShopOrderStatus::Preparing, owner, None).await.unwrap();
        let ready = self.service.transition(id, ShopOrderStatus::Ready, owner, None).await.unwrap();
        (order, ready)
    }

    /// Shop A's shop order assigned to `partner` and out for delivery
    pub async fn dispatched_to(&self, partner: Uuid) -> ShopOrder {
        let (_, ready) = self.ready_shop_order().await;
        self.service.accept_assignment(ready.id, partner).await.unwrap();
        self.service
            .transition(ready.id, ShopOrderStatus::OutOfDelivery, self.shop_a.owner_id, None)
            .await
            .unwrap()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

pub fn item(shop: &ShopProfile, name: &str, price: i64, quantity: u32) -> CartItem {
    CartItem {
        shop_id: shop.id,
        item_id: Uuid::new_v4(),
        name: name.into(),
        price: Decimal::new(price, 0),
        quantity,
    }
}
