use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use delivery_orders::config::{Config, StoreBackend};
use delivery_orders::domain::assignment::InMemoryPartnerDirectory;
use delivery_orders::domain::order::{
    CartItem, DeliveryAddress, GeoPoint, InMemoryShopDirectory, PlaceOrder, ShopOrderStatus, ShopProfile,
};
use delivery_orders::messaging::{RedpandaClient, RedpandaNotifier};
use delivery_orders::metrics::{self, Metrics};
use delivery_orders::notify::{Audience, InMemoryNotifier, Notifier, TracingMailer};
use delivery_orders::store::{InMemoryOrderStore, OrderStore, ScyllaOrderStore};
use delivery_orders::utils::SystemClock;
use delivery_orders::{Collaborators, OrderService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=delivery_orders=trace cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,delivery_orders=debug"))
        )
        .init();

    tracing::info!("🚀 Starting delivery order lifecycle demo");
    let config = Config::load()?;

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        if let Err(e) = system.block_on(metrics::start_metrics_server(metrics_registry, metrics_port)) {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 2. Order store ===
    let store: Arc<dyn OrderStore> = match &config.store {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory order store");
            Arc::new(InMemoryOrderStore::new())
        }
        StoreBackend::Scylla { uri, keyspace } => Arc::new(ScyllaOrderStore::connect(uri, keyspace).await?),
    };

    // === 3. Realtime notifier ===
    let local_notifier = Arc::new(InMemoryNotifier::new());
    let notifier: Arc<dyn Notifier> = match &config.redpanda_brokers {
        Some(brokers) => {
            let client = Arc::new(RedpandaClient::new(brokers, metrics.clone())?);
            Arc::new(RedpandaNotifier::new(client, config.notify_topic.clone()))
        }
        None => {
            tracing::info!("REDPANDA_BROKERS not set, realtime events stay in process");
            local_notifier.clone()
        }
    };

    // === 4. Seed collaborators ===
    let now = Utc::now();
    let shops = Arc::new(InMemoryShopDirectory::new());
    let pizza = ShopProfile {
        id: Uuid::new_v4(),
        name: "Marina Pizza".into(),
        owner_id: Uuid::new_v4(),
        location: GeoPoint::new(13.0500, 80.2824),
    };
    let dosa = ShopProfile {
        id: Uuid::new_v4(),
        name: "Dosa Corner".into(),
        owner_id: Uuid::new_v4(),
        location: GeoPoint::new(13.0418, 80.2341),
    };
    shops.register(pizza.clone()).await;
    shops.register(dosa.clone()).await;

    let partners = Arc::new(InMemoryPartnerDirectory::new());
    let near_partner = Uuid::new_v4();
    let far_partner = Uuid::new_v4();
    partners.register(near_partner, GeoPoint::new(13.0520, 80.2790), now).await;
    partners.register(far_partner, GeoPoint::new(13.0680, 80.2600), now).await;

    let service = OrderService::new(
        Collaborators {
            store,
            shops,
            partners,
            notifier,
            mailer: Arc::new(TracingMailer),
            clock: Arc::new(SystemClock),
            metrics: metrics.clone(),
        },
        &config.service,
    );

    // === 5. Walk one order through its lifecycle ===
    let customer_id = Uuid::new_v4();
    let mut customer_feed = local_notifier.subscribe(Audience::Customer(customer_id)).await;
    tokio::spawn(async move {
        while let Ok(envelope) = customer_feed.recv().await {
            tracing::info!(event = %envelope.event_type, "📱 Customer app received");
        }
    });

    let order = service
        .place_order(PlaceOrder {
            customer_id,
            items: vec![
                cart_item(&pizza, "Margherita", 100, 2),
                cart_item(&pizza, "Garlic bread", 50, 1),
                cart_item(&dosa, "Masala dosa", 200, 1),
            ],
            delivery_address: DeliveryAddress::new("12 Beach Road, Chennai", GeoPoint::new(13.0569, 80.2425)),
            payment_method: "cod".into(),
        })
        .await?;
    tracing::info!("✅ Order placed: {} (total {})", order.id, order.total_amount);

    let pizza_order = order
        .shop_orders
        .iter()
        .find(|so| so.shop_id == pizza.id)
        .map(|so| so.id)
        .ok_or_else(|| anyhow::anyhow!("order has no shop order for {}", pizza.name))?;
    let dosa_order = order
        .shop_orders
        .iter()
        .find(|so| so.shop_id == dosa.id)
        .map(|so| so.id)
        .ok_or_else(|| anyhow::anyhow!("order has no shop order for {}", dosa.name))?;

    service.transition(pizza_order, ShopOrderStatus::Preparing, pizza.owner_id, None).await?;
    service.transition(pizza_order, ShopOrderStatus::Ready, pizza.owner_id, None).await?;

    if let Err(e) = service
        .transition(pizza_order, ShopOrderStatus::OutOfDelivery, pizza.owner_id, None)
        .await
    {
        tracing::info!("⛔ Dispatch before assignment refused: {}", e.user_message());
    }

    service.accept_assignment(pizza_order, near_partner).await?;
    if let Err(e) = service.accept_assignment(pizza_order, far_partner).await {
        tracing::info!("⛔ Second partner: {}", e.user_message());
    }

    let dispatched = service
        .transition(pizza_order, ShopOrderStatus::OutOfDelivery, pizza.owner_id, None)
        .await?;
    service
        .record_partner_location(near_partner, GeoPoint::new(13.0540, 80.2600))
        .await?;

    // The customer reads the code off their phone and tells the partner
    let code = dispatched
        .delivery_otp
        .as_ref()
        .map(|otp| otp.code.clone())
        .ok_or_else(|| anyhow::anyhow!("dispatched shop order has no OTP"))?;
    service.verify_otp(pizza_order, near_partner, &code).await?;
    service.transition(pizza_order, ShopOrderStatus::Delivered, near_partner, None).await?;

    service.cancel(dosa_order, dosa.owner_id, "Out of dosa batter").await?;
    let rated = service
        .rate_order(order.id, customer_id, 5, Some("Hot and on time".into()))
        .await?;
    tracing::info!("⭐ Rating stored: {:?}", rated.rating.map(|r| r.stars));

    let history = service.shop_order_history(pizza_order).await?;
    for envelope in &history {
        tracing::info!(seq = envelope.sequence_number, event = %envelope.event_type, "📜 History");
    }

    tracing::info!("🎉 Demo complete!");
    Ok(())
}

fn cart_item(shop: &ShopProfile, name: &str, price: i64, quantity: u32) -> CartItem {
    CartItem {
        shop_id: shop.id,
        item_id: Uuid::new_v4(),
        name: name.into(),
        price: Decimal::new(price, 0),
        quantity,
    }
}
