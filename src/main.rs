use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use tokio::{signal, sync::mpsc};
use tower_http::{compression::CompressionLayer, cors::CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use nursery_api as api;
use api::{
    entities::commerce::{coupon, product, product_variant, DiscountType},
    repositories::{CommerceStore, InMemoryStore, SeaOrmStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);
    api::handlers::health::init_start_time();

    let in_memory = std::env::args().any(|arg| arg == "--in-memory");

    let (db, store): (Option<Arc<sea_orm::DatabaseConnection>>, Arc<dyn CommerceStore>) =
        if in_memory {
            warn!("Running on the in-memory store; nothing is persisted");
            let store = InMemoryStore::new();
            seed_demo_catalog(&store).await;
            (None, Arc::new(store))
        } else {
            let db_pool = api::db::establish_connection_from_app_config(&cfg)
                .await
                .context("failed to connect to the database")?;
            if cfg.auto_migrate {
                api::db::run_migrations(&db_pool).await.map_err(|e| {
                    error!("Failed running migrations: {}", e);
                    e
                })?;
            }
            let db = Arc::new(db_pool);
            (Some(db.clone()), Arc::new(SeaOrmStore::new(db)))
        };

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    let gateways = Arc::new(
        api::services::payments::PaymentGateways::from_config(&cfg)
            .context("failed to configure payment providers")?,
    );

    let services =
        api::handlers::AppServices::new(store, gateways, event_sender, cfg.pricing());

    let app_state = api::AppState {
        db,
        jwt: Arc::new(api::auth::JwtVerifier::new(&cfg.jwt_secret)),
        config: Arc::new(cfg.clone()),
        services,
    };

    let cors_layer = if cfg.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::permissive()
    };

    let app = api::app_router(app_state)
        .layer(CompressionLayer::new())
        .layer(cors_layer);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    info!("nursery-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// A handful of plants and a coupon so the in-memory mode has something to sell.
async fn seed_demo_catalog(store: &InMemoryStore) {
    let now = Utc::now();
    let plants = [
        ("Monstera Deliciosa", "Medium pot", "MON-M", dec!(599), 25),
        ("Snake Plant", "Small pot", "SNK-S", dec!(249), 40),
        ("Fiddle Leaf Fig", "Large pot", "FIG-L", dec!(1299), 8),
    ];

    for (name, variant_name, sku, price, inventory) in plants {
        let product_id = Uuid::new_v4();
        store
            .insert_product(product::Model {
                id: product_id,
                name: name.to_string(),
                image_url: None,
                created_at: now,
            })
            .await;
        store
            .insert_variant(product_variant::Model {
                id: Uuid::new_v4(),
                product_id,
                sku: sku.to_string(),
                name: variant_name.to_string(),
                price,
                inventory,
                created_at: now,
                updated_at: now,
            })
            .await;
    }

    store
        .insert_coupon(coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            description: Some("10% off".to_string()),
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            min_purchase_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            usage_count: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(365),
            is_active: true,
            created_at: now,
        })
        .await;

    info!(products = plants.len(), "seeded demo catalog");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
