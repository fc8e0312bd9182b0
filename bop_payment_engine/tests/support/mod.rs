use std::sync::Arc;

use bop_payment_engine::{
    db_types::{Product, UserIdentifier},
    events::EventProducers,
    test_utils::{
        fixtures::{ebook, free_sticker, shop_config, tshirt, TestClock},
        prepare_env::{prepare_test_env, random_db_path},
        scripted_processors::ScriptedProcessors,
    },
    CartApi,
    OrderFlowApi,
    PaymentGatewayDatabase,
    ProductManagement,
    RuntimeConfigStore,
    SqliteDatabase,
    StockApi,
};
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};

pub struct Shop {
    pub db: SqliteDatabase,
    pub processors: ScriptedProcessors,
    pub clock: TestClock,
    pub orders: OrderFlowApi<SqliteDatabase, ScriptedProcessors>,
    pub carts: CartApi<SqliteDatabase>,
    pub stock: StockApi<SqliteDatabase>,
}

impl Shop {
    pub async fn open() -> Self {
        Self::open_with_producers(EventProducers::default()).await
    }

    pub async fn open_with_producers(producers: EventProducers) -> Self {
        let url = random_db_path();
        let db = prepare_test_env(&url).await;
        db.save_runtime_config(&shop_config()).await.expect("Error saving runtime config");
        for product in [tshirt(), ebook(), free_sticker()] {
            db.save_product(&product).await.expect("Error saving product");
        }
        let processors = ScriptedProcessors::new();
        let clock = TestClock::default();
        let orders = OrderFlowApi::new(db.clone(), Arc::new(processors.clone()), producers).with_clock(clock.clock());
        let carts = CartApi::new(db.clone()).with_clock(clock.clock());
        let stock = StockApi::new(db.clone());
        Self { db, processors, clock, orders, carts, stock }
    }

    pub async fn product(&self, id: &str) -> Product {
        self.db.fetch_product(&id.into()).await.expect("Error fetching product").expect("Product not found")
    }

    pub async fn close(mut self) {
        let url = self.db.url().to_string();
        if let Err(e) = self.db.close().await {
            error!("🚀️ Failed to close database: {e}");
        }
        Sqlite::drop_database(&url).await.expect("Error dropping database");
    }
}

pub fn alice() -> UserIdentifier {
    UserIdentifier { session_id: Some("alice-session".into()), email: Some("alice@example.com".into()), ..Default::default() }
}

pub fn bob() -> UserIdentifier {
    UserIdentifier::for_session("bob-session")
}
