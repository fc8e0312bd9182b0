use std::{collections::HashMap, sync::Arc, time::Duration};

use bop_payment_engine::{
    db_types::{Order, UserIdentifier},
    events::EventProducers,
    lock::{DistributedLock, Lease},
    test_utils::{
        fixtures::{shop_config, TestClock},
        prepare_env::{create_database, random_db_path, run_migrations},
        scripted_processors::ScriptedProcessors,
    },
    CartApi,
    OrderFlowApi,
    PaymentGatewayError,
    PaymentReconciler,
    RuntimeConfigStore,
    SqliteDatabase,
    StockApi,
};
use cucumber::World;
use log::*;

#[derive(Default, Debug, World)]
pub struct ShopWorld {
    pub system: Option<ShopSystem>,
    /// The latest known state of each customer's order
    pub orders: HashMap<String, Order>,
    pub last_error: Option<PaymentGatewayError>,
}

#[derive(Debug)]
pub struct ShopSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub processors: ScriptedProcessors,
    pub clock: TestClock,
    pub carts: CartApi<SqliteDatabase>,
    pub stock: StockApi<SqliteDatabase>,
    pub reconciler: PaymentReconciler<SqliteDatabase, ScriptedProcessors>,
    pub lease: Lease,
}

impl ShopWorld {
    pub fn system(&self) -> &ShopSystem {
        self.system.as_ref().expect("Shop not initialised")
    }

    pub fn api(&self) -> &OrderFlowApi<SqliteDatabase, ScriptedProcessors> {
        self.system().reconciler.api()
    }

    pub fn order_of(&self, customer: &str) -> &Order {
        self.orders.get(customer).unwrap_or_else(|| panic!("{customer} has not placed an order"))
    }

    /// Reloads the customer's order from the database.
    pub async fn refresh_order(&mut self, customer: &str) -> Order {
        let id = self.order_of(customer).id.clone();
        let order = self.api().fetch_order(&id).await.expect("Error fetching order");
        self.orders.insert(customer.to_string(), order.clone());
        order
    }
}

impl ShopSystem {
    pub async fn new() -> Self {
        let db_path = random_db_path();
        create_database(&db_path).await;
        let db = run_migrations(&db_path).await;
        debug!("🚀️ Created database: {db_path}");
        db.save_runtime_config(&shop_config()).await.expect("Error saving runtime config");
        let processors = ScriptedProcessors::new();
        let clock = TestClock::default();
        let api = OrderFlowApi::new(db.clone(), Arc::new(processors.clone()), EventProducers::default())
            .with_clock(clock.clock());
        let carts = CartApi::new(db.clone()).with_clock(clock.clock());
        let stock = StockApi::new(db.clone());
        let lock = DistributedLock::new(db.clone(), "reconciler", "cucumber", Duration::from_secs(60));
        let lease = lock.acquire().await.expect("Error taking the lock").expect("Reconciler lock is taken");
        let reconciler = PaymentReconciler::new(api);
        Self { db_path, db, processors, clock, carts, stock, reconciler, lease }
    }
}

/// Customers are identified by their session, and are notified at `<name>@example.com`.
pub fn customer(name: &str) -> UserIdentifier {
    UserIdentifier {
        session_id: Some(format!("{name}-session")),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        ..Default::default()
    }
}
