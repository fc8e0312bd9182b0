use bop_payment_engine::{db_types::Product, test_utils::fixtures::eur};
use cucumber::given;

use crate::cucumber::{shop_world::ShopSystem, ShopWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut ShopWorld) {
    let system = ShopSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "a shipped product {word} at {int} EUR with {int} units in stock")]
async fn shipped_product(world: &mut ShopWorld, id: String, price: i64, stock: i64) {
    let product = Product::new(id.as_str(), id.as_str(), eur(price)).with_stock(stock).with_shipping();
    world.system().stock.save_product(&product).await.expect("Error saving product");
}

#[given(expr = "a digital product {word} at {int} EUR")]
async fn digital_product(world: &mut ShopWorld, id: String, price: i64) {
    let product = Product::new(id.as_str(), id.as_str(), eur(price));
    world.system().stock.save_product(&product).await.expect("Error saving product");
}
