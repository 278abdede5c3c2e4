//! Demo data for running without the remote user and product services.

use domain::{Money, Product, ProductId, Role, User, UserId};
use saga::{InMemoryCatalog, InMemoryUserDirectory};

pub const DEMO_CLIENT_ID: i64 = 1;
pub const DEMO_ADMIN_ID: i64 = 2;

pub async fn seed_users(users: &InMemoryUserDirectory) {
    users
        .insert(User::new(
            UserId::new(DEMO_CLIENT_ID),
            "Demo Client",
            "client@example.com",
            Role::Client,
        ))
        .await;
    users
        .insert(User::new(
            UserId::new(DEMO_ADMIN_ID),
            "Demo Admin",
            "admin@example.com",
            Role::Admin,
        ))
        .await;
}

pub async fn seed_catalog(catalog: &InMemoryCatalog) {
    let products = [
        (1, "Mechanical Keyboard", 34990, 25),
        (2, "Wireless Mouse", 5000, 100),
        (3, "27\" Monitor", 149900, 5),
    ];
    for (id, name, cents, stock) in products {
        catalog
            .insert(Product::new(ProductId::new(id), name, Money::from_cents(cents), stock))
            .await;
    }
    tracing::debug!(products = products.len(), "demo catalog seeded");
}
