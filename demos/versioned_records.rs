//! Evolving a stored event shape with migrators.
//!
//! Events written as `PriceSet` (a float in dollars) are read back as
//! `PriceSet.v2` (integer cents with a currency) without rewriting storage.
//!
//! Run with: `cargo run --example versioned_records`

use std::sync::Arc;

use annals::{
    AggregateRoot, AggregateService, Apply, Migrator, RecordRegistry, store::inmemory,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

// ANCHOR: shapes
#[derive(Clone, Debug, Serialize, Deserialize, annals::Payload)]
#[payload(name = "PriceSet")]
pub struct PriceSetV1 {
    pub dollars: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, annals::Payload)]
#[payload(name = "PriceSet.v2")]
pub struct PriceSet {
    pub cents: i64,
    pub currency: String,
}
// ANCHOR_END: shapes

// ANCHOR: migrator
pub struct DollarsToCents;

impl Migrator for DollarsToCents {
    type Source = PriceSetV1;
    type Target = PriceSet;

    fn migrate(source: PriceSetV1) -> PriceSet {
        #[allow(clippy::cast_possible_truncation)]
        let cents = (source.dollars * 100.0).round() as i64;
        PriceSet {
            cents,
            currency: "USD".to_string(),
        }
    }
}
// ANCHOR_END: migrator

/// The product as the first release wrote it.
#[derive(Default, annals::Aggregate)]
#[aggregate(name = "Product", error = String, events(PriceSetV1))]
pub struct ProductV1;

impl Apply<PriceSetV1> for ProductV1 {
    fn apply(&mut self, _event: &PriceSetV1) {}
}

#[derive(Debug, Default, annals::Aggregate)]
#[aggregate(error = String, events(PriceSet))]
pub struct Product {
    cents: i64,
    currency: String,
    changes: u32,
}

impl Apply<PriceSet> for Product {
    fn apply(&mut self, event: &PriceSet) {
        self.cents = event.cents;
        self.currency.clone_from(&event.currency);
        self.changes += 1;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("annals_core=info")),
        )
        .init();

    let store = inmemory::Store::new();

    // Yesterday's deployment.
    let old = AggregateService::new(store.clone());
    let mut legacy = AggregateRoot::<ProductV1>::create();
    legacy
        .record(PriceSetV1 { dollars: 9.99 })
        .record(PriceSetV1 { dollars: 12.5 });
    old.persist(&mut legacy).await?;

    // Today's deployment reads the same rows through the migrator.
    let registry = RecordRegistry::builder()
        .aggregate::<Product>()
        .migrator::<DollarsToCents>()
        .build()?;
    let service = AggregateService::new(store).with_registry(Arc::new(registry));

    let mut product = service
        .rehydrate::<Product>(legacy.partition_id(), legacy.id())
        .await?
        .ok_or("product not found")?;
    println!(
        "migrated price: {} {} after {} changes",
        product.state().cents,
        product.state().currency,
        product.state().changes
    );
    assert_eq!(product.state().cents, 1250);

    product.record(PriceSet {
        cents: 1399,
        currency: "EUR".to_string(),
    });
    service.persist(&mut product).await?;
    println!("stream now holds {} events in mixed shapes", product.version());

    Ok(())
}
