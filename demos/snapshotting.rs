//! Snapshots bound replay cost for long streams.
//!
//! Run with: `cargo run --example snapshotting`

use annals::{
    Aggregate, AggregateRoot, AggregateService, Apply, Checkpoint,
    store::{RecordFilter, RecordStore, inmemory},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, annals::Payload)]
pub struct ReadingTaken {
    pub celsius: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, annals::Payload)]
pub struct SensorState {
    pub count: u64,
    pub sum: f64,
}

#[derive(Debug, Default, annals::Aggregate)]
#[aggregate(
    error = String,
    events(ReadingTaken),
    snapshot = SensorState,
    snapshot_interval = 100
)]
pub struct Sensor {
    count: u64,
    sum: f64,
}

impl Sensor {
    fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = self.count as f64;
        self.sum / count
    }
}

impl Apply<ReadingTaken> for Sensor {
    fn apply(&mut self, event: &ReadingTaken) {
        self.count += 1;
        self.sum += event.celsius;
    }
}

impl Checkpoint<SensorState> for Sensor {
    fn checkpoint(&self) -> SensorState {
        SensorState {
            count: self.count,
            sum: self.sum,
        }
    }

    fn restore(&mut self, snapshot: SensorState) {
        self.count = snapshot.count;
        self.sum = snapshot.sum;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("annals_core=info")),
        )
        .init();

    let service = AggregateService::new(inmemory::Store::new());
    let mut sensor = AggregateRoot::<Sensor>::create();
    let start = Utc::now() - Duration::hours(5);

    // Five hourly batches of 50 readings; a snapshot lands every 100.
    for hour in 0..5 {
        let at = start + Duration::hours(hour);
        for minute in 0..50 {
            sensor.record_at(
                ReadingTaken {
                    celsius: 20.0 + f64::from(minute % 5),
                },
                at,
            );
        }
        service.persist(&mut sensor).await?;
    }

    let snapshots = service
        .store()
        .load_snapshots(&RecordFilter::for_aggregate(
            sensor.partition_id(),
            Sensor::TYPE,
            sensor.id(),
        ))
        .await?;
    let indices: Vec<i64> = snapshots.iter().map(|s| s.header.index).collect();
    println!("snapshots at indices {indices:?}");

    let current = service
        .rehydrate::<Sensor>(Uuid::nil(), sensor.id())
        .await?
        .ok_or("sensor not found")?;
    println!(
        "now: {} readings, mean {:.2}",
        current.state().count,
        current.state().mean()
    );

    let earlier = service
        .rehydrate_as_of::<Sensor>(Uuid::nil(), sensor.id(), start + Duration::minutes(90))
        .await?
        .ok_or("sensor not found")?;
    println!("after 90 minutes: {} readings", earlier.state().count);
    assert_eq!(earlier.state().count, 100);

    Ok(())
}
