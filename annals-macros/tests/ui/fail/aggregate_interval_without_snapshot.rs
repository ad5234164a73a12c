#[derive(Default, annals::Aggregate)]
#[aggregate(error = String, events(StockReceived), snapshot_interval = 10)]
pub struct Inventory;

fn main() {}
