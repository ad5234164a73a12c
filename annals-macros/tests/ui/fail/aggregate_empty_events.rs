#[derive(Default, annals::Aggregate)]
#[aggregate(error = String, events())]
pub struct Inventory;

fn main() {}
