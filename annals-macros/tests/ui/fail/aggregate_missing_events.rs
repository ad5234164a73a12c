#[derive(Default, annals::Aggregate)]
#[aggregate(error = String)]
pub struct Inventory;

fn main() {}
