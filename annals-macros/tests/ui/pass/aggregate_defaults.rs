use annals::{Aggregate, Apply, NoSnapshot, Payload, PayloadSet};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, Payload)]
pub struct FundsDeposited {
    pub amount: i64,
}

#[derive(Clone, Serialize, Deserialize, Payload)]
pub struct FundsWithdrawn {
    pub amount: i64,
}

#[derive(Default, Aggregate)]
#[aggregate(error = String, events(FundsDeposited, FundsWithdrawn))]
pub struct Account {
    balance: i64,
}

impl Apply<FundsDeposited> for Account {
    fn apply(&mut self, event: &FundsDeposited) {
        self.balance += event.amount;
    }
}

impl Apply<FundsWithdrawn> for Account {
    fn apply(&mut self, event: &FundsWithdrawn) {
        self.balance -= event.amount;
    }
}

fn main() {
    assert_eq!(<Account as Aggregate>::TYPE, "Account");
    assert_eq!(<Account as Aggregate>::SNAPSHOT_INTERVAL, 0);
    assert_eq!(AccountEvent::TYPES, &["FundsDeposited", "FundsWithdrawn"]);

    let event: AccountEvent = FundsDeposited { amount: 3 }.into();
    assert_eq!(event.record_type(), "FundsDeposited");

    let _: <Account as Aggregate>::Snapshot = NoSnapshot;
}
