use annals::{Aggregate, Apply, Checkpoint, Payload};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Payload)]
#[payload(name = "counter.incremented")]
pub struct Incremented;

#[derive(Clone, Serialize, Deserialize, Payload)]
pub struct CounterState {
    pub value: u64,
}

#[derive(Default, Aggregate)]
#[aggregate(
    name = "counter",
    version = "2",
    error = std::convert::Infallible,
    events(Incremented),
    snapshot = CounterState,
    snapshot_interval = 50,
    event_enum = "Change",
    derives(Debug, PartialEq)
)]
pub struct Counter {
    value: u64,
}

impl Apply<Incremented> for Counter {
    fn apply(&mut self, _event: &Incremented) {
        self.value += 1;
    }
}

impl Checkpoint<CounterState> for Counter {
    fn checkpoint(&self) -> CounterState {
        CounterState { value: self.value }
    }

    fn restore(&mut self, snapshot: CounterState) {
        self.value = snapshot.value;
    }
}

fn main() {
    assert_eq!(<Counter as Aggregate>::TYPE, "counter");
    assert_eq!(<Counter as Aggregate>::VERSION, "2");
    assert_eq!(<Counter as Aggregate>::SNAPSHOT_INTERVAL, 50);

    let mut counter = Counter::default();
    Aggregate::apply(&mut counter, &Change::Incremented(Incremented));
    let snapshot = Aggregate::snapshot(&counter);
    assert_eq!(snapshot.value, 1);

    let mut restored = Counter::default();
    Aggregate::restore(&mut restored, snapshot);
    assert_eq!(restored.value, 1);
}
