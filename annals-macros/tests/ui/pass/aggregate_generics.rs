use std::marker::PhantomData;

use annals::{Aggregate, Apply, Payload};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, Payload)]
pub struct Tagged {
    pub tag: String,
}

#[derive(Aggregate)]
#[aggregate(error = String, events(Tagged))]
pub struct Labelled<T: Send + Sync + 'static> {
    tags: Vec<String>,
    marker: PhantomData<T>,
}

impl<T: Send + Sync + 'static> Default for Labelled<T> {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Apply<Tagged> for Labelled<T> {
    fn apply(&mut self, event: &Tagged) {
        self.tags.push(event.tag.clone());
    }
}

fn main() {
    assert_eq!(<Labelled<u8> as Aggregate>::TYPE, "Labelled");
    let mut labelled = Labelled::<u8>::default();
    Aggregate::apply(&mut labelled, &LabelledEvent::Tagged(Tagged { tag: "a".into() }));
    assert_eq!(labelled.tags, vec!["a".to_string()]);
}
