//! Read models maintained atomically with the events, and rebuilt in bulk
//! when their logic changes.
//!
//! Run with: `cargo run --example projections`

use annals::{
    AggregateRoot, AggregateService, Apply, ProjectionFactory,
    store::{ProjectionFilter, inmemory},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, annals::Payload)]
pub struct TaskAdded {
    pub title: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, annals::Payload)]
pub struct TaskCompleted {
    pub title: String,
}

#[derive(Debug, Default, annals::Aggregate)]
#[aggregate(error = String, events(TaskAdded, TaskCompleted))]
pub struct Board {
    open: Vec<String>,
    done: Vec<String>,
}

impl Apply<TaskAdded> for Board {
    fn apply(&mut self, event: &TaskAdded) {
        self.open.push(event.title.clone());
    }
}

impl Apply<TaskCompleted> for Board {
    fn apply(&mut self, event: &TaskCompleted) {
        self.open.retain(|title| *title != event.title);
        self.done.push(event.title.clone());
    }
}

// ANCHOR: projection
#[derive(Clone, Debug, Serialize, Deserialize, annals::Payload)]
pub struct BoardSummary {
    pub open: usize,
    pub done: usize,
    pub label: String,
}

pub struct SummaryView;

impl ProjectionFactory for SummaryView {
    type Aggregate = Board;
    type Projection = BoardSummary;

    const PROJECTION_TYPE: &'static str = "BoardSummary";

    fn project(&self, root: &AggregateRoot<Board>) -> Option<BoardSummary> {
        let board = root.state();
        Some(BoardSummary {
            open: board.open.len(),
            done: board.done.len(),
            label: format!("{} open", board.open.len()),
        })
    }
}
// ANCHOR_END: projection

/// Second release: a richer label. Bumping `VERSION` marks old rows stale.
pub struct SummaryViewV2;

impl ProjectionFactory for SummaryViewV2 {
    type Aggregate = Board;
    type Projection = BoardSummary;

    const PROJECTION_TYPE: &'static str = "BoardSummary";
    const VERSION: &'static str = "2";

    fn project(&self, root: &AggregateRoot<Board>) -> Option<BoardSummary> {
        let board = root.state();
        Some(BoardSummary {
            open: board.open.len(),
            done: board.done.len(),
            label: format!("{} of {} done", board.done.len(), board.open.len() + board.done.len()),
        })
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
    let service = AggregateService::new(store.clone()).with_projection(SummaryView);

    for tasks in 1..=3 {
        let mut board = AggregateRoot::<Board>::create();
        for n in 0..tasks {
            board.record(TaskAdded {
                title: format!("task {n}"),
            });
        }
        board.record(TaskCompleted {
            title: "task 0".to_string(),
        });
        service.persist(&mut board).await?;
    }

    for row in service
        .projections::<BoardSummary>(&ProjectionFilter::for_type("BoardSummary").in_partition(Uuid::nil()))
        .await?
    {
        println!("{}: {}", row.header.aggregate_id, row.data.label);
    }

    let upgraded = AggregateService::new(store).with_projection(SummaryViewV2);
    let update = upgraded.update_projections::<SummaryViewV2>().await?;
    println!(
        "rebuilt {} rows ({} deleted, {} skipped)",
        update.updated, update.deleted, update.skipped
    );

    for row in upgraded
        .projections::<BoardSummary>(&ProjectionFilter::for_type("BoardSummary"))
        .await?
    {
        println!("{}: {}", row.header.aggregate_id, row.data.label);
    }

    Ok(())
}
