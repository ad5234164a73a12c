//! A minimal example: one aggregate, a few commands, and rehydration.
//!
//! Run with: `cargo run --example quickstart`
//! Set `RUST_LOG=annals_core=debug` to watch the engine work.

// NB: the 'ANCHOR's support embedding in mdbook in docs/ directory.

// ANCHOR: full_example
use annals::{AggregateService, Apply, Handle, store::inmemory};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ANCHOR: events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, annals::Payload)]
pub struct AccountOpened {
    pub owner: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, annals::Payload)]
pub struct FundsDeposited {
    pub amount: i64,
}
// ANCHOR_END: events

// ANCHOR: commands
#[derive(Debug)]
pub struct OpenAccount {
    pub owner: String,
}

#[derive(Debug)]
pub struct Deposit {
    pub amount: i64,
}
// ANCHOR_END: commands

// ANCHOR: aggregate
#[derive(Debug, Default, annals::Aggregate)]
#[aggregate(
    error = String,
    events(AccountOpened, FundsDeposited),
    derives(Debug, PartialEq, Eq)
)]
pub struct Account {
    owner: Option<String>,
    balance: i64,
}

impl Apply<AccountOpened> for Account {
    fn apply(&mut self, event: &AccountOpened) {
        self.owner = Some(event.owner.clone());
    }
}

impl Apply<FundsDeposited> for Account {
    fn apply(&mut self, event: &FundsDeposited) {
        self.balance += event.amount;
    }
}

impl Handle<OpenAccount> for Account {
    fn handle(&self, command: &OpenAccount) -> Result<Vec<Self::Event>, Self::Error> {
        if self.owner.is_some() {
            return Err("account already open".into());
        }
        Ok(vec![
            AccountOpened {
                owner: command.owner.clone(),
            }
            .into(),
        ])
    }
}

impl Handle<Deposit> for Account {
    fn handle(&self, command: &Deposit) -> Result<Vec<Self::Event>, Self::Error> {
        if self.owner.is_none() {
            return Err("account is not open".into());
        }
        if command.amount <= 0 {
            return Err("amount must be positive".into());
        }
        Ok(vec![FundsDeposited { amount: command.amount }.into()])
    }
}
// ANCHOR_END: aggregate

// ANCHOR: main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("annals_core=info")),
        )
        .init();

    let service = AggregateService::new(inmemory::Store::new());
    let partition = Uuid::nil();
    let id = Uuid::new_v4();

    service
        .execute::<Account, _>(
            partition,
            id,
            &OpenAccount {
                owner: "Ada".to_string(),
            },
        )
        .await?;
    service
        .execute::<Account, _>(partition, id, &Deposit { amount: 100 })
        .await?;

    // Rejected commands write nothing.
    let rejected = service
        .execute::<Account, _>(partition, id, &Deposit { amount: -5 })
        .await;
    println!("negative deposit: {}", rejected.unwrap_err());

    let account = service
        .rehydrate::<Account>(partition, id)
        .await?
        .ok_or("account not found")?;
    println!(
        "{} has balance {} after {} events",
        account.state().owner.as_deref().unwrap_or("?"),
        account.state().balance,
        account.version()
    );
    assert_eq!(account.state().balance, 100);

    Ok(())
}
// ANCHOR_END: main
// ANCHOR_END: full_example
