#[derive(annals::PayloadSet)]
pub enum TicketView {
    Open(String),
    Closed,
}

fn main() {}
