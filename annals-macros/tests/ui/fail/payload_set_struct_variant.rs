#[derive(annals::PayloadSet)]
pub enum TicketView {
    Open { title: String },
}

fn main() {}
