use annals::{Payload, PayloadSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize, Payload)]
pub struct OpenTicket {
    pub title: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Payload)]
#[payload(name = "ClosedTicket.v2")]
pub struct ClosedTicket {
    pub resolution: String,
}

#[derive(Debug, PartialEq, PayloadSet)]
pub enum TicketView {
    Open(OpenTicket),
    Closed(ClosedTicket),
}

fn main() {
    assert_eq!(TicketView::TYPES, &["OpenTicket", "ClosedTicket.v2"]);
    assert!(TicketView::contains("ClosedTicket.v2"));

    let view: TicketView = ClosedTicket {
        resolution: "fixed".to_string(),
    }
    .into();
    let data = view.encode().unwrap();
    let decoded = TicketView::decode(view.record_type(), data).unwrap();
    assert_eq!(decoded, view);

    assert!(TicketView::decode("Unknown", serde_json::json!({})).is_err());
}
