#![forbid(unsafe_code)]

use crate::{AssetEvent, NetEvent};

/// Any event carried by the [`EventBus`](crate::EventBus).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Asset(AssetEvent),
    Net(NetEvent),
}

impl From<AssetEvent> for Event {
    fn from(e: AssetEvent) -> Self {
        Self::Asset(e)
    }
}

impl From<NetEvent> for Event {
    fn from(e: NetEvent) -> Self {
        Self::Net(e)
    }
}
