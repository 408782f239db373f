use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aimpoint::Aimpoint;

/// Per-tick values the scheduler attaches to each fetch order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderOverrides {
    /// Visibility delay relative to the tick
    pub delay_secs: u64,
    /// Logical time of the tick that produced the order (epoch millis)
    pub tick_ms: i64,
    /// True when the order probes a monitored aimpoint
    #[serde(default)]
    pub probe: bool,
}

/// Message on the Dispatch Bus: the full aimpoint document plus overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOrder {
    pub order_id: Uuid,
    pub aimpoint: Aimpoint,
    pub overrides: OrderOverrides,
}

impl FetchOrder {
    pub fn new(aimpoint: Aimpoint, overrides: OrderOverrides) -> Self {
        Self {
            order_id: Uuid::now_v7(),
            aimpoint,
            overrides,
        }
    }

    /// Decode an order at the bus edge, validating the embedded aimpoint
    pub fn from_json(bytes: &[u8]) -> Result<Self, super::AimpointError> {
        let order: FetchOrder = serde_json::from_slice(bytes)?;
        order.aimpoint.validate()?;
        Ok(order)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Message on the Outcome Bus, posted by a worker after each attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeMessage {
    pub aimpoint: Aimpoint,
    pub is_collecting: bool,
}
