//! Event bus for inter-service communication.
//!
//! A thin wrapper over a tokio broadcast channel. Publishing never blocks;
//! slow subscribers lag and lose the oldest events instead of stalling flows.

use bank_types::BankEvent;
use tokio::sync::broadcast;

/// Broadcast bus carrying [`BankEvent`]s.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<BankEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<BankEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Fails only when nobody is subscribed.
	pub fn publish(&self, event: BankEvent) -> Result<(), broadcast::error::SendError<BankEvent>> {
		self.sender.send(event).map(|_| ())
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1000)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bank_types::{FlowEvent, FlowId};

	#[tokio::test]
	async fn test_subscribers_receive_published_events() {
		let bus = EventBus::new(8);
		assert!(bus.publish(BankEvent::Flow(FlowEvent::Completed { flow_id: FlowId::new() })).is_err());

		let mut rx = bus.subscribe();
		let flow_id = FlowId::new();
		bus.publish(BankEvent::Flow(FlowEvent::Abandoned { flow_id }))
			.unwrap();
		match rx.recv().await.unwrap() {
			BankEvent::Flow(FlowEvent::Abandoned { flow_id: got }) => assert_eq!(got, flow_id),
			other => panic!("unexpected event {:?}", other),
		}
	}
}
