// self
use crate::obs::{FlowKind, FlowOutcome};

/// Counts a flow outcome on `authgate_flow_total` (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"authgate_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

/// Counts a broadcast session event on `authgate_session_events_total`, labeled by whether any
/// listener was registered to receive it.
pub fn record_session_event(event: &'static str, listeners: usize) {
	#[cfg(feature = "metrics")]
	{
		let delivered = if listeners > 0 { "true" } else { "false" };

		metrics::counter!(
			"authgate_session_events_total",
			"event" => event,
			"delivered" => delivered
		)
		.increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	let _ = (event, listeners);
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn counters_are_inert_without_a_recorder() {
		record_flow_outcome(FlowKind::Refresh, FlowOutcome::Failure);
		record_session_event("AUTH_FAILURE", 0);
		record_session_event("LOGIN", 2);
	}
}
