// self
use crate::{
	_prelude::*,
	descriptor::RequestDescriptor,
	obs::{Observer, StageEvent, StageOutcome},
};

/// Span wrapper used around one pipeline invocation.
#[derive(Clone, Debug)]
pub struct InvocationSpan {
	span: tracing::Span,
}
impl InvocationSpan {
	/// Creates a span tagged with the descriptor's endpoint and method.
	pub fn new(descriptor: &RequestDescriptor) -> Self {
		let span = tracing::info_span!(
			"oapi_pipeline.invocation",
			endpoint = %descriptor.endpoint_id,
			method = descriptor.method.as_str(),
		);

		Self { span }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> tracing::instrument::Instrumented<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}

/// Observer that writes every stage event to `tracing`.
///
/// Only the endpoint, method, and URL path are logged; headers and bodies never are.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;
impl Observer for TracingObserver {
	fn on_event(&self, event: &StageEvent<'_>) {
		let stage = event.stage.as_str();
		let outcome = event.outcome.as_str();
		let endpoint: &str = &event.descriptor.endpoint_id;
		let path = event.descriptor.url.path();
		let latency_ms = event.latency.as_secs_f64() * 1_000.;

		match event.outcome {
			StageOutcome::Failure => tracing::warn!(
				stage,
				outcome,
				endpoint,
				path,
				latency_ms,
				status = event.status,
				"pipeline stage failed"
			),
			StageOutcome::Denied => tracing::info!(
				stage,
				outcome,
				endpoint,
				path,
				latency_ms,
				"pipeline stage denied"
			),
			_ => tracing::debug!(
				stage,
				outcome,
				endpoint,
				path,
				latency_ms,
				status = event.status,
				"pipeline stage finished"
			),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		descriptor::{EndpointId, Method},
		obs::Stage,
	};

	#[tokio::test]
	async fn instrument_wraps_future() {
		let descriptor = RequestDescriptor::new(
			EndpointId::new("pets.get").expect("Endpoint fixture should be valid."),
			Method::Get,
			Url::parse("https://petstore.example.com/pets/1").expect("URL fixture should parse."),
		);
		let span = InvocationSpan::new(&descriptor);
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);

		TracingObserver.on_event(&StageEvent {
			stage: Stage::Complete,
			descriptor: &descriptor,
			outcome: StageOutcome::Success,
			latency: StdDuration::from_millis(3),
			status: Some(200),
		});
	}
}
