// self
use crate::obs::{Observer, Stage, StageEvent, StageOutcome};

/// Records a stage outcome via the global metrics recorder (when enabled).
pub fn record_stage(stage: Stage, outcome: StageOutcome, latency: std::time::Duration) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"oapi_pipeline_stage_total",
			"stage" => stage.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
		metrics::histogram!("oapi_pipeline_stage_seconds", "stage" => stage.as_str())
			.record(latency.as_secs_f64());
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (stage, outcome, latency);
	}
}

/// Observer forwarding stage events to [`record_stage`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsObserver;
impl Observer for MetricsObserver {
	fn on_event(&self, event: &StageEvent<'_>) {
		record_stage(event.stage, event.outcome, event.latency);
	}
}
