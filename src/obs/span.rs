// crates.io
use tracing::{Instrument, instrument::Instrumented};
// self
use crate::{_prelude::*, obs::RelayStage};

/// A span builder used by relay stages.
#[derive(Clone, Debug)]
pub struct RelaySpan {
	span: tracing::Span,
}
impl RelaySpan {
	/// Creates a new span tagged with the provided stage + operation name.
	pub fn new(stage: RelayStage, op: &'static str) -> Self {
		Self { span: tracing::info_span!("session_relay.stage", stage = stage.as_str(), op) }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.span.clone())
	}
}
