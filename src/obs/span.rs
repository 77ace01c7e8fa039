// crates.io
use tracing::instrument::Instrumented;
// self
use crate::{_prelude::*, obs::OpKind};

/// A span builder used by guard operations.
#[derive(Clone, Debug)]
pub struct OpSpan {
	span: tracing::Span,
}
impl OpSpan {
	/// Creates a new span tagged with the provided operation.
	pub fn new(kind: OpKind) -> Self {
		Self { span: tracing::info_span!("session_guard.op", op = kind.as_str()) }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}
