// self
use crate::{_prelude::*, auth::TenantId, obs::RefreshMethod};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedRefresh<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedRefresh<F> = F;

/// Span wrapping one single-flight refresh.
#[derive(Clone, Debug)]
pub struct RefreshSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl RefreshSpan {
	/// Creates a span tagged with the tenant and the triggering method.
	pub fn new(tenant: &TenantId, method: RefreshMethod) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"oauth2_gateway.refresh",
				tenant = tenant.as_str(),
				method = method.as_str()
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (tenant, method);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedRefresh<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

// Structured event that compiles away without the `tracing` feature.
macro_rules! event {
	($level:ident, $($arg:tt)+) => {{
		#[cfg(feature = "tracing")]
		{
			::tracing::$level!($($arg)+);
		}
	}};
}
pub(crate) use event;

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn instrument_wraps_future() {
		let tenant = TenantId::new("acme").expect("Tenant fixture should be valid.");
		let span = RefreshSpan::new(&tenant, RefreshMethod::Manual);
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
