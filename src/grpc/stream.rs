//! Tracing for accepted streams.

use std::fmt;
use std::pin::Pin;
use std::task::{self, Poll};

use bytes::Buf;
use http_body::{Body, Frame, SizeHint};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Which way a stream's messages are flowing.
#[derive(Debug, Clone, Copy)]
enum Direction {
	/// Client → server.
	Inbound,

	/// Server → client.
	Outbound,
}

impl fmt::Display for Direction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Inbound => f.write_str("receive"),
			Self::Outbound => f.write_str("send"),
		}
	}
}

/// A body wrapper that logs every message frame passing through an accepted
/// stream.
///
/// Logging happens at debug level and records the direction, frame size, and
/// timestamp. The bytes themselves are handed through untouched.
#[derive(Debug)]
pub struct TracedStream<B> {
	/// The wrapped body.
	inner: B,

	/// Which way this body is flowing.
	direction: Direction,
}

impl<B> TracedStream<B> {
	/// Wraps the request body of an accepted stream.
	pub(super) fn inbound(inner: B) -> Self {
		Self { inner, direction: Direction::Inbound }
	}

	/// Wraps the response body of an accepted stream.
	pub(super) fn outbound(inner: B) -> Self {
		Self { inner, direction: Direction::Outbound }
	}
}

impl<B> Body for TracedStream<B>
where
	B: Body + Unpin,
	Self: Unpin,
{
	type Data = B::Data;
	type Error = B::Error;

	fn poll_frame(
		mut self: Pin<&mut Self>,
		cx: &mut task::Context<'_>,
	) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
		let direction = self.direction;
		let polled = Pin::new(&mut self.inner).poll_frame(cx);

		if let Poll::Ready(Some(Ok(frame))) = &polled {
			if let Some(data) = frame.data_ref() {
				tracing::debug! {
					%direction,
					size = data.remaining(),
					time = %OffsetDateTime::now_utc()
						.format(&Rfc3339)
						.unwrap_or_default(),
					"stream message",
				};
			}
		}

		polled
	}

	fn is_end_stream(&self) -> bool {
		self.inner.is_end_stream()
	}

	fn size_hint(&self) -> SizeHint {
		self.inner.size_hint()
	}
}
