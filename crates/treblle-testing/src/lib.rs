//! Test doubles for the Treblle Rust SDK.
//!
//! # Mock collector
//!
//! [`MockCollector`] is a local HTTP server standing in for the Treblle
//! collection endpoint. Point `TreblleConfig::endpoint` at its
//! [`base_url`](MockCollector::base_url) and inspect what the SDK sent:
//!
//! ```rust,ignore
//! let collector = MockCollector::start().await?;
//! collector
//!     .expect(RequestMatcher::new().api_key("key"))
//!     .respond_with(MockResponse::new().status(StatusCode::OK))
//!     .once();
//!
//! let treblle = Treblle::new(TreblleConfig::new("key", "proj").endpoint(collector.base_url()))?;
//! // ... drive traffic ...
//! assert!(collector.wait_for_requests(1, Duration::from_secs(2)).await);
//! collector.verify();
//! ```
//!
//! # Recording transport
//!
//! [`RecordingTransport`] skips the network entirely and keeps every
//! payload in memory, optionally delaying or failing each send.

pub mod expectation;
pub mod matcher;
pub mod server;
pub mod transport;

pub use expectation::{Expectation, MockResponse, Times};
pub use matcher::RequestMatcher;
pub use server::{ExpectationBuilder, MockCollector, RecordedRequest};
pub use transport::RecordingTransport;
