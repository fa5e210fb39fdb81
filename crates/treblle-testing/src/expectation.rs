use super::matcher::RequestMatcher;
use bytes::Bytes;
use http::StatusCode;

/// Bounds on how many ingestion requests an expectation should see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
}

impl Times {
    pub fn allows(self, calls: usize) -> bool {
        match self {
            Self::Exactly(want) => calls == want,
            Self::AtLeast(min) => calls >= min,
            Self::AtMost(max) => calls <= max,
        }
    }
}

/// A registered rule on the mock collector. Built through
/// [`MockCollector::expect`](crate::MockCollector::expect).
#[derive(Debug, Clone)]
pub struct Expectation {
    pub(crate) matcher: RequestMatcher,
    pub(crate) response: MockResponse,
    pub(crate) times: Times,
    pub(crate) calls: usize,
}

impl Expectation {
    pub(crate) fn new(matcher: RequestMatcher) -> Self {
        Self {
            matcher,
            response: MockResponse::default(),
            times: Times::Exactly(1),
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub(crate) fn failure(&self) -> Option<String> {
        (!self.times.allows(self.calls)).then(|| {
            format!(
                "ingestion matching {:?} expected {:?} calls, got {}",
                self.matcher, self.times, self.calls
            )
        })
    }
}

/// Status and body the mock collector answers with.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub(crate) status: StatusCode,
    pub(crate) body: Bytes,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            body: Bytes::new(),
        }
    }
}

impl MockResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// JSON answer, e.g. the collector's `{"message": "..."}` error shape.
    pub fn json(mut self, body: impl serde::Serialize) -> Self {
        self.body = serde_json::to_vec(&body).unwrap_or_default().into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_times_bounds() {
        assert!(Times::Exactly(0).allows(0));
        assert!(!Times::Exactly(2).allows(1));
        assert!(Times::AtLeast(1).allows(5));
        assert!(!Times::AtLeast(1).allows(0));
        assert!(Times::AtMost(2).allows(2));
        assert!(!Times::AtMost(2).allows(3));
    }

    #[test]
    fn test_failure_message_names_counts() {
        let mut exp = Expectation::new(RequestMatcher::new().api_key("k"));
        exp.times = Times::Exactly(2);
        exp.calls = 1;
        let message = exp.failure().unwrap();
        assert!(message.contains("Exactly(2)"));
        assert!(message.contains("got 1"));

        exp.calls = 2;
        assert!(exp.failure().is_none());
    }

    #[test]
    fn test_json_body() {
        let response = MockResponse::new()
            .status(StatusCode::UNAUTHORIZED)
            .json(serde_json::json!({"message": "bad key"}));
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(&response.body[..], br#"{"message":"bad key"}"#);
    }
}
