use crate::error::DriverError;

/*----- */
// Error text classification
/*----- */
// Venue error reports are heterogeneous free text. This module is the only
// place in the codebase that inspects it. Markers are matched lowercase,
// substring style.
#[derive(Debug, Clone)]
pub struct ErrorPatterns {
    throttle_markers: Vec<String>,
    timeout_markers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Throttle,
    Timeout,
    Other,
}

impl Default for ErrorPatterns {
    fn default() -> Self {
        Self {
            throttle_markers: vec![
                "rate limit".to_owned(),
                "429".to_owned(),
                "too many requests".to_owned(),
                "throttle".to_owned(),
            ],
            timeout_markers: vec![
                "timeout".to_owned(),
                "timedout".to_owned(),
                "etimedout".to_owned(),
            ],
        }
    }
}

impl ErrorPatterns {
    pub fn new(throttle_markers: Vec<String>, timeout_markers: Vec<String>) -> Self {
        Self {
            throttle_markers: throttle_markers
                .into_iter()
                .map(|marker| marker.to_lowercase())
                .collect(),
            timeout_markers: timeout_markers
                .into_iter()
                .map(|marker| marker.to_lowercase())
                .collect(),
        }
    }

    pub fn is_throttle(&self, detail: &str) -> bool {
        let lowered = detail.to_lowercase();
        self.throttle_markers
            .iter()
            .any(|marker| lowered.contains(marker))
    }

    pub fn is_timeout(&self, detail: &str) -> bool {
        let lowered = detail.to_lowercase();
        self.timeout_markers
            .iter()
            .any(|marker| lowered.contains(marker))
    }

    pub fn classify(&self, error: &DriverError) -> ErrorClass {
        // Throttle wins when a venue manages to report both
        if self.is_throttle(&error.0) {
            return ErrorClass::Throttle;
        }
        if self.is_timeout(&error.0) {
            return ErrorClass::Timeout;
        }
        ErrorClass::Other
    }
}

#[cfg(test)]
mod test {
    use crate::error::DriverError;

    use super::{ErrorClass, ErrorPatterns};

    #[test]
    fn test_throttle_markers() {
        let patterns = ErrorPatterns::default();
        assert!(patterns.is_throttle("HTTP 429 Too Many Requests"));
        assert!(patterns.is_throttle("Rate Limit exceeded, retry later"));
        assert!(patterns.is_throttle("request was THROTTLED"));
        assert!(!patterns.is_throttle("insufficient balance"));
    }

    #[test]
    fn test_timeout_markers() {
        let patterns = ErrorPatterns::default();
        assert!(patterns.is_timeout("connect ETIMEDOUT 1.2.3.4:443"));
        assert!(patterns.is_timeout("request timeout after 10s"));
        assert!(patterns.is_timeout("request TimedOut"));
        assert!(!patterns.is_timeout("connection refused"));
    }

    #[test]
    fn test_classify() {
        let patterns = ErrorPatterns::default();
        assert_eq!(
            patterns.classify(&DriverError::new("429")),
            ErrorClass::Throttle
        );
        assert_eq!(
            patterns.classify(&DriverError::new("etimedout")),
            ErrorClass::Timeout
        );
        assert_eq!(
            patterns.classify(&DriverError::new("bad instrument")),
            ErrorClass::Other
        );
    }
}
