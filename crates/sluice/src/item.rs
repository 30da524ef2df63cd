//! The envelopes that move through a pipeline.
//!
//! [`Item`] is the only thing that travels between stages: a value or an
//! error, moved by value hop-by-hop. [`Outcome`] is the sink's accumulator
//! and the single terminal payload of a stream run; it carries the final
//! accumulator state together with any error recorded along the way.

use crate::StreamError;

/// A single element flowing between stages.
#[derive(Debug)]
pub enum Item<T> {
    Value(T),
    Error(StreamError),
}

impl<T> Item<T> {
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Apply `f` to the value, forwarding errors untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Item<U> {
        match self {
            Self::Value(v) => Item::Value(f(v)),
            Self::Error(e) => Item::Error(e),
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Error(_) => None,
        }
    }

    pub fn into_error(self) -> Option<StreamError> {
        match self {
            Self::Value(_) => None,
            Self::Error(e) => Some(e),
        }
    }
}

/// Terminal result of a stream run: the sink's accumulator plus any trailing
/// error. Exactly one `Outcome` is delivered per run.
#[derive(Debug)]
pub struct Outcome<R> {
    pub value: R,
    pub error: Option<StreamError>,
}

impl<R> Outcome<R> {
    pub fn new(value: R) -> Self {
        Self { value, error: None }
    }

    /// Collapse into a `Result`, dropping the accumulator when an error was
    /// recorded.
    pub fn into_result(self) -> Result<R, StreamError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_preserves_errors() {
        let item: Item<i32> = Item::Error(StreamError::message("nope"));
        let mapped = item.map(|n| n * 2);
        assert!(mapped.is_error());
    }

    #[test]
    fn map_transforms_values() {
        let item = Item::Value(21);
        assert_eq!(item.map(|n| n * 2).into_value(), Some(42));
    }

    #[test]
    fn outcome_into_result_prefers_error() {
        let ok = Outcome::new(7).into_result();
        assert_eq!(ok.unwrap(), 7);

        let mut failed = Outcome::new(7);
        failed.error = Some(StreamError::message("late failure"));
        assert!(failed.into_result().is_err());
    }
}
