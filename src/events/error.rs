use crate::error::BoxError;
use std::{error::Error as StdError, fmt};

/// Every failure raised by the handlers of a single notification.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<BoxError>,
}

impl AggregateError {
    pub(crate) fn new(errors: Vec<BoxError>) -> Self {
        Self { errors }
    }

    /// Returns the individual handler failures, in handler order.
    #[must_use]
    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    /// Returns the number of handlers which failed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns whether no failures were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consumes this error, returning the individual failures.
    #[must_use]
    pub fn into_errors(self) -> Vec<BoxError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} event handler(s) failed", self.errors.len())?;

        for (i, e) in self.errors.iter().enumerate() {
            write!(f, "{} {}", if i == 0 { ":" } else { ";" }, e)?;
        }

        Ok(())
    }
}

impl StdError for AggregateError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.errors
            .first()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}
