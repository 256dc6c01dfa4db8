use strum_macros::Display;

/// Why an instrument operation sent nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Skip {
    #[strum(to_string = "not connected")]
    NotConnected,
    #[strum(to_string = "argument out of range")]
    OutOfRange,
}

/// Result of an instrument operation that did not fail.
///
/// Skipped operations are not errors: the instrument was simply left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome<T> {
    Done(T),
    Skipped(Skip),
}

impl<T> Outcome<T> {
    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Skipped(_) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn skipped(&self) -> Option<Skip> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Skipped(reason) => Some(*reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
        }
    }
}

impl<T> From<Skip> for Outcome<T> {
    fn from(reason: Skip) -> Self {
        Outcome::Skipped(reason)
    }
}
