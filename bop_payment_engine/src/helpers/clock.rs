use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};

/// The source of "now" for the order flow and the reconciler. Tests swap in a clock they control.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>);

impl Clock {
    pub fn system() -> Self {
        Self(Arc::new(Utc::now))
    }

    pub fn from_fn<F>(f: F) -> Self
    where F: Fn() -> DateTime<Utc> + Send + Sync + 'static {
        Self(Arc::new(f))
    }

    /// A clock that is stuck at `at`.
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::from_fn(move || at)
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Clock({})", self.now())
    }
}
