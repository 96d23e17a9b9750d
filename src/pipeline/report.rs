use std::fmt;

use serde::Serialize;

/// Per-airline run state. Moves forward only; `Failed` is reachable from
/// any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirlineState {
    Pending,
    Listing,
    Fetching,
    Normalizing,
    Persisting,
    Done,
    Failed,
}

impl AirlineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AirlineState::Done | AirlineState::Failed)
    }

    pub fn can_advance_to(self, next: AirlineState) -> bool {
        use AirlineState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Pending, Listing)
            | (Listing, Fetching)
            | (Fetching, Normalizing)
            | (Normalizing, Persisting)
            | (Persisting, Done) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureScope {
    Listing,
    Page,
    Entry,
    Image,
    Store,
    Cancelled,
}

/// One recorded, recovered failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub scope: FailureScope,
    pub target: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AirlineCounts {
    pub pages: usize,
    pub entries: usize,
    pub unrecognized: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub images: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Partial(usize),
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Partial(n) => write!(f, "partially succeeded ({n} skipped)"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AirlineReport {
    pub airline_code: String,
    pub state: AirlineState,
    pub counts: AirlineCounts,
    pub failures: Vec<Failure>,
}

impl AirlineReport {
    pub fn new(airline_code: impl Into<String>) -> Self {
        Self {
            airline_code: airline_code.into(),
            state: AirlineState::Pending,
            counts: AirlineCounts::default(),
            failures: Vec::new(),
        }
    }

    /// Illegal transitions are ignored; the report keeps its current state.
    pub fn advance(&mut self, next: AirlineState) -> bool {
        if self.state.can_advance_to(next) {
            tracing::debug!(airline = %self.airline_code, from = ?self.state, to = ?next, "state");
            self.state = next;
            true
        } else {
            false
        }
    }

    pub fn fail(&mut self, scope: FailureScope, target: impl Into<String>, reason: impl Into<String>) {
        self.record(scope, target, reason);
        self.advance(AirlineState::Failed);
    }

    pub fn record(&mut self, scope: FailureScope, target: impl Into<String>, reason: impl Into<String>) {
        let failure = Failure {
            scope,
            target: target.into(),
            reason: reason.into(),
        };
        tracing::warn!(
            airline = %self.airline_code,
            scope = ?failure.scope,
            target = %failure.target,
            "{}",
            failure.reason
        );
        self.failures.push(failure);
    }

    pub fn failure_count(&self, scope: FailureScope) -> usize {
        self.failures.iter().filter(|f| f.scope == scope).count()
    }

    pub fn outcome(&self) -> Outcome {
        if self.state == AirlineState::Failed {
            Outcome::Failed
        } else if self.failures.is_empty() {
            Outcome::Succeeded
        } else {
            Outcome::Partial(self.failures.len())
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub airlines: Vec<AirlineReport>,
}

impl BatchReport {
    pub fn any_failed(&self) -> bool {
        self.airlines.iter().any(|a| a.state == AirlineState::Failed)
    }

    pub fn get(&self, airline_code: &str) -> Option<&AirlineReport> {
        self.airlines.iter().find(|a| a.airline_code == airline_code)
    }

    pub fn print(&self) {
        println!(
            "\n{:<4} | {:<34} | {:>5} | {:>7} | {:>8} | {:>7} | {:>8}",
            "Code", "Outcome", "Pages", "Entries", "Inserted", "Updated", "Failures"
        );
        println!("{}", "-".repeat(89));
        for a in &self.airlines {
            println!(
                "{:<4} | {:<34} | {:>5} | {:>7} | {:>8} | {:>7} | {:>8}",
                a.airline_code,
                a.outcome().to_string(),
                a.counts.pages,
                a.counts.entries,
                a.counts.inserted,
                a.counts.updated,
                a.failures.len()
            );
        }

        let succeeded = self.count(|o| matches!(o, Outcome::Succeeded));
        let partial = self.count(|o| matches!(o, Outcome::Partial(_)));
        let failed = self.count(|o| matches!(o, Outcome::Failed));
        println!(
            "\n{} airlines: {} succeeded, {} partial, {} failed.",
            self.airlines.len(),
            succeeded,
            partial,
            failed
        );
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.airlines.iter().filter(|a| pred(&a.outcome())).count()
    }
}
