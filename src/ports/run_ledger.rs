//! SchedulerRunLedger port - "already ran today" guard for scheduler passes.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;

use crate::domain::foundation::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerPass {
    Notifications,
    Expirations,
}

impl SchedulerPass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerPass::Notifications => "notifications",
            SchedulerPass::Expirations => "expirations",
        }
    }
}

impl fmt::Display for SchedulerPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait SchedulerRunLedger: Send + Sync {
    /// UTC date of the last clean completion of `pass`.
    async fn last_completed(&self, pass: SchedulerPass) -> Result<Option<NaiveDate>, DomainError>;

    async fn record_completed(&self, pass: SchedulerPass, date: NaiveDate)
        -> Result<(), DomainError>;
}
