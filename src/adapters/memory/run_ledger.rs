//! In-memory scheduler run ledger.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::domain::foundation::DomainError;
use crate::ports::{SchedulerPass, SchedulerRunLedger};

#[derive(Debug, Clone, Default)]
pub struct InMemoryRunLedger {
    completed: Arc<RwLock<HashMap<SchedulerPass, NaiveDate>>>,
}

impl InMemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchedulerRunLedger for InMemoryRunLedger {
    async fn last_completed(&self, pass: SchedulerPass) -> Result<Option<NaiveDate>, DomainError> {
        Ok(self.completed.read().await.get(&pass).copied())
    }

    async fn record_completed(
        &self,
        pass: SchedulerPass,
        date: NaiveDate,
    ) -> Result<(), DomainError> {
        let mut completed = self.completed.write().await;
        let entry = completed.entry(pass).or_insert(date);
        if date > *entry {
            *entry = date;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_latest_date_per_pass() {
        let ledger = InMemoryRunLedger::new();
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();

        ledger
            .record_completed(SchedulerPass::Notifications, day2)
            .await
            .unwrap();
        ledger
            .record_completed(SchedulerPass::Notifications, day1)
            .await
            .unwrap();

        assert_eq!(
            ledger
                .last_completed(SchedulerPass::Notifications)
                .await
                .unwrap(),
            Some(day2)
        );
        assert_eq!(
            ledger.last_completed(SchedulerPass::Expirations).await.unwrap(),
            None
        );
    }
}
