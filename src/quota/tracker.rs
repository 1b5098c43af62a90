use crate::quota::types::{
    QuotaCheck, QuotaDenial, QuotaKind, QuotaStatus, Tier, UserQuotaRecord,
};
use crate::store::{CounterUpdate, Store};
use crate::utils::{Clock, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Answers "may this user act" and owns every counter mutation
pub struct QuotaTracker {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Loads the user's record, creating a lowest-tier one on first access.
    ///
    /// The daily message counter starts over on the first access of a new
    /// UTC day.
    pub async fn record(&self, user_id: &str) -> Result<UserQuotaRecord> {
        if let Some(record) = self.store.load_user(user_id).await? {
            let today = self.clock.now().date_naive();
            if record.messages_day == Some(today) {
                return Ok(record);
            }
            let rolled = self.store.roll_daily_counter(user_id, today).await?;
            debug!(user_id = %user_id, %today, "Daily message counter rolled over");
            return Ok(rolled.unwrap_or(record));
        }
        let record = self
            .store
            .insert_user_if_absent(UserQuotaRecord::bootstrap(user_id, self.clock.now()))
            .await?;
        info!(user_id = %user_id, tier = %record.tier, "Created user record");
        Ok(record)
    }

    pub async fn tier(&self, user_id: &str) -> Result<Tier> {
        Ok(self.record(user_id).await?.tier)
    }

    /// Read-only daily message check
    pub async fn check_messages(&self, user_id: &str) -> Result<QuotaCheck> {
        let record = self.record(user_id).await?;
        Ok(QuotaCheck::evaluate(
            record.tier.limits().daily_messages,
            record.messages_used_today,
        ))
    }

    /// Read-only memory item check
    pub async fn check_memory(&self, user_id: &str) -> Result<QuotaCheck> {
        let record = self.record(user_id).await?;
        Ok(QuotaCheck::evaluate(
            record.tier.limits().memory_items,
            record.memory_used,
        ))
    }

    /// Atomically consumes one message if the daily limit allows it
    pub async fn increment_messages(
        &self,
        user_id: &str,
    ) -> Result<std::result::Result<QuotaCheck, QuotaDenial>> {
        self.consume(user_id, QuotaKind::Messages).await
    }

    /// Atomically consumes one memory slot if the tier allows it
    pub async fn increment_memory(
        &self,
        user_id: &str,
    ) -> Result<std::result::Result<QuotaCheck, QuotaDenial>> {
        self.consume(user_id, QuotaKind::Memory).await
    }

    /// Gives back a message consumed by a turn that produced nothing
    pub async fn release_message(&self, user_id: &str) -> Result<()> {
        let used = self
            .store
            .decrement_counter(user_id, QuotaKind::Messages)
            .await?;
        debug!(user_id = %user_id, used, "Released message quota");
        Ok(())
    }

    /// Gives back a memory slot whose write failed
    pub async fn release_memory(&self, user_id: &str) -> Result<()> {
        let used = self
            .store
            .decrement_counter(user_id, QuotaKind::Memory)
            .await?;
        debug!(user_id = %user_id, used, "Released memory quota");
        Ok(())
    }

    pub async fn upgrade_tier(&self, user_id: &str, tier: Tier) -> Result<UserQuotaRecord> {
        let previous = self.record(user_id).await?.tier;
        let record = match self.store.set_tier(user_id, tier).await? {
            Some(record) => record,
            None => self.record(user_id).await?,
        };
        info!(user_id = %user_id, from = %previous, to = %tier, "Tier changed");
        Ok(record)
    }

    pub async fn status(&self, user_id: &str) -> Result<QuotaStatus> {
        let record = self.record(user_id).await?;
        let limits = record.tier.limits();
        let messages = QuotaCheck::evaluate(limits.daily_messages, record.messages_used_today);
        Ok(QuotaStatus {
            tier: record.tier,
            daily_limit: limits.daily_messages,
            messages_used_today: record.messages_used_today,
            messages_remaining: messages.remaining(),
            memory_limit: limits.memory_items,
            memory_used: record.memory_used,
        })
    }

    async fn consume(
        &self,
        user_id: &str,
        kind: QuotaKind,
    ) -> Result<std::result::Result<QuotaCheck, QuotaDenial>> {
        let record = self.record(user_id).await?;
        let limit = match kind {
            QuotaKind::Messages => record.tier.limits().daily_messages,
            _ => record.tier.limits().memory_items,
        };

        match self.store.increment_counter(user_id, kind, limit).await? {
            CounterUpdate::Applied(used) => Ok(Ok(QuotaCheck {
                allowed: true,
                limit,
                used,
            })),
            CounterUpdate::Refused(used) => {
                debug!(user_id = %user_id, ?kind, used, "Quota refused");
                Ok(Err(QuotaDenial::new(
                    kind,
                    record.tier,
                    limit.unwrap_or(used),
                    used,
                )))
            }
        }
    }
}
