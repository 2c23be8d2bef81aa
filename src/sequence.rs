use crate::error::StoreError;
use crate::store::{Cache, KeyValueStore, StoreKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestTicket(u64);

// The counter lives in the store, so separate runs of the CLI supersede each other.
pub struct RequestSequence<'a, S> {
    cache: &'a Cache<S>,
    key: &'a StoreKey<u64>,
}

impl<'a, S: KeyValueStore> RequestSequence<'a, S> {
    pub fn new(cache: &'a Cache<S>, key: &'a StoreKey<u64>) -> Self {
        RequestSequence { cache, key }
    }

    pub async fn issue(&self) -> Result<RequestTicket, StoreError> {
        let ticket = RequestTicket(self.cache.increment(self.key).await?);
        tracing::debug!(key = self.key.name, ticket = ticket.0, "issued request ticket");
        Ok(ticket)
    }

    pub async fn is_current(&self, ticket: RequestTicket) -> Result<bool, StoreError> {
        Ok(self.cache.get(self.key).await? == Some(ticket.0))
    }

    pub async fn settle<T>(&self, ticket: RequestTicket, value: T) -> Result<Option<T>, StoreError> {
        if self.is_current(ticket).await? {
            return Ok(Some(value));
        }
        tracing::debug!(
            key = self.key.name,
            ticket = ticket.0,
            "discarding stale response"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, CAPTCHA_REQUEST, SYNC_REQUEST};

    #[tokio::test]
    async fn newest_ticket_wins() {
        let cache = Cache::new(MemoryStore::new());
        let sequence = RequestSequence::new(&cache, &CAPTCHA_REQUEST);
        let first = sequence.issue().await.unwrap();
        let second = sequence.issue().await.unwrap();

        assert!(second > first);
        assert_eq!(sequence.settle(first, "old").await.unwrap(), None);
        assert_eq!(sequence.settle(second, "new").await.unwrap(), Some("new"));
    }

    #[tokio::test]
    async fn tickets_survive_across_sequences_on_one_store() {
        let cache = Cache::new(MemoryStore::new());
        let earlier_run = RequestSequence::new(&cache, &CAPTCHA_REQUEST);
        let ticket = earlier_run.issue().await.unwrap();
        assert!(earlier_run.is_current(ticket).await.unwrap());

        let later_run = RequestSequence::new(&cache, &CAPTCHA_REQUEST);
        let newer = later_run.issue().await.unwrap();

        assert!(!earlier_run.is_current(ticket).await.unwrap());
        assert!(later_run.is_current(newer).await.unwrap());
    }

    #[tokio::test]
    async fn keys_are_sequenced_independently() {
        let cache = Cache::new(MemoryStore::new());
        let captcha = RequestSequence::new(&cache, &CAPTCHA_REQUEST);
        let sync = RequestSequence::new(&cache, &SYNC_REQUEST);

        let captcha_ticket = captcha.issue().await.unwrap();
        let sync_ticket = sync.issue().await.unwrap();
        sync.issue().await.unwrap();

        assert!(captcha.is_current(captcha_ticket).await.unwrap());
        assert!(!sync.is_current(sync_ticket).await.unwrap());
    }
}
