#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use secreview_kernel_contracts::directory::UserId;
use secreview_kernel_contracts::linked::{
    LinkedLifecyclePoint, LinkedSearchHit, LinkedSystemOutcome,
};
use secreview_kernel_contracts::record::ReviewRecord;
use secreview_kernel_contracts::review::Review;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkedSystemError {
    #[error("no linked system adapter registered under `{0}`")]
    UnknownAdapter(String),
    #[error("linked system adapter `{0}` is already registered")]
    DuplicateAdapter(String),
    #[error("linked system call failed: {0}")]
    Call(String),
}

/// Lifecycle event delivered to a linked system, with the data each point needs.
#[derive(Debug, Clone, Copy)]
pub enum LinkedEvent<'a> {
    Create,
    Reassign { new_owner: Option<UserId> },
    NewReview(&'a Review),
    InProgress(&'a Review),
    Pass(&'a Review),
    Fail(&'a Review),
    ProvisionalPass(&'a Review),
    Delete,
}

impl<'a> LinkedEvent<'a> {
    /// Event for a review-level lifecycle point; record-level points carry no review.
    pub fn at(point: LinkedLifecyclePoint, review: &'a Review) -> Self {
        match point {
            LinkedLifecyclePoint::Create => LinkedEvent::Create,
            LinkedLifecyclePoint::Reassign => LinkedEvent::Reassign { new_owner: None },
            LinkedLifecyclePoint::NewReview => LinkedEvent::NewReview(review),
            LinkedLifecyclePoint::InProgress => LinkedEvent::InProgress(review),
            LinkedLifecyclePoint::Pass => LinkedEvent::Pass(review),
            LinkedLifecyclePoint::Fail => LinkedEvent::Fail(review),
            LinkedLifecyclePoint::ProvisionalPass => LinkedEvent::ProvisionalPass(review),
            LinkedLifecyclePoint::Delete => LinkedEvent::Delete,
        }
    }

    pub fn point(&self) -> LinkedLifecyclePoint {
        match self {
            LinkedEvent::Create => LinkedLifecyclePoint::Create,
            LinkedEvent::Reassign { .. } => LinkedLifecyclePoint::Reassign,
            LinkedEvent::NewReview(_) => LinkedLifecyclePoint::NewReview,
            LinkedEvent::InProgress(_) => LinkedLifecyclePoint::InProgress,
            LinkedEvent::Pass(_) => LinkedLifecyclePoint::Pass,
            LinkedEvent::Fail(_) => LinkedLifecyclePoint::Fail,
            LinkedEvent::ProvisionalPass(_) => LinkedLifecyclePoint::ProvisionalPass,
            LinkedEvent::Delete => LinkedLifecyclePoint::Delete,
        }
    }
}

/// An external system that mirrors review records (ticketing, inventory, CRM).
///
/// Every hook defaults to a no-op success so integrations only implement what they mirror.
pub trait LinkedSystemAdapter: Send + Sync {
    /// Stable registry key; record types refer to adapters by this value.
    fn key(&self) -> &str;

    fn on_create(
        &self,
        _record: &ReviewRecord,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        Ok(LinkedSystemOutcome::ok())
    }

    fn on_reassign(
        &self,
        _record: &ReviewRecord,
        _actor: UserId,
        _new_owner: Option<UserId>,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        Ok(LinkedSystemOutcome::ok())
    }

    fn on_new_review(
        &self,
        _record: &ReviewRecord,
        _review: &Review,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        Ok(LinkedSystemOutcome::ok())
    }

    fn on_in_progress(
        &self,
        _record: &ReviewRecord,
        _review: &Review,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        Ok(LinkedSystemOutcome::ok())
    }

    fn on_pass(
        &self,
        _record: &ReviewRecord,
        _review: &Review,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        Ok(LinkedSystemOutcome::ok())
    }

    fn on_fail(
        &self,
        _record: &ReviewRecord,
        _review: &Review,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        Ok(LinkedSystemOutcome::ok())
    }

    fn on_provisional_pass(
        &self,
        _record: &ReviewRecord,
        _review: &Review,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        Ok(LinkedSystemOutcome::ok())
    }

    fn on_delete(
        &self,
        _record: &ReviewRecord,
        _actor: UserId,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        Ok(LinkedSystemOutcome::ok())
    }

    fn do_search(&self, _query: &str) -> Result<Vec<LinkedSearchHit>, LinkedSystemError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct LinkedSystemRegistry {
    adapters: BTreeMap<String, Box<dyn LinkedSystemAdapter>>,
}

impl fmt::Debug for LinkedSystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedSystemRegistry")
            .field("keys", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LinkedSystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        adapter: Box<dyn LinkedSystemAdapter>,
    ) -> Result<(), LinkedSystemError> {
        let key = adapter.key().to_string();
        if self.adapters.contains_key(&key) {
            return Err(LinkedSystemError::DuplicateAdapter(key));
        }
        self.adapters.insert(key, adapter);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&dyn LinkedSystemAdapter> {
        self.adapters.get(key).map(|a| a.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn dispatch(
        &self,
        key: &str,
        record: &ReviewRecord,
        actor: UserId,
        event: LinkedEvent<'_>,
    ) -> Result<LinkedSystemOutcome, LinkedSystemError> {
        let adapter = self
            .get(key)
            .ok_or_else(|| LinkedSystemError::UnknownAdapter(key.to_string()))?;
        match event {
            LinkedEvent::Create => adapter.on_create(record, actor),
            LinkedEvent::Reassign { new_owner } => adapter.on_reassign(record, actor, new_owner),
            LinkedEvent::NewReview(review) => adapter.on_new_review(record, review, actor),
            LinkedEvent::InProgress(review) => adapter.on_in_progress(record, review, actor),
            LinkedEvent::Pass(review) => adapter.on_pass(record, review, actor),
            LinkedEvent::Fail(review) => adapter.on_fail(record, review, actor),
            LinkedEvent::ProvisionalPass(review) => {
                adapter.on_provisional_pass(record, review, actor)
            }
            LinkedEvent::Delete => adapter.on_delete(record, actor),
        }
    }

    pub fn search(
        &self,
        key: &str,
        query: &str,
    ) -> Result<Vec<LinkedSearchHit>, LinkedSystemError> {
        self.get(key)
            .ok_or_else(|| LinkedSystemError::UnknownAdapter(key.to_string()))?
            .do_search(query)
    }
}
