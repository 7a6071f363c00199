//! Release notifier - announces new container image tags once.
//!
//! For each event in an offer, the notifier reads `data.target.repository`
//! and `data.target.tag` (the shape of a registry push event). Repositories
//! without configured labels are ignored. A pair already in the [`Ledger`]
//! is ignored. Otherwise the pair is recorded and a [`Digest`] goes out
//! through the configured [`OutboundChannel`].

use super::{
    Digest, Ledger, NotifierSink, Offer, OutboundChannel, SinkContext, SinkError, SinkResult,
};
use crate::config::RepositoryLabels;
use crate::event::CanonicalEvent;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The part of a push event's `data` the notifier reads.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub repository: String,
    pub tag: String,
}

impl ReleaseTarget {
    /// Read `data.target` from an event, if it has one.
    pub fn from_event(event: &CanonicalEvent) -> Option<Self> {
        let mut data = event.data()?;
        let target = data.get_mut("target")?.take();
        serde_json::from_value(target).ok()
    }
}

/// Sink that forwards a digest for each newly seen release.
pub struct ReleaseNotifier {
    repositories: HashMap<String, RepositoryLabels>,
    ledger: Arc<Ledger>,
    channel: Arc<dyn OutboundChannel>,
}

impl ReleaseNotifier {
    pub fn new(
        repositories: HashMap<String, RepositoryLabels>,
        ledger: Arc<Ledger>,
        channel: Arc<dyn OutboundChannel>,
    ) -> Self {
        Self {
            repositories,
            ledger,
            channel,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Process one event. Returns whether a digest was sent.
    async fn announce(
        &self,
        context: SinkContext,
        event: &CanonicalEvent,
    ) -> Result<bool, SinkError> {
        let Some(target) = ReleaseTarget::from_event(event) else {
            debug!(event_id = %event.id(), "Event has no release target");
            return Ok(false);
        };

        let Some(labels) = self.repositories.get(&target.repository) else {
            debug!(repository = %target.repository, "Repository not configured for release notices");
            return Ok(false);
        };

        if !self
            .ledger
            .record_if_absent(labels, &target.repository, &target.tag)
            .await?
        {
            return Ok(false);
        }

        let digest = build_digest(context, labels, &target);
        self.channel.send(&digest).await?;

        info!(
            channel = %self.channel.name(),
            repository = %target.repository,
            tag = %target.tag,
            context = %context,
            "Release digest forwarded"
        );
        Ok(true)
    }
}

/// Build the digest announcing one release.
pub fn build_digest(
    context: SinkContext,
    labels: &RepositoryLabels,
    target: &ReleaseTarget,
) -> Digest {
    Digest {
        subject: format!("Webhook-event-file {context}"),
        body: super::ledger::format_record(labels, &target.repository, &target.tag),
        repository: target.repository.clone(),
        tag: target.tag.clone(),
        name_label: labels.name_label.clone(),
        tag_label: labels.tag_label.clone(),
    }
}

#[async_trait]
impl NotifierSink for ReleaseNotifier {
    fn name(&self) -> &str {
        "release-notifier"
    }

    /// Every event is processed even if an earlier one fails; the first
    /// failure is returned.
    async fn offer(&self, offer: &Offer<'_>) -> Result<SinkResult, SinkError> {
        let mut result = SinkResult::skipped(self.name(), 0);
        let mut first_error = None;

        for event in offer.events {
            match self.announce(offer.context, event).await {
                Ok(true) => result.forwarded += 1,
                Ok(false) => result.skipped += 1,
                Err(e) => {
                    warn!(event_id = %event.id(), error = %e, "Release notice failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }
}
