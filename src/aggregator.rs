//! Accumulates a streamed reply: text grows verbatim, citations are
//! deduplicated by URI in first-seen order.

use crate::api::{Fragment, ResponseStream};
use crate::error::ServiceError;
use crate::models::GroundingSource;
use std::collections::HashSet;

/// Ordered set of grounding sources keyed by `uri`.
#[derive(Debug, Default, Clone)]
pub struct SourceSet {
    seen: HashSet<String>,
    sources: Vec<GroundingSource>,
}

impl SourceSet {
    /// Appends the sources whose URI was not seen yet and returns them.
    pub fn extend_new(&mut self, candidates: impl IntoIterator<Item = GroundingSource>) -> Vec<GroundingSource> {
        let mut added = Vec::new();
        for source in candidates {
            if self.seen.insert(source.uri.clone()) {
                self.sources.push(source.clone());
                added.push(source);
            }
        }
        added
    }

    pub fn as_slice(&self) -> &[GroundingSource] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.sources.clear();
    }

    pub fn into_vec(self) -> Vec<GroundingSource> {
        self.sources
    }
}

/// Display state after one fragment has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUpdate {
    pub accumulated_text: String,
    pub new_sources: Vec<GroundingSource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateStatus {
    Completed,
    Failed(ServiceError),
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateOutcome {
    pub text: String,
    pub sources: Vec<GroundingSource>,
    pub status: AggregateStatus,
    pub fragments_received: usize,
}

impl AggregateOutcome {
    /// Partial text survives a failure; the fallback only replaces an empty reply.
    pub fn display_text(&self, fallback: &str) -> String {
        match self.status {
            AggregateStatus::Failed(_) if self.text.is_empty() => fallback.to_string(),
            _ => self.text.clone(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, AggregateStatus::Failed(_))
    }
}

#[derive(Debug, Default)]
pub struct StreamAggregator {
    text: String,
    sources: SourceSet,
    fragments_received: usize,
    status: Option<AggregateStatus>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: Fragment) -> StreamUpdate {
        self.fragments_received += 1;
        self.text.push_str(&fragment.text);
        let new_sources = self.sources.extend_new(fragment.sources);
        StreamUpdate {
            accumulated_text: self.text.clone(),
            new_sources,
        }
    }

    /// Pulls one fragment and applies it. Returns `None` once the stream
    /// has terminated, either normally or with a service failure.
    pub async fn next_update(&mut self, stream: &mut ResponseStream) -> Option<StreamUpdate> {
        let fragment = self.next_fragment(stream).await?;
        Some(self.push(fragment))
    }

    /// Pulls the next well-formed fragment without applying it, so the
    /// caller can still decide to abandon the stream.
    pub async fn next_fragment(&mut self, stream: &mut ResponseStream) -> Option<Fragment> {
        if self.status.is_some() {
            return None;
        }
        loop {
            match stream.next().await {
                None => {
                    log::debug!("Stream exhausted after {} fragments", self.fragments_received);
                    self.status = Some(AggregateStatus::Completed);
                    return None;
                }
                Some(Ok(fragment)) => return Some(fragment),
                Some(Err(err)) if err.is_malformed_fragment() => {
                    log::warn!("Skipping malformed fragment: {}", err);
                }
                Some(Err(err)) => {
                    log::error!("Stream failed after {} fragments: {}", self.fragments_received, err);
                    stream.abandon();
                    self.status = Some(AggregateStatus::Failed(err));
                    return None;
                }
            }
        }
    }

    /// Stops consuming; the text gathered so far is kept.
    pub fn abandon(&mut self, stream: &mut ResponseStream) {
        stream.abandon();
        if self.status.is_none() {
            self.status = Some(AggregateStatus::Abandoned);
        }
    }

    /// Records a failure that happened before any stream was obtained.
    pub fn record_failure(&mut self, err: ServiceError) {
        if self.status.is_none() {
            self.status = Some(AggregateStatus::Failed(err));
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(self) -> AggregateOutcome {
        AggregateOutcome {
            text: self.text,
            sources: self.sources.into_vec(),
            status: self.status.unwrap_or(AggregateStatus::Abandoned),
            fragments_received: self.fragments_received,
        }
    }
}

/// Drains `stream`, reporting every applied fragment to `on_update`.
pub async fn aggregate(mut stream: ResponseStream, mut on_update: impl FnMut(&StreamUpdate)) -> AggregateOutcome {
    let mut aggregator = StreamAggregator::new();
    while let Some(update) = aggregator.next_update(&mut stream).await {
        on_update(&update);
    }
    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FragmentStream;
    use futures::stream;

    fn source(uri: &str) -> GroundingSource {
        GroundingSource { title: format!("title {uri}"), uri: uri.to_string() }
    }

    fn response(items: Vec<Result<Fragment, ServiceError>>) -> ResponseStream {
        let inner: FragmentStream = Box::pin(stream::iter(items));
        ResponseStream::new(inner)
    }

    #[tokio::test]
    async fn text_is_concatenated_verbatim() {
        let pieces = ["  Check", " the ", "", "valve\n", "  "];
        let items = pieces.iter().map(|p| Ok(Fragment::text(*p))).collect();
        let mut seen = Vec::new();
        let outcome = aggregate(response(items), |u| seen.push(u.accumulated_text.clone())).await;

        assert_eq!(outcome.text, pieces.concat());
        assert_eq!(outcome.status, AggregateStatus::Completed);
        assert_eq!(outcome.fragments_received, pieces.len());
        // grows monotonically
        for pair in seen.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }

    #[tokio::test]
    async fn sources_are_deduplicated_in_first_seen_order() {
        let items = vec![
            Ok(Fragment { text: "a".into(), sources: vec![source("u1"), source("u2")] }),
            Ok(Fragment { text: "b".into(), sources: vec![source("u2"), source("u3"), source("u1")] }),
            Ok(Fragment { text: "c".into(), sources: vec![source("u3")] }),
        ];
        let mut deltas = Vec::new();
        let outcome = aggregate(response(items), |u| deltas.push(u.new_sources.len())).await;

        let uris: Vec<_> = outcome.sources.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, ["u1", "u2", "u3"]);
        assert_eq!(deltas, [2, 1, 0]);
    }

    #[tokio::test]
    async fn malformed_fragments_are_skipped() {
        let items = vec![
            Ok(Fragment::text("one ")),
            Err(ServiceError::MalformedFragment("bad json".into())),
            Ok(Fragment::text("two")),
        ];
        let outcome = aggregate(response(items), |_| {}).await;
        assert_eq!(outcome.text, "one two");
        assert_eq!(outcome.status, AggregateStatus::Completed);
    }

    #[tokio::test]
    async fn failure_keeps_partial_text() {
        let items = vec![
            Ok(Fragment::text("partial")),
            Err(ServiceError::ServiceUnavailable("reset".into())),
            Ok(Fragment::text(" never seen")),
        ];
        let outcome = aggregate(response(items), |_| {}).await;
        assert_eq!(outcome.text, "partial");
        assert!(outcome.is_failure());
        assert_eq!(outcome.display_text("fallback"), "partial");
    }

    #[tokio::test]
    async fn failure_without_text_uses_fallback() {
        let items = vec![Err(ServiceError::Timeout("slow".into()))];
        let outcome = aggregate(response(items), |_| {}).await;
        assert_eq!(outcome.fragments_received, 0);
        assert_eq!(outcome.display_text("fallback"), "fallback");
    }

    #[tokio::test]
    async fn failure_after_only_empty_fragments_still_uses_fallback() {
        let items = vec![
            Ok(Fragment::text("")),
            Ok(Fragment { text: String::new(), sources: vec![source("u1")] }),
            Err(ServiceError::ServiceUnavailable("reset".into())),
        ];
        let outcome = aggregate(response(items), |_| {}).await;
        assert_eq!(outcome.fragments_received, 2);
        assert_eq!(outcome.display_text("fallback"), "fallback");
        assert_eq!(outcome.sources.len(), 1);
    }

    #[tokio::test]
    async fn abandon_stops_consumption() {
        let mut stream = response(vec![Ok(Fragment::text("a")), Ok(Fragment::text("b"))]);
        let mut aggregator = StreamAggregator::new();
        assert!(aggregator.next_update(&mut stream).await.is_some());
        aggregator.abandon(&mut stream);
        assert!(aggregator.next_update(&mut stream).await.is_none());

        let outcome = aggregator.finish();
        assert_eq!(outcome.text, "a");
        assert_eq!(outcome.status, AggregateStatus::Abandoned);
        assert_eq!(outcome.display_text("fallback"), "a");
    }

    #[test]
    fn source_set_ignores_repeats() {
        let mut set = SourceSet::default();
        assert_eq!(set.extend_new(vec![source("x"), source("x")]).len(), 1);
        assert!(set.extend_new(vec![source("x")]).is_empty());
        assert_eq!(set.len(), 1);
        set.clear();
        assert!(set.is_empty());
    }
}
