// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The single interception point around `Model::pipe`.
//!
//! On entry: derive the cache key, probe the cache, start the progress
//! display.  On exit: write the cache, stop the display, emit the token
//! event.  Errors pass through unchanged — never cached, never counted.
//!
//! The function is re-entrant: nested model calls during tool execution each
//! take their own display and cache context.

use tracing::debug;

use conduit_model::{GenerationOutcome, GenerationRequest, GenerationResult, Model, Role};
use conduit_storage::{OdometerRegistry, TokenEvent};

use crate::display::ProgressHandle;
use crate::options::ConduitOptions;

/// Run one request through the full middleware chain.
pub async fn call(
    model: &Model,
    request: &GenerationRequest,
    options: &ConduitOptions,
    odometer: &OdometerRegistry,
) -> GenerationResult {
    let preview = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role() == Role::User)
        .map(|m| m.text())
        .unwrap_or_default();
    let progress = ProgressHandle::start(
        options.console.clone(),
        options.verbosity,
        model.name(),
        &preview,
    );

    // Cache probe.  Streaming requests bypass the cache: a stream handle is
    // not a value that can be replayed from storage.
    if !request.params.stream {
        if let Some(cache) = &options.cache {
            if let Some(mut cached) = cache.check(request) {
                debug!(model = model.name(), "cache hit");
                cached.metadata.cache_hit = true;
                progress.cached();
                // A cache hit performs no provider call and emits no event.
                return Ok(GenerationOutcome::Response(cached));
            }
        }
    }

    match model.pipe(request).await {
        Ok(GenerationOutcome::Response(response)) => {
            if !request.params.stream {
                if let Some(cache) = &options.cache {
                    cache.store(request, &response);
                }
            }
            odometer.record(TokenEvent::new(
                model.provider(),
                model.name(),
                response.metadata.input_tokens,
                response.metadata.output_tokens,
            ));
            progress.complete();
            Ok(GenerationOutcome::Response(response))
        }
        Ok(GenerationOutcome::Stream(handle)) => {
            // The stream's token event is emitted by whoever drains it, from
            // the end-of-stream usage frames.
            progress.complete();
            Ok(GenerationOutcome::Stream(handle))
        }
        Err(error) => {
            progress.fail(&error);
            Err(error)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use conduit_config::{Settings, Verbosity};
    use conduit_model::clients::mock::{MockClient, MockReply};
    use conduit_model::{ConduitError, ExecutionMode, GenerationParams, ModelStore};
    use conduit_storage::ConduitCache;

    use super::*;
    use crate::display::Console;

    fn harness() -> (Model, Arc<MockClient>, OdometerRegistry) {
        let store = ModelStore::new(Settings::default());
        let mock = Arc::new(MockClient::new());
        store.register_client("mock-model", ExecutionMode::Async, mock.clone());
        let model = Model::resolve(&store, "mock-model", ExecutionMode::Async).unwrap();
        (model, mock, OdometerRegistry::in_memory())
    }

    fn options() -> ConduitOptions {
        ConduitOptions {
            verbosity: Verbosity::Silent,
            console: Console::Null,
            ..ConduitOptions::new("test")
        }
    }

    fn request(model: &Model, prompt: &str) -> GenerationRequest {
        model
            .prepare_request(prompt, GenerationParams::new("mock-model"))
            .unwrap()
    }

    #[tokio::test]
    async fn successful_call_emits_one_token_event() {
        let (model, mock, odometer) = harness();
        let req = request(&model, "Name one mammal.");
        let out = call(&model, &req, &options(), &odometer).await.unwrap();
        let resp = out.into_response().unwrap();
        assert!(!resp.text().is_empty());
        assert_eq!(mock.call_count(), 1);
        assert_eq!(odometer.with_session(|o| o.event_count()), 1);
        let totals = odometer.with_session(|o| o.totals());
        assert_eq!(totals.input, 10);
        assert_eq!(totals.output, 5);
    }

    #[tokio::test]
    async fn cache_hit_skips_provider_and_telemetry() {
        let (model, mock, odometer) = harness();
        let cache = Arc::new(ConduitCache::in_memory().unwrap());
        let mut opts = options();
        opts.cache = Some(cache);
        let req = request(&model, "Name one mammal.");

        let first = call(&model, &req, &opts, &odometer)
            .await
            .unwrap()
            .into_response()
            .unwrap();
        assert!(!first.metadata.cache_hit);

        let second = call(&model, &req, &opts, &odometer)
            .await
            .unwrap()
            .into_response()
            .unwrap();
        assert!(second.metadata.cache_hit);
        assert_eq!(second.text(), first.text());
        // One provider call, one token event, across both runs.
        assert_eq!(mock.call_count(), 1);
        assert_eq!(odometer.with_session(|o| o.event_count()), 1);
    }

    #[tokio::test]
    async fn error_is_not_cached_and_emits_no_event() {
        let (model, mock, odometer) = harness();
        let cache = Arc::new(ConduitCache::in_memory().unwrap());
        let mut opts = options();
        opts.cache = Some(cache.clone());
        mock.push_reply(MockReply::Error(ConduitError::provider_status(500, "boom")));
        let req = request(&model, "q");

        let err = call(&model, &req, &opts, &odometer).await.unwrap_err();
        assert_eq!(err.info.code, "provider_5xx");
        assert_eq!(odometer.with_session(|o| o.event_count()), 0);
        assert_eq!(cache.stats().total_entries, 0);

        // The next call reaches the provider again (the failure was not
        // served from cache).
        let ok = call(&model, &req, &opts, &odometer).await;
        assert!(ok.is_ok());
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn streaming_bypasses_cache_and_defers_telemetry() {
        let (model, mock, odometer) = harness();
        let cache = Arc::new(ConduitCache::in_memory().unwrap());
        let mut opts = options();
        opts.cache = Some(cache.clone());
        mock.push_reply(MockReply::Stream(vec!["a".into()]));

        let mut req = request(&model, "q");
        req.params.stream = true;
        let out = call(&model, &req, &opts, &odometer).await.unwrap();
        assert!(matches!(out, GenerationOutcome::Stream(_)));
        assert_eq!(cache.stats().total_entries, 0);
        assert_eq!(odometer.with_session(|o| o.event_count()), 0);
    }

    #[tokio::test]
    async fn nested_calls_each_record() {
        let (model, _mock, odometer) = harness();
        let opts = options();
        let outer = request(&model, "outer");
        let inner = request(&model, "inner");
        // Sequential nested-style calls against the same context.
        call(&model, &outer, &opts, &odometer).await.unwrap();
        call(&model, &inner, &opts, &odometer).await.unwrap();
        assert_eq!(odometer.with_session(|o| o.event_count()), 2);
    }
}
