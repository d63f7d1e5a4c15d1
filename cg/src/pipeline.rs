//! Course generation pipeline
//!
//! Validates a request, plans the outline, runs the chapter scheduler and
//! saves the finished course exactly once. Nothing is persisted unless every
//! chapter completed and the run was not cancelled.

use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cancel::{CancellationToken, ensure_active, run_until_cancelled};
use crate::config::Config;
use crate::domain::{CourseDraft, CourseId, CourseMeta, CourseRequest};
use crate::error::CourseError;
use crate::events::{EventBus, EventEmitter, PipelineState, StopReason};
use crate::llm::CompletionProvider;
use crate::planning::{OutlinePlanner, PlannerConfig};
use crate::prompts::PromptLoader;
use crate::scheduler::{ChapterScheduler, DraftView, SchedulerConfig};
use crate::store::CourseStore;

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub min_chapters: u32,
    pub max_chapters: u32,
    pub planner: PlannerConfig,
    pub scheduler: SchedulerConfig,
    /// Label of the model serving the run, appended to course tags
    pub model_label: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            min_chapters: 3,
            max_chapters: 20,
            planner: PlannerConfig::default(),
            scheduler: SchedulerConfig::default(),
            model_label: None,
        }
    }
}

impl GenerationSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_chapters: config.generation.min_chapters,
            max_chapters: config.generation.max_chapters,
            planner: config.planner_config(),
            scheduler: config.scheduler_config(),
            model_label: None,
        }
    }

    pub fn with_model_label(mut self, label: impl Into<String>) -> Self {
        self.model_label = Some(label.into());
        self
    }
}

/// A saved course
#[derive(Debug, Clone)]
pub struct GeneratedCourse {
    pub id: CourseId,
    pub run_id: String,
    pub draft: CourseDraft,
}

/// Runs one course request from topic to saved course
pub struct CourseGenerator {
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn CourseStore>,
    prompts: Arc<PromptLoader>,
    events: Arc<EventBus>,
    settings: GenerationSettings,
}

impl CourseGenerator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn CourseStore>,
        prompts: Arc<PromptLoader>,
        events: Arc<EventBus>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            provider,
            store,
            prompts,
            events,
            settings,
        }
    }

    /// Reject a request before any provider call
    pub fn validate_request(&self, request: &CourseRequest) -> Result<(), CourseError> {
        if request.topic.trim().is_empty() {
            return Err(CourseError::Validation("topic must not be empty".to_string()));
        }
        let (min, max) = (self.settings.min_chapters, self.settings.max_chapters);
        if !(min..=max).contains(&request.chapter_count) {
            return Err(CourseError::Validation(format!(
                "chapter count must be between {} and {}, got {}",
                min, max, request.chapter_count
            )));
        }
        Ok(())
    }

    /// Generate and save a course
    ///
    /// `draft` is loaded with the outline once it is ready and then tracks
    /// every chapter; it stays readable after failure or cancellation.
    pub async fn generate(
        &self,
        request: &CourseRequest,
        draft: &DraftView,
        cancel: &CancellationToken,
    ) -> Result<GeneratedCourse, CourseError> {
        let run_id = Uuid::now_v7().to_string();
        debug!(%run_id, topic = %request.topic, model = %request.model, "CourseGenerator::generate: called");
        let emitter = self.events.emitter_for(run_id.clone());

        let result = self.run(request, draft, cancel, &emitter).await;
        emitter.state_changed(PipelineState::Finalized);
        match result {
            Ok((id, course)) => {
                info!(%run_id, course_id = %id, chapters = course.chapters.len(), "course generated");
                emitter.course_saved(&id, course.chapters.len());
                Ok(GeneratedCourse {
                    id,
                    run_id,
                    draft: course,
                })
            }
            Err(e) if e.is_cancelled() => {
                info!(%run_id, "generation stopped by user");
                emitter.generation_stopped(StopReason::Cancelled);
                Err(e)
            }
            Err(e) => {
                error!(%run_id, error = %e, "generation failed");
                emitter.generation_stopped(StopReason::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &CourseRequest,
        draft: &DraftView,
        cancel: &CancellationToken,
        emitter: &EventEmitter,
    ) -> Result<(CourseId, CourseDraft), CourseError> {
        self.validate_request(request)?;
        ensure_active(cancel)?;

        emitter.state_changed(PipelineState::Planning);
        let planner = OutlinePlanner::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.prompts),
            self.settings.planner.clone(),
        );
        let outline = run_until_cancelled(cancel, planner.plan(request))
            .await
            .ok_or(CourseError::Cancelled)??;

        let mut meta = CourseMeta::from_outline(&outline);
        if let Some(label) = &self.settings.model_label {
            meta = meta.with_tag(label.as_str());
        }
        draft.load_outline(&outline);
        emitter.outline_ready(&outline.course_name, &outline.chapters);

        emitter.state_changed(PipelineState::Dispatching);
        let scheduler = ChapterScheduler::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.prompts),
            self.settings.scheduler.clone(),
            emitter.clone(),
        );
        let chapters = scheduler.run(&outline, &meta, draft, cancel).await?;

        emitter.state_changed(PipelineState::Draining);
        let course = CourseDraft::assemble(meta, chapters);

        // Last gate before the store
        ensure_active(cancel)?;
        match self.store.save(&course.meta, &course.chapters).await {
            Ok(id) => Ok((id, course)),
            Err(e) => Err(CourseError::Persistence {
                message: e.to_string(),
                draft: Box::new(course),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChapterKind, ChapterStatus, Difficulty, ModelSelector};
    use crate::events::CourseEvent;
    use crate::llm::client::mock::{MockProvider, ScriptedStream};
    use crate::store::MemoryCourseStore;
    use std::time::Duration;

    const OUTLINE: &str = r#"{
        "courseName": "Rust Basics",
        "description": "Learn Rust",
        "tags": ["rust"],
        "chapters": [
            {"index": 1, "title": "Ownership", "summary": "", "kind": "lesson"},
            {"index": 2, "title": "Borrowing", "summary": "", "kind": "lesson"},
            {"index": 3, "title": "Practice", "summary": "", "kind": "exercise"},
            {"index": 4, "title": "Final", "summary": "", "kind": "exam"}
        ]
    }"#;

    fn request(topic: &str, chapters: u32) -> CourseRequest {
        CourseRequest {
            topic: topic.to_string(),
            chapter_count: chapters,
            difficulty: Difficulty::Beginner,
            model: ModelSelector::Auto,
        }
    }

    fn generator(
        provider: Arc<MockProvider>,
        store: Arc<MemoryCourseStore>,
        bus: Arc<EventBus>,
    ) -> CourseGenerator {
        CourseGenerator::new(
            provider,
            store,
            Arc::new(PromptLoader::embedded_only()),
            bus,
            GenerationSettings::default().with_model_label("gpt-4o (openai)"),
        )
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<CourseEvent>) -> Vec<CourseEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_generate_saves_ordered_course() {
        let provider = Arc::new(
            MockProvider::new()
                .with_completion(OUTLINE)
                .with_stream("Ownership", ScriptedStream::new(&["own"]).with_delay(Duration::from_millis(30)))
                .with_stream("Borrowing", ScriptedStream::new(&["borrow"])),
        );
        let store = Arc::new(MemoryCourseStore::new());
        let bus = Arc::new(EventBus::new(1000));
        let mut rx = bus.subscribe();
        let draft = DraftView::empty();

        let course = generator(provider.clone(), store.clone(), bus)
            .generate(&request("Rust", 4), &draft, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.save_count(), 1);
        let saved = store.get(course.id.as_str()).await.unwrap();
        let indices: Vec<u32> = saved.chapters.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert_eq!(saved.chapters[0].content, "own");
        assert_eq!(saved.chapters[1].content, "borrow");
        assert_eq!(saved.meta.tags, vec!["rust", "gpt-4o (openai)"]);
        assert!(draft.snapshot().iter().all(|c| c.status == ChapterStatus::Completed));

        // One outline call plus one stream per chapter
        assert_eq!(provider.call_count(), 5);

        let events = drain(&mut rx);
        let states: Vec<PipelineState> = events
            .iter()
            .filter_map(|e| match e {
                CourseEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                PipelineState::Planning,
                PipelineState::Dispatching,
                PipelineState::Draining,
                PipelineState::Finalized
            ]
        );
        assert!(matches!(events.last(), Some(CourseEvent::CourseSaved { .. })));
        assert!(events.iter().any(|e| matches!(e, CourseEvent::OutlineReady { chapters, .. } if chapters.len() == 4)));
    }

    #[tokio::test]
    async fn test_validation_rejects_before_provider_call() {
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(MemoryCourseStore::new());
        let generator = generator(provider.clone(), store.clone(), Arc::new(EventBus::new(100)));
        let draft = DraftView::empty();

        for req in [request("  ", 5), request("Rust", 2), request("Rust", 21)] {
            let result = generator.generate(&req, &draft, &CancellationToken::new()).await;
            assert!(matches!(result, Err(CourseError::Validation(_))));
        }
        assert_eq!(provider.call_count(), 0);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_outline_saves_nothing() {
        let slow = ScriptedStream::new(&["a", "b", "c"]).with_delay(Duration::from_millis(200));
        let provider = Arc::new(
            MockProvider::new()
                .with_completion(OUTLINE)
                .with_stream("Ownership", slow.clone())
                .with_stream("Borrowing", slow),
        );
        let store = Arc::new(MemoryCourseStore::new());
        let bus = Arc::new(EventBus::new(1000));
        let mut rx = bus.subscribe();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        let mut watcher = bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = watcher.recv().await {
                if matches!(event, CourseEvent::OutlineReady { .. }) {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    canceller.cancel();
                    break;
                }
            }
        });

        let draft = DraftView::empty();
        let result = generator(provider, store.clone(), bus)
            .generate(&request("Rust", 4), &draft, &cancel)
            .await;

        assert!(matches!(result, Err(CourseError::Cancelled)));
        assert_eq!(store.save_count(), 0);
        assert!(draft.snapshot().iter().all(|c| c.status == ChapterStatus::Aborted));
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(CourseEvent::GenerationStopped {
                reason: StopReason::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_planning() {
        let provider = Arc::new(MockProvider::new().with_completion(OUTLINE));
        let store = Arc::new(MemoryCourseStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = generator(provider.clone(), store.clone(), Arc::new(EventBus::new(100)))
            .generate(&request("Rust", 4), &DraftView::empty(), &cancel)
            .await;
        assert!(matches!(result, Err(CourseError::Cancelled)));
        assert_eq!(provider.call_count(), 0);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_chapter_failure_saves_nothing() {
        let provider = Arc::new(
            MockProvider::new()
                .with_completion(OUTLINE)
                .with_stream("Borrowing", ScriptedStream::new(&["partial"]).failing("overloaded")),
        );
        let store = Arc::new(MemoryCourseStore::new());
        let bus = Arc::new(EventBus::new(1000));
        let mut rx = bus.subscribe();

        let result = generator(provider, store.clone(), bus)
            .generate(&request("Rust", 4), &DraftView::empty(), &CancellationToken::new())
            .await;

        match result {
            Err(CourseError::Generation { index, .. }) => assert_eq!(index, 2),
            other => panic!("Expected Generation error, got {other:?}"),
        }
        assert_eq!(store.save_count(), 0);
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(CourseEvent::GenerationStopped {
                reason: StopReason::Failed { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_bad_outline_dispatches_nothing() {
        let provider = Arc::new(MockProvider::new().with_completion("not json"));
        let store = Arc::new(MemoryCourseStore::new());

        let result = generator(provider.clone(), store.clone(), Arc::new(EventBus::new(100)))
            .generate(&request("Rust", 4), &DraftView::empty(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(CourseError::OutlineParse(_))));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_save_failure_returns_draft() {
        // Empty content fails the store's save checks
        let provider = Arc::new(
            MockProvider::new()
                .with_completion(OUTLINE)
                .with_stream("Final", ScriptedStream::new(&["   "])),
        );
        let store = Arc::new(MemoryCourseStore::new());

        let result = generator(provider, store.clone(), Arc::new(EventBus::new(100)))
            .generate(&request("Rust", 4), &DraftView::empty(), &CancellationToken::new())
            .await;

        match result {
            Err(CourseError::Persistence { draft, .. }) => {
                assert_eq!(draft.chapters.len(), 4);
                assert_eq!(draft.meta.name, "Rust Basics");
            }
            other => panic!("Expected Persistence error, got {other:?}"),
        }
        assert_eq!(store.save_count(), 1);
    }
}
