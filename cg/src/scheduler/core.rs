//! Chapter scheduler implementation
//!
//! Lessons run concurrently, then exercises and exams run one at a time in
//! outline order, each seeing every chapter completed before it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::SchedulerConfig;
use super::draft::DraftView;
use super::task::{GenerationTask, partition};
use crate::cancel::ensure_active;
use crate::domain::{ChapterStatus, ChapterStub, ContextChapter, CourseMeta, DraftChapter, Outline};
use crate::error::CourseError;
use crate::events::EventEmitter;
use crate::llm::{CompletionProvider, ProviderError};
use crate::prompts::{ChapterContext, ChapterRequestContext, PromptLoader};
use crate::session::{ConversationSession, SessionConfig};

/// Rendered prompts for one chapter
#[derive(Debug, Clone)]
struct ChapterPrompt {
    system: String,
    user: String,
}

/// Runs the chapter tasks of one outline
pub struct ChapterScheduler {
    provider: Arc<dyn CompletionProvider>,
    prompts: Arc<PromptLoader>,
    config: SchedulerConfig,
    events: EventEmitter,
}

impl ChapterScheduler {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        prompts: Arc<PromptLoader>,
        config: SchedulerConfig,
        events: EventEmitter,
    ) -> Self {
        debug!(?config, "ChapterScheduler::new: called");
        Self {
            provider,
            prompts,
            config,
            events,
        }
    }

    /// Generate every chapter of `outline`
    ///
    /// Returns the completed chapters ascending by index. On failure or
    /// cancellation every chapter that did not finish is marked Aborted in
    /// `draft`, and nothing is returned for persistence.
    pub async fn run(
        &self,
        outline: &Outline,
        meta: &CourseMeta,
        draft: &DraftView,
        cancel: &CancellationToken,
    ) -> Result<Vec<DraftChapter>, CourseError> {
        let (independent, dependent) = partition(&outline.chapters);
        info!(
            independent = independent.len(),
            dependent = dependent.len(),
            "scheduling chapters"
        );

        let runner = ChapterRunner {
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
            draft: draft.clone(),
            events: self.events.clone(),
        };
        let mut completed = BTreeMap::new();

        let mut result = self
            .run_independent(&runner, meta, independent, cancel, &mut completed)
            .await;
        if result.is_ok() {
            result = self
                .run_dependent(&runner, meta, dependent, cancel, &mut completed)
                .await;
        }

        if let Err(e) = result {
            self.abort_unfinished(draft, outline.chapters.iter().map(|c| c.index));
            return Err(e);
        }
        Ok(completed.into_values().collect())
    }

    /// All lessons at once; the first failure cancels the rest of the phase
    async fn run_independent(
        &self,
        runner: &ChapterRunner,
        meta: &CourseMeta,
        stubs: Vec<ChapterStub>,
        cancel: &CancellationToken,
        completed: &mut BTreeMap<u32, DraftChapter>,
    ) -> Result<(), CourseError> {
        if stubs.is_empty() {
            return Ok(());
        }
        ensure_active(cancel)?;

        let mut prepared = Vec::with_capacity(stubs.len());
        for stub in stubs {
            let task = GenerationTask::new(stub, Vec::new());
            let prompt = self.render_prompt(meta, &task)?;
            prepared.push((task, prompt));
        }

        let phase = cancel.child_token();
        let mut set = JoinSet::new();
        for (task, prompt) in prepared {
            set.spawn(runner.clone().run(task, prompt, phase.child_token()));
        }
        debug!(spawned = set.len(), "run_independent: tasks spawned");

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let failure = match joined {
                Ok(task) if task.status == ChapterStatus::Completed => {
                    completed.insert(task.index(), task.to_draft());
                    None
                }
                Ok(task) if task.status == ChapterStatus::Failed => Some(task.into_error()),
                Ok(_) => None,
                Err(e) => Some(CourseError::Internal(format!("chapter task panicked: {}", e))),
            };
            if let Some(err) = failure
                && first_error.is_none()
            {
                warn!(error = %err, "chapter failed, cancelling sibling chapters");
                phase.cancel();
                first_error = Some(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => ensure_active(cancel),
        }
    }

    /// Exercises and exams, strictly in order
    async fn run_dependent(
        &self,
        runner: &ChapterRunner,
        meta: &CourseMeta,
        stubs: Vec<ChapterStub>,
        cancel: &CancellationToken,
        completed: &mut BTreeMap<u32, DraftChapter>,
    ) -> Result<(), CourseError> {
        for stub in stubs {
            ensure_active(cancel)?;
            let snapshot: Vec<ContextChapter> = completed.values().map(ContextChapter::from).collect();
            let task = GenerationTask::new(stub, snapshot);
            let prompt = self.render_prompt(meta, &task)?;

            let task = runner.clone().run(task, prompt, cancel.child_token()).await;
            if task.status != ChapterStatus::Completed {
                return Err(task.into_error());
            }
            completed.insert(task.index(), task.to_draft());
        }
        Ok(())
    }

    fn render_prompt(&self, meta: &CourseMeta, task: &GenerationTask) -> Result<ChapterPrompt, CourseError> {
        let prompt_err = |e: eyre::Report| CourseError::Prompt(e.to_string());
        let system = self
            .prompts
            .render("chapter", &ChapterContext::new(meta, &task.context_snapshot))
            .map_err(prompt_err)?;
        let request = ChapterRequestContext::new(&task.stub).map_err(prompt_err)?;
        let user = self.prompts.render("chapter-request", &request).map_err(prompt_err)?;
        Ok(ChapterPrompt { system, user })
    }

    fn abort_unfinished(&self, draft: &DraftView, indices: impl IntoIterator<Item = u32>) {
        for index in draft.abort_unfinished(indices) {
            self.events.chapter_status(index, ChapterStatus::Aborted);
        }
    }
}

/// Everything one chapter task needs, cloned into its future
#[derive(Clone)]
struct ChapterRunner {
    provider: Arc<dyn CompletionProvider>,
    config: SchedulerConfig,
    draft: DraftView,
    events: EventEmitter,
}

impl ChapterRunner {
    async fn run(self, mut task: GenerationTask, prompt: ChapterPrompt, cancel: CancellationToken) -> GenerationTask {
        let index = task.index();
        if cancel.is_cancelled() || !task.start() {
            task.abort();
            self.publish(&task);
            return task;
        }
        self.publish(&task);

        let mut session = ConversationSession::new(
            Arc::clone(&self.provider),
            SessionConfig {
                system_prompt: Some(prompt.system),
                max_history: self.config.max_history,
                params: self.config.session_params(),
            },
        );

        let draft = &self.draft;
        let events = &self.events;
        let content = &mut task.accumulated_content;
        let result = session
            .send_streaming(
                &prompt.user,
                None,
                Some(&cancel),
                |delta| {
                    content.push_str(delta);
                    draft.append_content(index, delta);
                    events.chapter_delta(index, delta, content.len());
                },
                |_| {},
            )
            .await;

        match result {
            Ok(reply) => {
                info!(index, len = task.accumulated_content.len(), tokens = reply.usage.total_tokens, "chapter completed");
                task.complete();
            }
            Err(ProviderError::Cancelled) => {
                debug!(index, "chapter aborted");
                task.abort();
            }
            Err(e) => {
                warn!(index, error = %e, "chapter failed");
                task.fail(e);
            }
        }
        self.publish(&task);
        task
    }

    fn publish(&self, task: &GenerationTask) {
        self.draft.set_status(task.index(), task.status);
        self.events.chapter_status(task.index(), task.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChapterKind;
    use crate::events::{CourseEvent, EventBus};
    use crate::llm::Role;
    use crate::llm::client::mock::{MockProvider, ScriptedStream};
    use std::time::Duration;

    fn outline(chapters: &[(&str, ChapterKind)]) -> Outline {
        Outline {
            course_name: "Rust".to_string(),
            description: "A course".to_string(),
            tags: vec!["rust".to_string()],
            chapters: chapters
                .iter()
                .enumerate()
                .map(|(i, (title, kind))| ChapterStub {
                    index: i as u32 + 1,
                    title: title.to_string(),
                    summary: String::new(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    fn scheduler(provider: Arc<MockProvider>, bus: &EventBus) -> ChapterScheduler {
        ChapterScheduler::new(
            provider,
            Arc::new(PromptLoader::embedded_only()),
            SchedulerConfig::default(),
            bus.emitter_for("test-run"),
        )
    }

    fn statuses(draft: &DraftView) -> Vec<ChapterStatus> {
        draft.snapshot().iter().map(|c| c.status).collect()
    }

    #[tokio::test]
    async fn test_lessons_then_exercise_with_context() {
        let provider = Arc::new(
            MockProvider::new()
                .with_stream("Alpha", ScriptedStream::new(&["alpha ", "body"]))
                .with_stream("Bravo", ScriptedStream::new(&["bravo body"]))
                .with_stream("Charlie", ScriptedStream::new(&["charlie body"]).with_delay(Duration::from_millis(20))),
        );
        let bus = EventBus::new(1000);
        let outline = outline(&[
            ("Alpha", ChapterKind::Lesson),
            ("Bravo", ChapterKind::Exercise),
            ("Charlie", ChapterKind::Lesson),
        ]);
        let meta = CourseMeta::from_outline(&outline);
        let draft = DraftView::from_outline(&outline);

        let chapters = scheduler(provider.clone(), &bus)
            .run(&outline, &meta, &draft, &CancellationToken::new())
            .await
            .unwrap();

        let order: Vec<u32> = chapters.iter().map(|c| c.index).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(chapters[0].content, "alpha body");
        assert_eq!(chapters[1].content, "bravo body");

        // The exercise ran last and saw both lessons, in index order
        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        let bravo = &requests[2];
        assert!(bravo.last_user_text().unwrap().contains("Bravo"));
        let system = &bravo.messages[0];
        assert_eq!(system.role, Role::System);
        let alpha_at = system.content.find("Chapter 1: Alpha").unwrap();
        let charlie_at = system.content.find("Chapter 3: Charlie").unwrap();
        assert!(alpha_at < charlie_at);
        assert!(system.content.contains("charlie body"));

        assert!(statuses(&draft).iter().all(|s| *s == ChapterStatus::Completed));
    }

    #[tokio::test]
    async fn test_later_assessment_sees_earlier_assessment() {
        let provider = Arc::new(
            MockProvider::new()
                .with_stream("Quiz", ScriptedStream::new(&["quiz body"]))
                .with_stream("Final", ScriptedStream::new(&["final body"])),
        );
        let bus = EventBus::new(1000);
        let outline = outline(&[
            ("Intro", ChapterKind::Lesson),
            ("Quiz", ChapterKind::Exercise),
            ("Final", ChapterKind::Exam),
        ]);
        let meta = CourseMeta::from_outline(&outline);
        let draft = DraftView::from_outline(&outline);

        scheduler(provider.clone(), &bus)
            .run(&outline, &meta, &draft, &CancellationToken::new())
            .await
            .unwrap();

        let requests = provider.requests();
        let quiz = &requests[1].messages[0].content;
        let exam = &requests[2].messages[0].content;
        assert!(quiz.contains("Chapter 1: Intro"));
        assert!(!quiz.contains("Chapter 2: Quiz"));
        assert!(exam.contains("Chapter 1: Intro"));
        assert!(exam.contains("quiz body"));
    }

    #[tokio::test]
    async fn test_lesson_failure_cancels_siblings_and_skips_dependents() {
        let provider = Arc::new(
            MockProvider::new()
                .with_stream("Alpha", ScriptedStream::new(&["done"]))
                .with_stream(
                    "Bravo",
                    ScriptedStream::new(&["partial"])
                        .with_delay(Duration::from_millis(20))
                        .failing("upstream overloaded"),
                )
                .with_stream(
                    "Charlie",
                    ScriptedStream::new(&["a", "b", "c"]).with_delay(Duration::from_secs(5)),
                ),
        );
        let bus = EventBus::new(1000);
        let outline = outline(&[
            ("Alpha", ChapterKind::Lesson),
            ("Bravo", ChapterKind::Lesson),
            ("Charlie", ChapterKind::Lesson),
            ("Delta", ChapterKind::Exam),
        ]);
        let meta = CourseMeta::from_outline(&outline);
        let draft = DraftView::from_outline(&outline);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            scheduler(provider.clone(), &bus).run(&outline, &meta, &draft, &CancellationToken::new()),
        )
        .await
        .unwrap();

        match result {
            Err(CourseError::Generation { index, .. }) => assert_eq!(index, 2),
            other => panic!("Expected Generation error, got {other:?}"),
        }
        assert_eq!(
            statuses(&draft),
            vec![
                ChapterStatus::Completed,
                ChapterStatus::Failed,
                ChapterStatus::Aborted,
                ChapterStatus::Aborted
            ]
        );
        assert_eq!(draft.chapter(1).unwrap().content, "done");
        // The exam was never requested
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_aborts_everything() {
        let provider = Arc::new(MockProvider::new().with_stream(
            "Alpha",
            ScriptedStream::new(&["one", "two", "three"]).with_delay(Duration::from_millis(30)),
        ));
        let bus = EventBus::new(1000);
        let mut rx = bus.subscribe();
        let outline = outline(&[("Alpha", ChapterKind::Lesson), ("Bravo", ChapterKind::Exercise)]);
        let meta = CourseMeta::from_outline(&outline);
        let draft = DraftView::from_outline(&outline);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if matches!(event, CourseEvent::ChapterDelta { .. }) {
                    canceller.cancel();
                    break;
                }
            }
        });

        let result = scheduler(provider.clone(), &bus).run(&outline, &meta, &draft, &cancel).await;

        assert!(matches!(result, Err(CourseError::Cancelled)));
        assert_eq!(statuses(&draft), vec![ChapterStatus::Aborted, ChapterStatus::Aborted]);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exercise_failure_skips_later_exam() {
        let provider = Arc::new(
            MockProvider::new()
                .with_stream("Intro", ScriptedStream::new(&["intro body"]))
                .with_stream("Quiz", ScriptedStream::new(&["half a quiz"]).failing("upstream overloaded"))
                .with_stream("Final", ScriptedStream::new(&["final body"])),
        );
        let bus = EventBus::new(1000);
        let outline = outline(&[
            ("Intro", ChapterKind::Lesson),
            ("Quiz", ChapterKind::Exercise),
            ("Final", ChapterKind::Exam),
        ]);
        let meta = CourseMeta::from_outline(&outline);
        let draft = DraftView::from_outline(&outline);

        let result = scheduler(provider.clone(), &bus)
            .run(&outline, &meta, &draft, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(CourseError::Generation { index: 2, .. })));
        assert_eq!(
            statuses(&draft),
            vec![ChapterStatus::Completed, ChapterStatus::Failed, ChapterStatus::Aborted]
        );
        assert_eq!(draft.chapter(1).unwrap().content, "intro body");
        assert_eq!(provider.call_count(), 2);
        assert!(
            !provider
                .requests()
                .iter()
                .any(|r| r.last_user_text().unwrap_or_default().contains("Final"))
        );
    }

    #[tokio::test]
    async fn test_cancel_during_exercise_skips_later_exam() {
        let provider = Arc::new(
            MockProvider::new()
                .with_stream("Intro", ScriptedStream::new(&["intro body"]))
                .with_stream(
                    "Quiz",
                    ScriptedStream::new(&["one", "two", "three"]).with_delay(Duration::from_millis(30)),
                )
                .with_stream("Final", ScriptedStream::new(&["final body"])),
        );
        let bus = EventBus::new(1000);
        let mut rx = bus.subscribe();
        let outline = outline(&[
            ("Intro", ChapterKind::Lesson),
            ("Quiz", ChapterKind::Exercise),
            ("Final", ChapterKind::Exam),
        ]);
        let meta = CourseMeta::from_outline(&outline);
        let draft = DraftView::from_outline(&outline);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if matches!(event, CourseEvent::ChapterDelta { index: 2, .. }) {
                    canceller.cancel();
                    break;
                }
            }
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            scheduler(provider.clone(), &bus).run(&outline, &meta, &draft, &cancel),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(CourseError::Cancelled)));
        assert_eq!(
            statuses(&draft),
            vec![ChapterStatus::Completed, ChapterStatus::Aborted, ChapterStatus::Aborted]
        );
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_content_len_is_monotonic() {
        let provider = Arc::new(
            MockProvider::new()
                .with_stream("Alpha", ScriptedStream::new(&["a", "bb", "ccc"]))
                .with_stream("Bravo", ScriptedStream::new(&["x", "yy"])),
        );
        let bus = EventBus::new(1000);
        let mut rx = bus.subscribe();
        let outline = outline(&[("Alpha", ChapterKind::Lesson), ("Bravo", ChapterKind::Lesson)]);
        let meta = CourseMeta::from_outline(&outline);
        let draft = DraftView::from_outline(&outline);

        scheduler(provider, &bus)
            .run(&outline, &meta, &draft, &CancellationToken::new())
            .await
            .unwrap();

        let mut last: BTreeMap<u32, usize> = BTreeMap::new();
        while let Ok(event) = rx.try_recv() {
            if let CourseEvent::ChapterDelta { index, content_len, .. } = event {
                let previous = last.insert(index, content_len).unwrap_or(0);
                assert!(content_len > previous);
            }
        }
        assert_eq!(last.get(&1), Some(&6));
        assert_eq!(last.get(&2), Some(&3));
    }

    #[tokio::test]
    async fn test_precancelled_run_starts_nothing() {
        let provider = Arc::new(MockProvider::new());
        let bus = EventBus::new(1000);
        let outline = outline(&[("Alpha", ChapterKind::Lesson), ("Bravo", ChapterKind::Exam)]);
        let meta = CourseMeta::from_outline(&outline);
        let draft = DraftView::from_outline(&outline);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = scheduler(provider.clone(), &bus).run(&outline, &meta, &draft, &cancel).await;
        assert!(matches!(result, Err(CourseError::Cancelled)));
        assert_eq!(provider.call_count(), 0);
        assert_eq!(statuses(&draft), vec![ChapterStatus::Aborted, ChapterStatus::Aborted]);
    }
}
