//! coursegen - AI course generator
//!
//! CLI entry point for generating, browsing and studying courses.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, info};

use coursegen::assist::{AnswerScorer, AssistConfig, CourseAssistant, FlashcardGenerator, split_snippets};
use coursegen::cancel::CancellationController;
use coursegen::cli::{Cli, Command, generate_after_help, read_answer};
use coursegen::config::{Config, ResolvedModel};
use coursegen::domain::{ChapterStatus, CourseDraft, CourseRequest, Difficulty, ModelSelector, slugify};
use coursegen::error::CourseError;
use coursegen::events::{CourseEvent, create_event_bus};
use coursegen::llm::{CompletionProvider, create_provider};
use coursegen::pipeline::{CourseGenerator, GenerationSettings};
use coursegen::prompts::{ChatContext, PromptLoader};
use coursegen::repl::ChatRepl;
use coursegen::scheduler::DraftView;
use coursegen::store::{CourseStore, MemoryCourseStore, SqliteCourseStore, StoredChapter, StoredCourse};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coursegen")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("coursegen.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        "coursegen loaded config: default-model={}",
        config.llm.default_model.as_deref().unwrap_or("<none>")
    );

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Generate {
            topic,
            chapters,
            difficulty,
            model,
            dry_run,
        }) => {
            debug!(%topic, ?chapters, %difficulty, %model, dry_run, "main: matched Generate command");
            cmd_generate(&config, topic, chapters, difficulty, model, dry_run).await
        }
        Some(Command::Courses) => {
            debug!("main: matched Courses command");
            cmd_courses(&config).await
        }
        Some(Command::Show { id, chapter }) => {
            debug!(%id, ?chapter, "main: matched Show command");
            cmd_show(&config, &id, chapter).await
        }
        Some(Command::Chat { id, chapter, model }) => {
            debug!(%id, chapter, %model, "main: matched Chat command");
            cmd_chat(&config, &id, chapter, &model).await
        }
        Some(Command::Score {
            id,
            chapter,
            answer,
            model,
        }) => {
            debug!(%id, chapter, %model, "main: matched Score command");
            cmd_score(&config, &id, chapter, &answer, &model).await
        }
        Some(Command::Flashcards {
            id,
            chapter,
            max,
            model,
        }) => {
            debug!(%id, ?chapter, max, %model, "main: matched Flashcards command");
            cmd_flashcards(&config, &id, chapter, max, &model).await
        }
        Some(Command::Models) => {
            debug!("main: matched Models command");
            cmd_models(&config)
        }
        None => {
            debug!("main: no command specified, printing help");
            Cli::command().after_help(generate_after_help()).print_help()?;
            Ok(())
        }
    }
}

/// Validate config and build a provider for the selected model
fn connect(config: &Config, selector: &ModelSelector) -> Result<(Arc<dyn CompletionProvider>, ResolvedModel)> {
    debug!(%selector, "connect: called");
    config.validate()?;
    let resolved = config.resolve_model(selector)?;
    let provider = create_provider(&resolved)?;
    info!(model = %resolved.label, endpoint = %resolved.endpoint, "provider ready");
    Ok((provider, resolved))
}

fn open_store(config: &Config) -> Result<SqliteCourseStore> {
    debug!(path = %config.storage.database.display(), "open_store: called");
    SqliteCourseStore::open(&config.storage.database).context(format!(
        "Failed to open course database {}",
        config.storage.database.display()
    ))
}

async fn load_course(store: &SqliteCourseStore, id: &str) -> Result<StoredCourse> {
    store.get(id).await.context(format!("Failed to load course '{}'", id))
}

fn find_chapter(course: &StoredCourse, index: u32) -> Result<&StoredChapter> {
    course
        .chapter(index)
        .ok_or_else(|| eyre::eyre!("Course {} has no chapter {}", course.id, index))
}

/// Cancel `controller` on the first Ctrl-C
fn cancel_on_ctrl_c(controller: &CancellationController) -> tokio::task::JoinHandle<()> {
    let controller = controller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            controller.cancel();
        }
    })
}

/// Generate a course and save it
async fn cmd_generate(
    config: &Config,
    topic: String,
    chapters: Option<u32>,
    difficulty: Difficulty,
    model: ModelSelector,
    dry_run: bool,
) -> Result<()> {
    debug!(%topic, dry_run, "cmd_generate: called");
    let (provider, resolved) = connect(config, &model)?;

    let store: Arc<dyn CourseStore> = if dry_run {
        Arc::new(MemoryCourseStore::new())
    } else {
        Arc::new(open_store(config)?)
    };
    let prompts = Arc::new(PromptLoader::new(config.prompts.dir.as_deref()));
    let bus = create_event_bus();
    let printer = tokio::spawn(print_progress(bus.subscribe()));

    let generator = CourseGenerator::new(
        provider,
        store,
        prompts,
        bus,
        GenerationSettings::from_config(config).with_model_label(resolved.label.clone()),
    );
    let request = CourseRequest {
        topic,
        chapter_count: chapters.unwrap_or(config.generation.default_chapters),
        difficulty,
        model,
    };

    println!(
        "Generating a {}-chapter {} course with {}",
        request.chapter_count,
        request.difficulty,
        resolved.label.bright_cyan()
    );
    println!("{}", "Press Ctrl-C to stop.".dimmed());

    let controller = CancellationController::new();
    let interrupt = cancel_on_ctrl_c(&controller);
    let draft = DraftView::empty();
    let result = generator.generate(&request, &draft, &controller.token()).await;
    interrupt.abort();
    let _ = printer.await;

    match result {
        Ok(course) => {
            println!();
            if dry_run {
                println!("{} {} (dry run, not saved)", "Generated".bright_green(), course.draft.meta.name);
            } else {
                println!("{} {}", "Saved course".bright_green(), course.id.to_string().bold());
            }
            Ok(())
        }
        Err(CourseError::Cancelled) => {
            println!();
            println!("{}", "Generation stopped by user. Nothing was saved.".yellow());
            print_draft_status(&draft);
            Ok(())
        }
        Err(CourseError::Persistence { message, draft: unsaved }) => {
            let path = write_unsaved(&unsaved)?;
            eprintln!("{} {}", "Failed to save course:".red(), message);
            eprintln!("The generated course was written to {}", path.display());
            Err(eyre::eyre!("Failed to save course: {}", message))
        }
        Err(e) => {
            print_draft_status(&draft);
            Err(e.into())
        }
    }
}

/// Print generation events until the run ends
async fn print_progress(mut rx: broadcast::Receiver<CourseEvent>) {
    let mut titles: HashMap<u32, String> = HashMap::new();
    let mut total = 0;
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "print_progress: lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match &event {
            CourseEvent::OutlineReady {
                course_name, chapters, ..
            } => {
                total = chapters.len();
                println!();
                println!("{}", course_name.bright_cyan().bold());
                for chapter in chapters {
                    println!("  {:>2}. {} {}", chapter.index, chapter.title, format!("({})", chapter.kind).dimmed());
                    titles.insert(chapter.index, chapter.title.clone());
                }
                println!();
            }
            CourseEvent::ChapterStatusChanged { index, status, .. } => {
                let title = titles.get(index).map(String::as_str).unwrap_or("");
                let status = match status {
                    ChapterStatus::Completed => status.to_string().bright_green(),
                    ChapterStatus::Failed => status.to_string().red(),
                    ChapterStatus::Aborted => status.to_string().yellow(),
                    _ => status.to_string().dimmed(),
                };
                println!("  [{}/{}] {} {}", index, total, title, status);
            }
            _ => {}
        }

        if event.is_terminal() {
            break;
        }
    }
}

fn print_draft_status(draft: &DraftView) {
    if draft.is_empty() {
        return;
    }
    for chapter in draft.snapshot() {
        println!(
            "  {:>2}. {:<40} {} ({} chars)",
            chapter.index,
            chapter.title,
            chapter.status,
            chapter.content.chars().count()
        );
    }
}

/// Keep a course the store rejected so the work is not lost
fn write_unsaved(draft: &CourseDraft) -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coursegen")
        .join("unsaved");
    fs::create_dir_all(&dir).context("Failed to create unsaved course directory")?;
    let slug = slugify(&draft.meta.name);
    let name = if slug.is_empty() { "course".to_string() } else { slug };
    let path = dir.join(format!("{}-{}.json", name, chrono::Utc::now().format("%Y%m%d%H%M%S")));
    let json = serde_json::to_string_pretty(draft)?;
    fs::write(&path, json).context(format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// List stored courses
async fn cmd_courses(config: &Config) -> Result<()> {
    debug!("cmd_courses: called");
    let store = open_store(config)?;
    let courses = store.list().await?;

    if courses.is_empty() {
        println!("No courses yet. Create one with: cg generate <topic>");
        return Ok(());
    }

    println!("{:<40} {:>8}  {:<16}  NAME", "ID", "CHAPTERS", "CREATED");
    println!("{}", "-".repeat(90));
    for course in courses {
        let tags = if course.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", course.tags.join(", "))
        };
        println!(
            "{:<40} {:>8}  {:<16}  {}{}",
            course.id.as_str(),
            course.chapter_count,
            course.created_at.format("%Y-%m-%d %H:%M"),
            course.name,
            tags.dimmed()
        );
    }
    Ok(())
}

/// Print a stored course or one of its chapters
async fn cmd_show(config: &Config, id: &str, chapter: Option<u32>) -> Result<()> {
    debug!(%id, ?chapter, "cmd_show: called");
    let store = open_store(config)?;
    let course = load_course(&store, id).await?;

    if let Some(index) = chapter {
        print_chapter(find_chapter(&course, index)?);
        return Ok(());
    }

    println!("{}", course.meta.name.bright_cyan().bold());
    println!("{}", course.id.to_string().dimmed());
    if !course.meta.description.is_empty() {
        println!();
        println!("{}", course.meta.description);
    }
    if !course.meta.tags.is_empty() {
        println!("Tags: {}", course.meta.tags.join(", "));
    }
    for chapter in &course.chapters {
        println!();
        print_chapter(chapter);
    }
    Ok(())
}

fn print_chapter(chapter: &StoredChapter) {
    println!(
        "{} {}",
        format!("Chapter {}: {}", chapter.index, chapter.title).bold(),
        format!("({})", chapter.kind).dimmed()
    );
    if let Some(score) = chapter.score {
        println!("Last score: {}/100", score);
    }
    println!();
    println!("{}", chapter.content);
}

/// Chat with an assistant about one chapter
async fn cmd_chat(config: &Config, id: &str, chapter: u32, model: &ModelSelector) -> Result<()> {
    debug!(%id, chapter, "cmd_chat: called");
    let store = open_store(config)?;
    let course = load_course(&store, id).await?;
    let stored = find_chapter(&course, chapter)?;
    let (provider, _) = connect(config, model)?;

    let prompts = PromptLoader::new(config.prompts.dir.as_deref());
    let context = ChatContext {
        chapter_index: stored.index,
        chapter_title: &stored.title,
        chapter_content: &stored.content,
    };
    let assistant = CourseAssistant::new(provider, &prompts, &context, &AssistConfig::from_config(config))?;
    ChatRepl::new(assistant, format!("{} / {}", course.meta.name, stored.title))
        .run()
        .await
}

/// Score an answer to an exercise or exam chapter
async fn cmd_score(config: &Config, id: &str, chapter: u32, answer: &str, model: &ModelSelector) -> Result<()> {
    debug!(%id, chapter, "cmd_score: called");
    let answer = read_answer(answer)?;
    let store = open_store(config)?;
    let course = load_course(&store, id).await?;
    let stored = find_chapter(&course, chapter)?;
    let (provider, _) = connect(config, model)?;

    let scorer = AnswerScorer::new(
        provider,
        Arc::new(PromptLoader::new(config.prompts.dir.as_deref())),
        AssistConfig::from_config(config),
    );
    let result = scorer.score(&stored.content, &answer, stored.kind).await?;

    println!("{}", result.feedback);
    println!();
    match result.score {
        Some(score) => {
            store.record_score(&course.id, stored.index, score).await?;
            println!("{} {}/100", "Recorded score:".bright_green(), score);
        }
        None => println!("{}", "No score found in the feedback; nothing recorded.".yellow()),
    }
    Ok(())
}

/// Generate review flashcards from course text
async fn cmd_flashcards(
    config: &Config,
    id: &str,
    chapter: Option<u32>,
    max: usize,
    model: &ModelSelector,
) -> Result<()> {
    debug!(%id, ?chapter, max, "cmd_flashcards: called");
    let store = open_store(config)?;
    let course = load_course(&store, id).await?;

    let chapters: Vec<&StoredChapter> = match chapter {
        Some(index) => vec![find_chapter(&course, index)?],
        None => course.chapters.iter().filter(|c| !c.kind.is_assessment()).collect(),
    };
    let mut snippets = Vec::new();
    for stored in chapters {
        let remaining = max.saturating_sub(snippets.len());
        if remaining == 0 {
            break;
        }
        snippets.extend(split_snippets(&stored.content, remaining));
    }
    if snippets.is_empty() {
        println!("No paragraphs long enough to make flashcards from.");
        return Ok(());
    }

    let (provider, _) = connect(config, model)?;
    let generator = FlashcardGenerator::new(
        provider,
        Arc::new(PromptLoader::new(config.prompts.dir.as_deref())),
        AssistConfig::from_config(config),
    );

    let controller = CancellationController::new();
    let interrupt = cancel_on_ctrl_c(&controller);
    let result = generator.generate(&snippets, &controller.token()).await;
    interrupt.abort();

    let cards = match result {
        Ok(cards) => cards,
        Err(CourseError::Cancelled) => {
            println!("{}", "Stopped by user.".yellow());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for (i, card) in cards.iter().enumerate() {
        println!("{} {}", format!("Q{}:", i + 1).bright_cyan(), card.question);
        println!("{} {}", format!("A{}:", i + 1).bright_green(), card.answer);
        println!();
    }
    println!("{} of {} snippets produced a card", cards.len(), snippets.len());
    Ok(())
}

/// List selectable models and whether their keys are set
fn cmd_models(config: &Config) -> Result<()> {
    debug!("cmd_models: called");
    let key_status = |env: &str| {
        if std::env::var(env).map(|v| !v.trim().is_empty()).unwrap_or(false) {
            format!("{} set", env).bright_green()
        } else {
            format!("{} missing", env).red()
        }
    };

    let trial = &config.free_trial;
    if trial.enabled {
        println!(
            "{:<20} {} ({})  {}",
            "free-trial".bold(),
            trial.model,
            trial.provider,
            key_status(&trial.api_key_env)
        );
    } else {
        println!("{:<20} {}", "free-trial".bold(), "disabled".dimmed());
    }

    match &config.llm.default_model {
        Some(default) => println!("{:<20} -> {}", "auto".bold(), default),
        None => println!("{:<20} {}", "auto".bold(), "no llm.default-model configured".dimmed()),
    }

    for entry in &config.models {
        println!("{:<20} {}  {}", entry.id.bold(), entry.label(), key_status(&entry.api_key_env));
    }
    Ok(())
}
