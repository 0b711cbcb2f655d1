use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use clap::Parser;
use module_player::{
    config::Config,
    draft::Direction,
    module::{ContentKind, Module, QuizType},
    navigation::NavState,
    player::{Advance, AuthoringMode, ModulePlayer},
    progress::SqliteProgressTracker,
    quiz::{
        EvaluationEvent, QuizKey, Score,
        evaluator::{EvaluationRequest, FrameStream, OpenAiEvaluator, ShortAnswerEvaluator},
    },
    store::{DocumentStore, SqliteDocumentStore},
    utils::init_log,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::broadcast,
};
use tracing::warn;

#[derive(Debug, clap::Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "module_player.toml")]
    config: PathBuf,
    /// Overrides the database path of the config file
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Import a module document from a JSON file
    Import {
        file: PathBuf,
        #[arg(short, long)]
        language: Option<String>,
    },
    List,
    Delete {
        id: String,
    },
    Play {
        id: String,
        #[arg(short, long)]
        language: Option<String>,
        /// Open the module in the editor
        #[arg(long)]
        admin: bool,
    },
}

/// Used when no evaluator credentials are configured; every evaluation fails.
struct UnavailableEvaluator;

impl ShortAnswerEvaluator for UnavailableEvaluator {
    fn evaluate(&self, _request: EvaluationRequest) -> FrameStream {
        Box::pin(futures::stream::once(async {
            Err::<serde_json::Value, _>(anyhow::anyhow!("no short-answer evaluator configured"))
        }))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("load config {} failed: {:?}", args.config.display(), e);
            return;
        }
    };
    let _guard = match init_log(config.log_dir.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{:?}", e);
            return;
        }
    };
    if let Err(e) = run(args, config).await {
        eprintln!("{:?}", e);
    }
}

async fn run(args: Args, config: Config) -> anyhow::Result<()> {
    let database = args.database.unwrap_or(config.database.clone());
    let store = SqliteDocumentStore::connect(&database).await?;

    match args.command {
        Commands::Import { file, language } => {
            let language = language.unwrap_or(config.language.clone());
            let json = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("read {}", file.display()))?;
            let module = Module::from_json(&json)?;
            store.save_module(&module, &language).await?;
            println!("Imported module {} ({})", module.id, language);
        }
        Commands::List => {
            for meta in store.list_modules().await? {
                println!("{:<24} {:<6} {}", meta.id, meta.language, meta.title);
            }
        }
        Commands::Delete { id } => {
            store.delete_module(&id).await?;
            println!("Module deleted with id: {}", id);
        }
        Commands::Play {
            id,
            language,
            admin,
        } => {
            let language = language.unwrap_or(config.language.clone());
            let evaluator: Arc<dyn ShortAnswerEvaluator> = match OpenAiEvaluator::new(&config.evaluator) {
                Ok(evaluator) => Arc::new(evaluator),
                Err(e) => {
                    warn!("short-answer evaluator unavailable: {}", e);
                    Arc::new(UnavailableEvaluator)
                }
            };
            let tracker = SqliteProgressTracker::new(config.learner_id, store.database().clone()).await?;
            let mode = if admin {
                AuthoringMode::editor()
            } else {
                AuthoringMode::learner()
            };
            let player =
                ModulePlayer::load(&store, &id, &language, mode, evaluator, Arc::new(tracker)).await?;
            let languages = store.languages(&id).await?;
            player.prefetch_languages(&store, &languages).await;
            play(player, store).await?;
        }
    }
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<EvaluationEvent>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("evaluation printer lagged by {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            EvaluationEvent::Started(key) => {
                stdout.write_all(format!("\n[Evaluation {}]:\n", key).as_bytes()).await?;
            }
            EvaluationEvent::Delta { text, .. } => {
                stdout.write_all(text.as_bytes()).await?;
            }
            EvaluationEvent::Finished(_) => {
                stdout.write_all(b"\n").await?;
            }
            EvaluationEvent::Failed { key, message } => {
                stdout
                    .write_all(format!("\n[Evaluation {} failed]: {}\n", key, message).as_bytes())
                    .await?;
            }
        }
        stdout.flush().await?;
    }
    Ok(())
}

fn print_section(player: &ModulePlayer) {
    let Some(section) = player.current_section() else {
        return;
    };
    let index = player.navigator().index();
    println!(
        "\n== {} / {}: {} ==",
        index + 1,
        player.document().section_count(),
        section.title
    );
    for (content, item) in section.content.iter().enumerate() {
        println!("({}) {}", content, item.summary());
        let key = QuizKey::new(index, content);
        if let Some(correct) = player.quiz_engine().result(key) {
            let quiz = item.as_quiz();
            let feedback = quiz.map(|q| {
                if correct {
                    q.feedback.correct.clone()
                } else {
                    q.feedback.incorrect.clone()
                }
            });
            println!("    graded: {}", feedback.unwrap_or_default());
        }
    }
}

fn print_results(player: &ModulePlayer, score: Score) {
    match score {
        Score::NotApplicable => println!("\nModule completed."),
        Score::Percent(p) if score.is_passing() => println!("\nYou passed with {}%.", p),
        Score::Percent(p) => println!("\nYour score is {}%. Retake to try again.", p),
    }
    let graded = player.quiz_engine().read(|book| book.graded_count());
    println!("{} of {} quizzes answered.", graded, player.document().quiz_count());
}

const HELP: &str = "commands:
  show | next | back | jump <n> | overview | retake | score | lang <code>
  answer <item> <text> | submit <item> | reset <item>
  add-section | delete-section <n> | move <n> up|down
  add <text|list|image|video|audio|quiz> | edit <item> <field> <json>
  quiz-type <item> <type> | delete-item <item> | changes | discard | save
  help | exit";

async fn play(mut player: ModulePlayer, store: SqliteDocumentStore) -> anyhow::Result<()> {
    let printer = tokio::spawn(print_events(player.subscribe()));
    player.open();
    println!("{} ({})", player.document().title, player.language());
    println!("{}", HELP);
    print_section(&player);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::Write::flush(&mut std::io::stdout())?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line == "exit" {
            break;
        }
        if let Err(e) = execute(&mut player, &store, line).await {
            println!("{}", e);
        }
    }
    if player.has_unsaved_changes() {
        println!("Unsaved changes discarded.");
    }
    printer.abort();
    Ok(())
}

async fn execute(player: &mut ModulePlayer, store: &SqliteDocumentStore, line: &str) -> anyhow::Result<()> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let section = player.navigator().index();
    match command {
        "" | "show" => match player.state() {
            NavState::Browsing(_) => print_section(player),
            NavState::ShowingResults => print_results(player, player.score()),
        },
        "help" => println!("{}", HELP),
        "next" => match player.advance()? {
            Advance::Section(_) => print_section(player),
            Advance::Results { score, .. } => print_results(player, score),
        },
        "back" => {
            player.retreat()?;
            print_section(player);
        }
        "jump" => {
            player.jump_to(parse_section(rest)?)?;
            print_section(player);
        }
        "overview" => {
            for row in player.overview() {
                let marker = if row.current { ">" } else { " " };
                let done = if row.completed { "x" } else { " " };
                println!("{} [{}] {}. {}", marker, done, row.index + 1, row.title);
            }
        }
        "retake" => {
            player.retake();
            print_section(player);
        }
        "score" => println!("{}", player.score()),
        "lang" => {
            let switch = player.switch_language(rest);
            if let Some(notice) = switch.notice() {
                println!("{}", notice);
            }
            print_section(player);
        }
        "answer" => {
            let (item, answer) = rest.split_once(' ').context("usage: answer <item> <text>")?;
            player.record_answer(QuizKey::new(section, parse_index(item)?), answer.trim())?;
        }
        "submit" => {
            let submission = player.submit_answer(QuizKey::new(section, parse_index(rest)?))?;
            if submission.evaluation.is_none() {
                println!("{}", if submission.correct { "Correct!" } else { "Incorrect." });
            }
        }
        "reset" => player.reset_quiz(QuizKey::new(section, parse_index(rest)?)),
        "add-section" => {
            let index = player.add_section()?;
            println!("Added section {}", index + 1);
        }
        "delete-section" => player.delete_section(parse_section(rest)?)?,
        "move" => {
            let (index, direction) = rest.split_once(' ').context("usage: move <n> up|down")?;
            let direction = match direction.trim() {
                "up" => Direction::Up,
                "down" => Direction::Down,
                other => bail!("unknown direction: {}", other),
            };
            player.move_section(parse_section(index)?, direction)?;
        }
        "add" => {
            let index = player.add_content_item(rest.parse::<ContentKind>()?)?;
            println!("Added item ({})", index);
        }
        "edit" => {
            let mut parts = rest.splitn(3, ' ');
            let (Some(item), Some(field), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
                bail!("usage: edit <item> <field> <json>");
            };
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
            player.edit_content_field(parse_index(item)?, field, value)?;
        }
        "quiz-type" => {
            let (item, quiz_type) = rest.split_once(' ').context("usage: quiz-type <item> <type>")?;
            player.change_quiz_type(parse_index(item)?, quiz_type.trim().parse::<QuizType>()?)?;
        }
        "delete-item" => player.delete_content_item(parse_index(rest)?)?,
        "changes" => println!("changed sections: {:?}", player.changed_sections()),
        "discard" => player.discard_changes(),
        "save" => {
            player.save(store).await?;
            println!("Saved {} ({})", player.canonical().id, player.language());
        }
        other => bail!("unknown command: {}, type `help`", other),
    }
    Ok(())
}

fn parse_index(s: &str) -> anyhow::Result<usize> {
    s.trim()
        .parse()
        .with_context(|| format!("not an index: {}", s))
}

/// Sections are numbered from 1 on the command line.
fn parse_section(s: &str) -> anyhow::Result<usize> {
    parse_index(s)?
        .checked_sub(1)
        .context("sections are numbered from 1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_section() {
        assert_eq!(parse_section("1").unwrap(), 0);
        assert_eq!(parse_section(" 3 ").unwrap(), 2);
        assert!(parse_section("0").is_err());
        assert!(parse_section("x").is_err());
    }

    #[tokio::test]
    async fn test_section_zero_changes_nothing() {
        let database = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteDocumentStore::new(database.clone()).await.unwrap();
        let tracker = SqliteProgressTracker::new(1, database).await.unwrap();
        let module = Module::from_json(
            r#"{"id": "m", "title": "T", "sections": [{"id": 1, "title": "A"}, {"id": 2, "title": "B"}]}"#,
        )
        .unwrap();
        let mut player = ModulePlayer::new(
            module.clone(),
            "en",
            AuthoringMode::editor(),
            Arc::new(UnavailableEvaluator),
            Arc::new(tracker),
        );
        for line in ["delete-section 0", "move 0 down", "jump 0"] {
            assert!(execute(&mut player, &store, line).await.is_err());
        }
        assert_eq!(player.document(), &module);
        assert_eq!(player.navigator().index(), 0);
        execute(&mut player, &store, "delete-section 1").await.unwrap();
        assert_eq!(player.document().section(0).unwrap().title, "B");
    }
}
