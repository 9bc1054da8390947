//! CQT CLI - build, take, and grade encrypted exam packages
//!
//! Usage:
//!   cqt build     - Seal a question list into a new .cqt package
//!   cqt inspect   - Show a package's questions and progress
//!   cqt answer    - Record (or clear) an answer
//!   cqt sketch    - Attach (or clear) a freehand sketch
//!   cqt mark      - Toggle a question's review mark
//!   cqt evaluate  - Unlock grading with the evaluation password
//!   cqt report    - Print scores for an evaluated package
//!
//! Passwords come from flags or from CQT_PASSWORD / CQT_EVAL_PASSWORD.

use std::path::PathBuf;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args, Parser, Subcommand};
use cqt_core::{
    Answer, BackupStatus, ExamPackage, MarkingScheme, Outcome, Payload, Question, QuestionType,
};
use secrecy::SecretString;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "cqt")]
#[command(author = "HeyBattle1")]
#[command(version)]
#[command(about = "Encrypted computer-based test packages", long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PackageArgs {
    /// Path to the .cqt file
    file: PathBuf,

    /// Package password
    #[arg(long, env = "CQT_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal a JSON list of questions into a new package
    Build {
        /// JSON file holding an array of questions
        #[arg(long)]
        questions: PathBuf,

        /// Name shown to the candidate
        #[arg(long)]
        list_name: String,

        /// Output path (.cqt is appended if missing)
        #[arg(long)]
        out: PathBuf,

        /// Package password
        #[arg(long, env = "CQT_PASSWORD", hide_env_values = true)]
        password: String,

        /// Evaluation password (kept by the evaluator)
        #[arg(long, env = "CQT_EVAL_PASSWORD", hide_env_values = true)]
        eval_password: String,
    },

    /// Show list name, questions, and progress
    Inspect {
        #[command(flatten)]
        package: PackageArgs,
    },

    /// Record an answer (comma-separated labels for choice questions)
    Answer {
        #[command(flatten)]
        package: PackageArgs,

        /// Question key as shown by `inspect`
        #[arg(long)]
        question: String,

        /// Answer text, e.g. "B", "A,C" or "9.8"
        #[arg(long, conflicts_with = "clear", required_unless_present = "clear")]
        value: Option<String>,

        /// Clear the answer
        #[arg(long)]
        clear: bool,
    },

    /// Attach a PNG sketch to a question
    Sketch {
        #[command(flatten)]
        package: PackageArgs,

        #[arg(long)]
        question: String,

        /// PNG file to attach
        #[arg(long, conflicts_with = "clear", required_unless_present = "clear")]
        png: Option<PathBuf>,

        /// Remove the sketch
        #[arg(long)]
        clear: bool,
    },

    /// Toggle the review mark on a question
    Mark {
        #[command(flatten)]
        package: PackageArgs,

        #[arg(long)]
        question: String,
    },

    /// Evaluate the package (irreversible)
    Evaluate {
        #[command(flatten)]
        package: PackageArgs,

        /// Evaluation password
        #[arg(long, env = "CQT_EVAL_PASSWORD", hide_env_values = true)]
        eval_password: String,
    },

    /// Print scores for an evaluated package
    Report {
        #[command(flatten)]
        package: PackageArgs,

        /// Marks for a correct answer
        #[arg(long, default_value_t = MarkingScheme::default().correct)]
        correct: i64,

        /// Marks for a wrong answer
        #[arg(long, default_value_t = MarkingScheme::default().incorrect, allow_hyphen_values = true)]
        incorrect: i64,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Run KDF-heavy work off the async runtime
async fn blocking<T, F>(work: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

fn open(args: &PackageArgs) -> anyhow::Result<ExamPackage> {
    ExamPackage::open(&args.file, SecretString::new(args.password.clone()))
        .with_context(|| format!("Could not open {}", args.file.display()))
}

fn parse_answer(package: &ExamPackage, key: &str, value: &str) -> Answer {
    let question_type = package
        .payload()
        .question(key)
        .map(|(_, q)| q.question_type)
        .unwrap_or_default();
    match question_type {
        QuestionType::Numerical => Answer::Text(value.trim().to_string()),
        QuestionType::McqSingle | QuestionType::McqMultiple => Answer::Choices(
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
    }
}

fn print_inspect(package: &ExamPackage) {
    let payload = package.payload();
    let progress = payload.progress();

    println!("📦 {}", payload.list_name());
    if let Some(at) = payload.exported_at() {
        println!("   exported:  {}", at.to_rfc3339());
    }
    match payload.evaluated_at() {
        Some(at) if payload.is_evaluated() => println!("   evaluated: {}", at.to_rfc3339()),
        _ => println!("   evaluated: no"),
    }
    println!(
        "   answered {}/{}, marked for review {}",
        progress.answered, progress.total, progress.marked
    );
    println!();

    for (key, question, response) in package.entries() {
        let answered = cqt_core::is_answered(question, response);
        let marker = if answered { "●" } else { "○" };
        let review = if payload.is_marked(key.as_str()) { " ⚑" } else { "" };
        let sketch = if response.and_then(|r| r.sketch()).is_some() {
            " ✎"
        } else {
            ""
        };
        println!(
            "{} {:<12} {:<13} p{}{}{}",
            marker,
            key,
            question.question_type,
            question
                .page
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string()),
            review,
            sketch
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Build {
            questions,
            list_name,
            mut out,
            password,
            eval_password,
        } => {
            let raw = std::fs::read(&questions)
                .with_context(|| format!("Could not read {}", questions.display()))?;
            let questions: Vec<Question> =
                serde_json::from_slice(&raw).context("Questions file is not a JSON list of questions")?;
            if out.extension().map_or(true, |ext| !ext.eq_ignore_ascii_case("cqt")) {
                out.as_mut_os_string().push(".cqt");
            }

            let count = questions.len();
            let path = blocking(move || {
                let payload = Payload::build(&list_name, questions).protect(&eval_password)?;
                let package = ExamPackage::create(out, payload, SecretString::new(password))?;
                Ok(package.path().to_path_buf())
            })
            .await?;
            println!("✅ Saved {} questions to {}", count, path.display());
        }

        Commands::Inspect { package } => {
            let package = blocking(move || open(&package)).await?;
            print_inspect(&package);
        }

        Commands::Answer {
            package,
            question,
            value,
            clear,
        } => {
            blocking(move || {
                let mut pkg = open(&package)?;
                let answer = match value {
                    Some(v) if !clear => parse_answer(&pkg, &question, &v),
                    _ => Answer::empty(),
                };
                pkg.answer(&question, answer)?;
                Ok(())
            })
            .await?;
            println!("✅ Saved");
        }

        Commands::Sketch {
            package,
            question,
            png,
            clear,
        } => {
            let sketch = match png {
                Some(path) if !clear => {
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("Could not read {}", path.display()))?;
                    Some(STANDARD.encode(bytes))
                }
                _ => None,
            };
            blocking(move || {
                let mut pkg = open(&package)?;
                pkg.sketch(&question, sketch)?;
                Ok(())
            })
            .await?;
            println!("✅ Saved");
        }

        Commands::Mark { package, question } => {
            let marked = blocking(move || {
                let mut pkg = open(&package)?;
                Ok(pkg.toggle_mark(&question)?)
            })
            .await?;
            println!("{}", if marked { "⚑ Marked for review" } else { "Review mark removed" });
        }

        Commands::Evaluate {
            package,
            eval_password,
        } => {
            let outcome = blocking(move || {
                let mut pkg = open(&package)?;
                Ok(pkg.evaluate(&eval_password)?)
            })
            .await?;
            match &outcome.backup {
                BackupStatus::Created(path) => println!("🗂️  Backup saved to {}", path.display()),
                BackupStatus::Failed(reason) => {
                    eprintln!("⚠️  No backup could be made ({}); evaluation continued", reason)
                }
            }
            println!("✅ Evaluated at {}", outcome.evaluated_at.to_rfc3339());
        }

        Commands::Report {
            package,
            correct,
            incorrect,
            json,
        } => {
            let scheme = MarkingScheme {
                correct,
                incorrect,
                ..MarkingScheme::default()
            };
            let report = blocking(move || {
                let pkg = open(&package)?;
                Ok(pkg.report(&scheme)?)
            })
            .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for row in &report.questions {
                    let label = match row.outcome {
                        Outcome::Correct => "✔ correct",
                        Outcome::Incorrect => "✘ incorrect",
                        Outcome::Unanswered => "• unanswered",
                    };
                    println!("{:<12} {:<14} {:>3}", row.key, label, row.marks);
                }
                println!();
                println!(
                    "Score {} | correct {} | wrong {} | unanswered {} | {:.1}%",
                    report.score, report.correct, report.wrong, report.unanswered, report.percent
                );
            }
        }
    }

    Ok(())
}
