use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use grader::cases::{JsonReviews, NoReviews, ReviewLookup, Suite};
use grader::config::{init_config, GraderConfig};
use grader::console::ConsoleReviewer;
use grader::grading::{DeferAll, Grading, PassReport, Reviewer};
use grader::outcome::Audience;
use grader::results::SubmissionResults;
use grader::scoring::Context;
use grader::scrape::{verify_memcheck_version, verify_timing_tool};

#[derive(Debug, Parser)]
#[command(name = "grader", version, about = "Run and score autograder test suites")]
struct Cli {
    /// Grader configuration file (TOML)
    #[arg(long, global = true, env = "GRADER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tests and report without storing results
    Run {
        #[command(flatten)]
        target: Target,
        #[arg(long, value_enum, default_value_t = RunContext::RunTests)]
        context: RunContext,
        /// Only run the named tests
        #[arg(long = "test")]
        tests: Vec<String>,
        /// Run the student's own tests from this file instead of the suite's
        #[arg(long, conflicts_with = "tests")]
        custom: Option<PathBuf>,
    },
    /// Unattended pass; questions are deferred
    Pregrade {
        #[command(flatten)]
        target: Target,
        /// Re-run tests that already have a result
        #[arg(long)]
        update: bool,
    },
    /// Interactive grading pass
    Autograde {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        update: bool,
    },
    /// Print stored results for a submission
    Show {
        #[arg(long, default_value = ".")]
        grading_dir: PathBuf,
    },
    /// Record a manual point adjustment (0 removes it)
    Adjust {
        #[arg(long, default_value = ".")]
        grading_dir: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        points: i32,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Release finished results to the student
    Release {
        #[arg(long, default_value = ".")]
        grading_dir: PathBuf,
        /// Withdraw a release instead
        #[arg(long)]
        undo: bool,
    },
    /// Check that the memory checker and timing tool are usable
    CheckTools,
}

#[derive(Debug, Args)]
struct Target {
    /// Suite file with `[[tests]]` tables
    #[arg(long)]
    suite: PathBuf,
    /// Submission directory; commands run here
    #[arg(long, default_value = ".")]
    grading_dir: PathBuf,
    /// Directory with `<exe>_soln` reference executables
    #[arg(long)]
    solution_dir: PathBuf,
    /// Recorded code reviews (JSON keyed by test name)
    #[arg(long)]
    reviews: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunContext {
    Sanity,
    Dryrun,
    RunTests,
    TestSuite,
}

impl From<RunContext> for Context {
    fn from(context: RunContext) -> Self {
        match context {
            RunContext::Sanity => Context::Sanity,
            RunContext::Dryrun => Context::Dryrun,
            RunContext::RunTests => Context::RunTests,
            RunContext::TestSuite => Context::TestSuite,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("grader=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = init_config(GraderConfig::load(cli.config.as_deref())?)?;

    match cli.command {
        Command::Run {
            target,
            context,
            tests,
            custom,
        } => run(config, &target, context.into(), &tests, custom.as_deref()).await,
        Command::Pregrade { target, update } => {
            let loaded = Loaded::new(config, &target).await?;
            let mut results = open_results(config, &target.grading_dir).await?;
            let report = loaded
                .grading(config, &target)
                .pregrade(&loaded.suite.tests, &mut results, update)
                .await?;
            print_report(&report);
            println!("{}", results.summary());
            Ok(())
        }
        Command::Autograde { target, update } => {
            let loaded = Loaded::new(config, &target).await?;
            let mut results = open_results(config, &target.grading_dir).await?;
            let report = loaded
                .grading(config, &target)
                .autograde(&loaded.suite.tests, &mut results, &mut ConsoleReviewer, update)
                .await?;
            print_report(&report);
            print_results(&results);
            Ok(())
        }
        Command::Show { grading_dir } => {
            let results = open_results(config, &grading_dir).await?;
            print_results(&results);
            Ok(())
        }
        Command::Adjust {
            grading_dir,
            points,
            reason,
        } => {
            let mut results = open_results(config, &grading_dir).await?;
            results.set_adjustment(points, &reason).await?;
            println!("{}", results.summary());
            Ok(())
        }
        Command::Release { grading_dir, undo } => {
            let mut results = open_results(config, &grading_dir).await?;
            results.set_released(!undo).await?;
            info!("Results in {:?} released: {}", results.path(), !undo);
            Ok(())
        }
        Command::CheckTools => check_tools(config).await,
    }
}

/// A suite and the review store it is graded with
struct Loaded {
    suite: Suite,
    reviews: Box<dyn ReviewLookup>,
}

impl Loaded {
    async fn new(config: &GraderConfig, target: &Target) -> Result<Self> {
        let suite = Suite::load(&target.suite)
            .await
            .with_context(|| format!("Failed to load suite {:?}", target.suite))?;
        let reviews: Box<dyn ReviewLookup> = match &target.reviews {
            Some(path) => Box::new(JsonReviews::load(path).await?),
            None => Box::new(NoReviews),
        };
        info!(
            "Loaded {} tests from {:?} (default timeout {}s)",
            suite.tests.len(),
            target.suite,
            config.default_timeout_secs
        );
        Ok(Self { suite, reviews })
    }

    fn grading<'a>(&'a self, config: &'a GraderConfig, target: &'a Target) -> Grading<'a> {
        Grading {
            config,
            grading_dir: &target.grading_dir,
            solution_dir: &target.solution_dir,
            reviews: self.reviews.as_ref(),
        }
    }
}

async fn run(
    config: &GraderConfig,
    target: &Target,
    context: Context,
    only: &[String],
    custom: Option<&Path>,
) -> Result<()> {
    let loaded = Loaded::new(config, target).await?;
    for name in only {
        if loaded.suite.get(name).is_none() {
            bail!("No test named {}", name);
        }
    }
    let selected: Vec<_> = match custom {
        Some(path) => {
            let Some(template) = &loaded.suite.custom else {
                bail!("Suite {:?} does not allow custom tests", target.suite);
            };
            template
                .load_tests(path)
                .await
                .with_context(|| format!("Failed to read custom tests {:?}", path))?
        }
        None => loaded
            .suite
            .tests
            .iter()
            .filter(|case| only.is_empty() || only.contains(&case.name))
            .cloned()
            .collect(),
    };

    let mut reviewer: Box<dyn Reviewer> = if context.is_interactive() {
        Box::new(ConsoleReviewer)
    } else {
        Box::new(DeferAll)
    };
    let (results, report) = loaded
        .grading(config, target)
        .run_suite(&selected, context, reviewer.as_mut())
        .await?;

    let audience = context.audience();
    if audience == Audience::Dryrun {
        let row: String = results.iter().map(|r| r.outcome.onechar()).collect();
        println!("|{}|", row);
    }
    for result in &results {
        println!("{}", result.render(audience));
    }
    print_report(&report);
    Ok(())
}

async fn open_results(config: &GraderConfig, grading_dir: &Path) -> Result<SubmissionResults> {
    let path = grading_dir.join(&config.results_filename);
    SubmissionResults::open(&path)
        .await
        .with_context(|| format!("Failed to open results {:?}", path))
}

fn print_results(results: &SubmissionResults) {
    for (name, result) in &results.results {
        println!("{:<20} {}", name, result.render(Audience::Grader));
    }
    let state = match (&results.finished, results.released) {
        (Some(_), true) => "finished, released",
        (Some(_), false) => "finished",
        (None, _) => "in progress",
    };
    println!("Total {} ({})", results.summary(), state);
}

fn print_report(report: &PassReport) {
    for note in &report.notes {
        println!("{}", note);
    }
    if report.halted {
        println!("Stopped after a failed build");
    }
    if report.interrupted {
        warn!("Interrupted; the running test was deferred");
    }
}

async fn check_tools(config: &GraderConfig) -> Result<()> {
    let mut ok = true;
    match verify_memcheck_version(config).await {
        Ok(version) => println!("memory checker: {} ({})", config.memcheck_path, version),
        Err(e) => {
            println!("memory checker: {}", e);
            ok = false;
        }
    }
    match verify_timing_tool(config) {
        Ok(()) => println!("timing tool: {}", config.timing_path),
        Err(e) => {
            println!("timing tool: {}", e);
            ok = false;
        }
    }
    if !ok {
        bail!("Required tools are missing or unsupported");
    }
    Ok(())
}
