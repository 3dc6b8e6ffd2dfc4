use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use restflow_config::RunConfig;
use restflow_pipeline::{PipelineKind, SubjectRun, build_registry, build_workflow};
use restflow_runtime::{NodeState, NoopNotifier, RunSummary};

/// Restflow - resting-state preprocessing orchestrator
#[derive(Parser)]
#[command(name = "restflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the run configuration (JSON)
  #[arg(long, global = true, default_value = "restflow.json")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a pipeline for one or more subjects
  Run {
    /// `resting` or `mni`
    pipeline: PipelineKind,

    /// Subject id
    #[arg(long, conflicts_with = "subjects_file", required_unless_present = "subjects_file")]
    subject: Option<String>,

    /// File with one subject id per line
    #[arg(long)]
    subjects_file: Option<PathBuf>,
  },

  /// Write the expanded graph of a pipeline as Graphviz dot
  Graph {
    pipeline: PipelineKind,

    #[arg(long)]
    subject: String,

    /// Output file (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  match cli.command {
    Some(Commands::Run {
      pipeline,
      subject,
      subjects_file,
    }) => {
      let subjects = match (subject, subjects_file) {
        (Some(subject), _) => vec![subject],
        (None, Some(file)) => read_subjects(&file)?,
        (None, None) => bail!("either --subject or --subjects-file is required"),
      };
      run_pipeline(pipeline, &cli.config, subjects)?;
    }
    Some(Commands::Graph {
      pipeline,
      subject,
      output,
    }) => {
      write_graph(pipeline, &cli.config, &subject, output)?;
    }
    None => {
      println!("restflow - use --help to see available commands");
    }
  }

  Ok(())
}

fn load_config(path: &Path) -> Result<RunConfig> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read config file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// One subject per line; blank lines and `#` comments are skipped.
fn read_subjects(path: &Path) -> Result<Vec<String>> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read subjects file: {}", path.display()))?;
  let subjects: Vec<String> = content
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty() && !line.starts_with('#'))
    .map(str::to_string)
    .collect();
  if subjects.is_empty() {
    bail!("subjects file {} lists no subjects", path.display());
  }
  Ok(subjects)
}

fn run_pipeline(kind: PipelineKind, config_path: &Path, subjects: Vec<String>) -> Result<()> {
  let config = load_config(config_path)?;
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run_pipeline_async(kind, config, subjects).await })
}

async fn run_pipeline_async(kind: PipelineKind, config: RunConfig, subjects: Vec<String>) -> Result<()> {
  let cancel = CancellationToken::new();
  let on_signal = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, cancelling run");
      on_signal.cancel();
    }
  });

  let failed_subjects = run_subjects(&subjects, &cancel, |subject, token| {
    let config = &config;
    async move {
      let summary = restflow_pipeline::run_subject(kind, config, &subject, Arc::new(NoopNotifier), token)
        .await
        .with_context(|| format!("pipeline '{}' failed for subject {}", kind, subject))?;
      print_summary(&subject, &summary);
      Ok::<_, anyhow::Error>(summary.is_success())
    }
  })
  .await;

  if cancel.is_cancelled() {
    bail!("run cancelled");
  }
  if !failed_subjects.is_empty() {
    error!(subjects = ?failed_subjects, "subjects failed");
    bail!("{} of {} subjects failed", failed_subjects.len(), subjects.len());
  }
  info!(subjects = subjects.len(), "all subjects completed");
  Ok(())
}

/// Run every subject in turn and return the ones that failed, either with
/// failed nodes or with an error before any node ran. Subjects left after a
/// cancellation are skipped.
async fn run_subjects<F, Fut>(subjects: &[String], cancel: &CancellationToken, mut run: F) -> Vec<String>
where
  F: FnMut(String, CancellationToken) -> Fut,
  Fut: Future<Output = Result<bool>>,
{
  let mut failed = Vec::new();
  for subject in subjects {
    if cancel.is_cancelled() {
      warn!(subject = %subject, "skipping subject after cancellation");
      continue;
    }

    match run(subject.clone(), cancel.child_token()).await {
      Ok(true) => {}
      Ok(false) => failed.push(subject.clone()),
      Err(e) => {
        let error = format!("{:#}", e);
        error!(subject = %subject, error = %error, "subject failed before running");
        failed.push(subject.clone());
      }
    }
  }
  failed
}

fn print_summary(subject: &str, summary: &RunSummary) {
  println!(
    "{} [{}] executed={} cached={} reclaimed={}",
    subject, summary.workflow, summary.executed, summary.cached, summary.reclaimed
  );
  for (branch, tally) in &summary.branches {
    println!("  {}: done={} failed={}", branch, tally.done, tally.failed);
  }
  for report in summary.failed() {
    if let NodeState::Failed(reason) = &report.state {
      match &report.crash_report {
        Some(crash) => println!("  FAILED {}: {} (crash report: {})", report.address, reason, crash.display()),
        None => println!("  FAILED {}: {}", report.address, reason),
      }
    }
  }
}

fn write_graph(kind: PipelineKind, config_path: &Path, subject: &str, output: Option<PathBuf>) -> Result<()> {
  let config = load_config(config_path)?;
  let run = SubjectRun::new(&config, subject).context("failed to render subject directories")?;
  let registry = build_registry(kind, &config).context("failed to register stages")?;
  let workflow = build_workflow(kind, &config, &run, &registry).context("failed to build workflow")?;

  let dot = workflow.to_dot();
  match output {
    Some(path) => {
      std::fs::write(&path, dot).with_context(|| format!("failed to write graph: {}", path.display()))?;
      eprintln!("Wrote {} nodes to {}", workflow.nodes().len(), path.display());
    }
    None => print!("{}", dot),
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_run_command() {
    let cli = Cli::parse_from(["restflow", "run", "resting", "--subject", "sub-010100"]);
    match cli.command {
      Some(Commands::Run { pipeline, subject, .. }) => {
        assert_eq!(pipeline, PipelineKind::Resting);
        assert_eq!(subject.as_deref(), Some("sub-010100"));
      }
      _ => panic!("expected run command"),
    }
    assert_eq!(cli.config, PathBuf::from("restflow.json"));
  }

  #[test]
  fn test_run_requires_a_subject() {
    assert!(Cli::try_parse_from(["restflow", "run", "mni"]).is_err());
    assert!(Cli::try_parse_from(["restflow", "run", "anat", "--subject", "s1"]).is_err());
  }

  #[tokio::test]
  async fn test_subject_error_does_not_stop_the_rest() {
    let subjects: Vec<String> = ["sub-01", "sub-02", "sub-03", "sub-04"]
      .into_iter()
      .map(String::from)
      .collect();
    let mut visited = Vec::new();

    let failed = run_subjects(&subjects, &CancellationToken::new(), |subject, _| {
      visited.push(subject.clone());
      async move {
        match subject.as_str() {
          "sub-02" => Err(anyhow::anyhow!("template not found for {}", subject)),
          "sub-03" => Ok(false),
          _ => Ok(true),
        }
      }
    })
    .await;

    assert_eq!(visited, subjects);
    assert_eq!(failed, vec!["sub-02", "sub-03"]);
  }

  #[tokio::test]
  async fn test_subjects_skipped_after_cancellation() {
    let subjects = vec!["sub-01".to_string(), "sub-02".to_string()];
    let cancel = CancellationToken::new();
    let mut visited = 0;

    let failed = run_subjects(&subjects, &cancel, |_, _| {
      visited += 1;
      cancel.cancel();
      async { Ok::<_, anyhow::Error>(true) }
    })
    .await;

    assert_eq!(visited, 1);
    assert!(failed.is_empty());
  }

  #[test]
  fn test_read_subjects_skips_comments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("subjects.txt");
    std::fs::write(&path, "sub-010100\n\n# excluded\n  sub-010101  \n").unwrap();
    assert_eq!(read_subjects(&path).unwrap(), vec!["sub-010100", "sub-010101"]);
  }
}
