use anyhow::{Context, Result, bail};
use chromabuddy::cache::TieredCache;
use chromabuddy::chat::ChatSession;
use chromabuddy::cli::{self, CacheAction};
use chromabuddy::completion::{HttpCompletion, TextCompletion};
use chromabuddy::config::Config;
use chromabuddy::diff::SnapshotHistory;
use chromabuddy::indexer::ContextGraph;
use chromabuddy::indexer::scan::ScanOptions;
use chromabuddy::mentions::{self, MentionResolver};
use chromabuddy::pipeline::{Approver, AutoApprove, ConsoleApprover, EditPipeline, PipelineOptions};
use chromabuddy::project_map::ProjectMap;
use chromabuddy::session::SessionLog;
use chromabuddy::verify::ProcessVerifier;
use chromabuddy::{analyzer, util};
use clap::Parser;
use serde_json::json;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_cache(repo: &Path, config: &Config) -> TieredCache {
    if config.cache_enabled {
        TieredCache::for_repo(repo)
    } else {
        TieredCache::disabled()
    }
}

fn load_graph(repo: &Path, config: &Config, no_ignore: bool) -> Result<(ContextGraph, TieredCache)> {
    let cache = open_cache(repo, config);
    let graph = ContextGraph::build(repo, ScanOptions::new(no_ignore), Some(&cache))?;
    Ok((graph, cache))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose);

    match args.command {
        cli::Command::Index {
            repo,
            no_ignore,
            describe,
        } => {
            let config = Config::load(&repo)?;
            let completion = if describe {
                config.require_api_key()?;
                Some(HttpCompletion::from_config(&config)?)
            } else {
                None
            };
            let (graph, cache) = load_graph(&repo, &config, no_ignore)?;
            let map = ProjectMap::build(
                &graph,
                completion.as_ref().map(|c| c as &dyn TextCompletion),
                &cache,
            )?;
            let path = map.save(graph.root())?;
            print_json(&json!({
                "project_map": path.display().to_string(),
                "stats": graph.stats(),
                "summary": graph.summary(),
            }))
        }
        cli::Command::Edit {
            request,
            repo,
            yes,
            no_verify,
            max_attempts,
        } => {
            let config = Config::load(&repo)?;
            config.require_api_key()?;
            let completion = HttpCompletion::from_config(&config)?;
            let (graph, cache) = load_graph(&repo, &config, false)?;
            let project_map = ProjectMap::load(graph.root())?;

            let expansion = MentionResolver::new(&graph).expand_prompt(&request);
            let approver: &dyn Approver = if yes || !config.diff_approval {
                &AutoApprove
            } else {
                &ConsoleApprover
            };
            let mut options = PipelineOptions::from_config(&config);
            if no_verify {
                options.verify = false;
            }
            if let Some(max_attempts) = max_attempts {
                options.max_attempts = max_attempts;
            }
            let verifier = ProcessVerifier::new(config.interpreter.clone(), config.verify_timeout())
                .with_workdir(graph.root());
            let pipeline = EditPipeline::new(&graph, &project_map, &cache, &completion, approver)
                .with_verifier(&verifier)
                .with_options(options);

            let mut snapshots = SnapshotHistory::default();
            let task = pipeline.run(&expansion.prompt, &mut snapshots);
            let mut session = SessionLog::for_repo(graph.root())?;
            session.record(&task)?;
            print_json(&task)
        }
        cli::Command::Chat { repo } => {
            let config = Config::load(&repo)?;
            config.require_api_key()?;
            let completion = HttpCompletion::from_config(&config)?;
            let cache = open_cache(&repo, &config);
            let approver: &dyn Approver = if config.diff_approval {
                &ConsoleApprover
            } else {
                &AutoApprove
            };
            let verifier = ProcessVerifier::new(config.interpreter.clone(), config.verify_timeout())
                .with_workdir(&repo);
            let mut session = ChatSession::open(&repo, config, cache, &completion, approver)?
                .with_verifier(&verifier);
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            session.run(stdin.lock(), &mut stdout)
        }
        cli::Command::Mentions { text, repo, expand } => {
            let config = Config::load(&repo)?;
            let (graph, _cache) = load_graph(&repo, &config, false)?;
            let resolver = MentionResolver::new(&graph);
            if expand {
                println!("{}", resolver.expand_prompt(&text).prompt);
                return Ok(());
            }
            let parsed = mentions::parse(&text);
            let resolved = resolver.resolve(&parsed);
            print_json(&json!({
                "mentions": parsed,
                "symbols": mentions::symbol_names(&parsed),
                "resolved": resolved,
            }))
        }
        cli::Command::Suggest { partial, repo } => {
            let config = Config::load(&repo)?;
            let (graph, _cache) = load_graph(&repo, &config, false)?;
            let partial = if partial.starts_with('@') {
                partial
            } else {
                format!("@{partial}")
            };
            print_json(&MentionResolver::new(&graph).suggest(&partial))
        }
        cli::Command::Related { file, repo, depth } => {
            let config = Config::load(&repo)?;
            let (graph, _cache) = load_graph(&repo, &config, false)?;
            if graph.file(&file).is_none() {
                bail!("{file} is not an indexed file");
            }
            print_json(&json!({
                "file": file,
                "depth": depth,
                "related": graph.related_with_distance(&file, depth),
                "complexity": graph.complexity_score(&file),
            }))
        }
        cli::Command::Symbol { name, repo } => {
            let config = Config::load(&repo)?;
            let (graph, _cache) = load_graph(&repo, &config, false)?;
            print_json(&graph.find_symbol(&name))
        }
        cli::Command::Analyze { file, repo } => {
            let path = if file.is_absolute() { file.clone() } else { repo.join(&file) };
            let code = util::read_to_string(&path)?;
            let rel = file.to_string_lossy();
            let analysis = analyzer::Analyzer::new()?.analyze(&code, &rel);
            print_json(&json!({
                "analysis": analysis,
                "suggestions": analyzer::suggest_improvements(&analysis),
            }))
        }
        cli::Command::Cache { action, repo } => {
            let config = Config::load(&repo)?;
            let cache = open_cache(&repo, &config);
            match action {
                CacheAction::Stats => print_json(&cache.stats()),
                CacheAction::Clear => print_json(&json!({ "removed": cache.clear() })),
            }
        }
        cli::Command::History { repo, limit } => {
            let session = SessionLog::for_repo(&repo)
                .with_context(|| format!("open session log for {}", repo.display()))?;
            print_json(&json!({
                "stats": session.stats()?,
                "recent": session.recent(limit)?,
                "frequent_files": session.frequent_files(10)?,
            }))
        }
    }
}
