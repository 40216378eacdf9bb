use std::{io::Read, path::Path, sync::Arc};

use clap::Parser;
use serde_json::json;
use skillsearch::{
    Config,
    DataDir,
    Error,
    Registry,
    Result,
    SearchService,
    config,
    keywords::{self, GeminiClient, KeywordRequest},
    sparse::{self, Bm25Encoder, TOKENIZER_ID},
    validate,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, EncoderAction, InputArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("SKILLSEARCH_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let mut config = Config::from_env(&data_dir)?;
    if let Some(model) = cli.model {
        config.embedding_model = model;
    }
    let registry = Arc::new(Registry::hosted(config));
    let service = SearchService::new(Arc::clone(&registry));

    match cli.command {
        Command::Retrieve(args) => {
            let queries = read_items(&args.input, "queries")?;
            let results = service
                .retrieve_with_threshold(&queries, args.threshold)
                .await?;
            print_list(&results, args.json);
        }
        Command::Query(args) => {
            let keywords = read_items(&args.input, "keywords")?;
            let results = service
                .query_keywords(&keywords, args.threshold, &args.namespace)
                .await?;
            print_list(&results, args.json);
        }
        Command::Search(args) => {
            let keywords = read_items(&args.input, "keywords")?;
            let results = service
                .search_keywords(
                    &keywords,
                    args.top_k,
                    args.threshold,
                    &args.namespace,
                )
                .await?;
            print_list(&results, args.json);
        }
        Command::Upsert(args) => {
            let texts = read_items(&args.input, "texts")?;
            if !service.upsert(&texts).await? {
                eprintln!("Texts were not stored, see the log for details");
                std::process::exit(1);
            }
            println!("Stored texts in index '{}'", registry.config().index_name);
        }
        Command::Keywords(args) => {
            let generator = GeminiClient::new(registry.config())?;
            let request = KeywordRequest {
                topic: args.topic,
                sub_topics: args.sub_topics,
            };

            let (keywords, stored) = if args.no_store {
                (keywords::generate_keywords(&generator, &request).await?, false)
            } else {
                let generated =
                    service.generate_and_store(&generator, &request).await?;
                (generated.keywords, generated.stored)
            };

            if args.json {
                println!("{}", json!({ "keywords": keywords, "stored": stored }));
            } else {
                for keyword in &keywords {
                    println!("{keyword}");
                }
                if !args.no_store && !stored {
                    eprintln!("Keywords were not stored, see the log for details");
                }
            }
        }
        Command::Encoder { action } => match action {
            EncoderAction::Show { json } => encoder_show(&registry, json)?,
            EncoderAction::Fit { corpus, k1, b } => {
                encoder_fit(&registry, &corpus, k1, b)?;
            }
            EncoderAction::Clear => {
                if registry.encoder_cache().clear()? {
                    println!(
                        "Removed encoder snapshot {}",
                        registry.encoder_cache().path().display()
                    );
                } else {
                    println!("No encoder snapshot to remove");
                }
            }
        },
        Command::Status(args) => cmd_status(&data_dir, registry.config(), args.json),
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Collect list input from the command line or from a JSON array on stdin.
fn read_items(input: &InputArgs, field: &str) -> Result<Vec<String>> {
    if !input.stdin_json {
        return Ok(input.items.clone());
    }

    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
        Error::Validation(format!("stdin is not valid JSON: {e}"))
    })?;
    validate::string_list(&value, field)
}

fn print_list(items: &[String], as_json: bool) {
    if as_json {
        println!("{}", json!({ "results": items }));
    } else if items.is_empty() {
        eprintln!("No results found.");
    } else {
        for item in items {
            println!("{item}");
        }
    }
}

fn encoder_show(registry: &Registry, as_json: bool) -> Result<()> {
    let cache = registry.encoder_cache();
    let encoder = cache.load()?;

    if as_json {
        let stats = encoder.as_ref().map(|e| {
            json!({
                "k1": e.k1(),
                "b": e.b(),
                "documents": e.doc_count(),
                "avg_doc_len": e.avg_doc_len(),
                "terms": e.vocabulary_size(),
            })
        });
        println!(
            "{}",
            json!({
                "path": cache.path().display().to_string(),
                "tokenizer": TOKENIZER_ID,
                "snapshot": stats,
            })
        );
        return Ok(());
    }

    println!("Snapshot: {}", cache.path().display());
    match encoder {
        Some(e) => {
            println!("Tokenizer: {TOKENIZER_ID}");
            println!("k1: {}, b: {}", e.k1(), e.b());
            println!("Documents: {}", e.doc_count());
            println!("Average length: {:.2}", e.avg_doc_len());
            println!("Terms: {}", e.vocabulary_size());
        }
        None => {
            println!("No snapshot, the default encoder is fitted on first use");
        }
    }
    Ok(())
}

fn encoder_fit(registry: &Registry, corpus: &Path, k1: f32, b: f32) -> Result<()> {
    sparse::check_parameters(k1, b).map_err(Error::Validation)?;

    let text = if corpus == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        raw
    } else {
        std::fs::read_to_string(corpus)?
    };

    let mut encoder = Bm25Encoder::new(k1, b);
    let fitted = encoder.fit(text.lines());
    if fitted == 0 {
        return Err(Error::Validation(
            "corpus contains no indexable documents".into(),
        ));
    }

    registry.encoder_cache().save(&encoder)?;
    println!(
        "Fitted encoder on {fitted} documents ({} terms), saved to {}",
        encoder.vocabulary_size(),
        registry.encoder_cache().path().display()
    );
    Ok(())
}

fn cmd_status(data_dir: &DataDir, config: &Config, as_json: bool) {
    let snapshot_exists = config.encoder_snapshot.is_file();

    if as_json {
        println!(
            "{}",
            json!({
                "data_dir": data_dir.root().display().to_string(),
                "index": config.index_name,
                "index_host": config.index_host,
                "namespace": config.namespace,
                "embedding_model": config.embedding_model,
                "generation_model": config.generation_model,
                "top_k": config.hybrid.top_k,
                "alpha": config.hybrid.alpha,
                "encoder_snapshot": config.encoder_snapshot.display().to_string(),
                "encoder_snapshot_exists": snapshot_exists,
                "pinecone_api_key": config.pinecone_api_key.is_some(),
                "hf_token": config.hf_token.is_some(),
                "google_api_key": config.google_api_key.is_some(),
            })
        );
        return;
    }

    let set = |present: bool| if present { "set" } else { "not set" };
    println!("Data directory: {}", data_dir.root().display());
    println!("Index: {}", config.index_name);
    if let Some(host) = &config.index_host {
        println!("Index host: {host}");
    }
    if !config.namespace.is_empty() {
        println!("Namespace: {}", config.namespace);
    }
    println!("Embedding model: {}", config.embedding_model);
    println!("Generation model: {}", config.generation_model);
    println!(
        "Hybrid search: top {} at alpha {}",
        config.hybrid.top_k, config.hybrid.alpha
    );
    println!(
        "Encoder snapshot: {} ({})",
        config.encoder_snapshot.display(),
        if snapshot_exists { "present" } else { "missing" }
    );
    println!(
        "{}: {}",
        config::API_KEY_ENV_VAR,
        set(config.pinecone_api_key.is_some())
    );
    println!(
        "{}: {}",
        config::HF_TOKEN_ENV_VAR,
        set(config.hf_token.is_some())
    );
    println!(
        "{}: {}",
        config::GOOGLE_API_KEY_ENV_VAR,
        set(config.google_api_key.is_some())
    );
}
