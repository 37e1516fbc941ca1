use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use movierec::services::evaluation::{EvaluationConfig, EvaluationService};
use movierec::services::rating_store::RatingStore;
use movierec::utils::validation::parse_rating_pair;
use movierec::{init_tracing, Config, ItemId, RecommendationService, TrainingService};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Most popular movies, for users with no ratings.
    Popular {
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Personalized recommendations from ratings such as `m1193=5`.
    Recommend {
        #[arg(short, long = "rate", value_parser = parse_rating_pair)]
        ratings: Vec<(ItemId, f32)>,

        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Well-known movies to ask a new user to rate.
    Candidates {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        #[arg(short, long, default_value_t = 42)]
        seed: u64,
    },
    /// Hold-out comparison of IBCF against the popularity baseline.
    Evaluate {
        #[arg(short, long, default_value_t = 10)]
        k: usize,

        #[arg(long, default_value_t = 0.2)]
        holdout: f64,

        #[arg(long, default_value_t = 500)]
        max_users: usize,

        #[arg(short, long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    message: String,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        }
    }

    fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message,
        }
    }
}

fn print_json<T: Serialize>(response: &ApiResponse<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = Arc::new(
        Config::load_or_default(&args.config)
            .with_context(|| format!("loading {}", args.config))?,
    );
    let training = TrainingService::new(config.clone());

    if let Command::Evaluate {
        k,
        holdout,
        max_users,
        seed,
    } = args.command
    {
        let loaded = RatingStore::load(&config.data, training.build_params().scale)?;
        let eval_config = EvaluationConfig {
            k,
            holdout_fraction: holdout,
            max_users,
            seed,
            ..EvaluationConfig::default()
        };
        let reports = EvaluationService::new(training).run(loaded, &eval_config);
        return print_json(&ApiResponse::success(reports));
    }

    let snapshot = Arc::new(training.prepare_cached()?);
    info!(
        "Serving snapshot {} ({} items)",
        snapshot.meta.snapshot_id, snapshot.meta.num_items
    );
    let service = RecommendationService::new(snapshot, config.recommendation.default_count);

    match args.command {
        Command::Popular { count } => {
            let recommendations = service.recommend_popular(count.unwrap_or(service.default_count()));
            print_json(&ApiResponse::success(service.resolve(&recommendations)))
        }
        Command::Recommend { ratings, count } => {
            let ratings: BTreeMap<ItemId, f32> = ratings.into_iter().collect();
            let count = count.unwrap_or(service.default_count());
            match service.recommend_personalized(&ratings, count) {
                Ok(recommendations) => {
                    print_json(&ApiResponse::success(service.resolve(&recommendations)))
                }
                Err(e) => {
                    tracing::error!("Failed to get recommendations: {}", e);
                    print_json(&ApiResponse::<()>::error(e.to_string()))?;
                    std::process::exit(2);
                }
            }
        }
        Command::Candidates { count, seed } => {
            print_json(&ApiResponse::success(service.rating_candidates(count, seed)))
        }
        Command::Evaluate { .. } => Ok(()),
    }
}
