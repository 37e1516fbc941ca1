use movierec::services::rating_store::RatingStore;
use movierec::snapshot::{BuildParams, Snapshot};
use movierec::*;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

const MOVIES: &str = "\
1::Toy Story (1995)::Animation|Children's|Comedy
2::Jumanji (1995)::Adventure|Children's|Fantasy
3::Heat (1995)::Action|Crime|Thriller
4::Casino (1995)::Drama|Thriller
5::Sabrina (1995)::Comedy|Romance
6::GoldenEye (1995)::Action|Adventure|Thriller
7::Babe (1995)::Children's|Comedy|Drama
8::Se7en (1995)::Crime|Thriller
";

fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // Two taste groups: family films and crime thrillers.
    let mut ratings = String::new();
    for user in 1..=30u32 {
        let family = user % 2 == 0;
        for item in 1..=8u32 {
            let is_family = matches!(item, 1 | 2 | 5 | 7);
            if (user + item) % 4 == 0 {
                continue;
            }
            let rating = match (family, is_family) {
                (true, true) | (false, false) => 4 + (user + item) % 2,
                _ => 1 + (user * item) % 2,
            };
            writeln!(ratings, "{}::{}::{}::978300760", user, item, rating)?;
        }
    }

    let config = Config::default();
    let mut params = BuildParams::from(&config);
    params.popularity.min_support = 5;

    let loaded = RatingStore::from_sources(&ratings, Some(MOVIES), "::", params.scale)?;
    println!(
        "Loaded {} ratings from {} users",
        loaded.matrix.num_ratings(),
        loaded.matrix.num_users()
    );

    let snapshot = Snapshot::build(loaded, params, "demo".to_string());
    let service = RecommendationService::new(Arc::new(snapshot), 3);

    println!("\nMost popular:");
    for movie in service.resolve(&service.recommend_popular(3)) {
        println!("  {} {}", movie.item, movie.title);
    }

    println!("\nPlease rate:");
    for movie in service.rating_candidates(4, 42) {
        println!("  {} {}", movie.id, movie.title);
    }

    let mut new_user = BTreeMap::new();
    new_user.insert(ItemId(1), 5.0);
    new_user.insert(ItemId(3), 1.0);

    println!("\nBecause you liked Toy Story:");
    let recommendations = service.recommend_personalized(&new_user, 3)?;
    for movie in service.resolve(&recommendations) {
        match movie.predicted_rating {
            Some(p) => println!("  {} {} (predicted {:.2})", movie.item, movie.title, p),
            None => println!("  {} {} (popular)", movie.item, movie.title),
        }
    }

    new_user.insert(ItemId(42), 4.0);
    if let Err(e) = service.recommend_personalized(&new_user, 3) {
        println!("\nRejected: {}", e);
    }

    Ok(())
}
