//! `forge search`: enumerate candidate matches for a term.

use anyhow::Result;
use colored::Colorize;
use forge_core::search::{Searcher, SearcherList};
use std::time::Duration;
use tabled::{Table, Tabled};

pub async fn run(term: &str, precise: bool, timeout: u64, insecure: bool) -> Result<()> {
    let (docker_searcher, template_files) =
        super::default_searchers(Duration::from_secs(timeout), insecure, None)?;
    let searcher = SearcherList { searchers: vec![docker_searcher, template_files] };

    let (mut matches, errors) = searcher.search(precise, &[term.to_string()]).await;
    matches.sort_by(|a, b| a.score.total_cmp(&b.score));

    for error in &errors {
        eprintln!("{} {}", "--> WARNING:".yellow().bold(), error);
    }

    if matches.is_empty() {
        println!("No matches for {:?}", term);
        return Ok(());
    }

    #[derive(Tabled)]
    struct MatchRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "SCORE")]
        score: String,
        #[tabled(rename = "BUILDER")]
        builder: String,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
    }

    let rows: Vec<MatchRow> = matches
        .iter()
        .map(|m| MatchRow {
            name: m.value.clone(),
            score: if m.is_exact() { "exact".to_string() } else { format!("{:.1}", m.score) },
            builder: if m.builder { "yes".to_string() } else { String::new() },
            description: m.description.clone(),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}
