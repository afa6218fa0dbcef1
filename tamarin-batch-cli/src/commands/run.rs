use std::path::Path;

use chrono::Utc;
use tamarin_batch_core::cache::ResultCache;
use tamarin_batch_core::expand;
use tamarin_batch_core::output_layout::{OutputLayout, OverwriteConfirmation};
use tamarin_batch_core::recipe::Recipe;
use tamarin_batch_core::report::Batch;
use tamarin_batch_core::resources::{self, AutoAccept, HostCapacity, ResourceConfirmation, StdinPrompt};
use tamarin_batch_core::scheduler::{Scheduler, SchedulingPolicy};

pub async fn execute(
    recipe_path: &Path,
    output: Option<&Path>,
    policy: &str,
    skip_confirmation: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let recipe = Recipe::load(recipe_path)?;
    let capacity = HostCapacity::probe();

    let global_cores = resources::resolve_limit(recipe.global_max_cores, capacity.total_cores);
    let global_memory_gb =
        resources::resolve_limit(recipe.global_max_memory_gb, capacity.total_memory_gb);

    if resources::needs_confirmation(global_cores, global_memory_gb, capacity) {
        let confirmer: Box<dyn ResourceConfirmation> = if skip_confirmation {
            Box::new(AutoAccept)
        } else {
            Box::new(StdinPrompt)
        };
        if !confirmer.confirm(global_cores, global_memory_gb, capacity) {
            println!("Aborted: resource ceilings not confirmed.");
            return Ok(());
        }
    }

    let overwrite_confirmer: Box<dyn OverwriteConfirmation> = if skip_confirmation {
        Box::new(AutoAccept)
    } else {
        Box::new(StdinPrompt)
    };
    let layout = OutputLayout::prepare(&recipe.output_directory, overwrite_confirmer.as_ref())?;
    if layout.root != recipe.output_directory {
        println!(
            "Output directory {} left untouched; writing to {} instead.",
            recipe.output_directory.display(),
            layout.root.display()
        );
    }

    let mut effective_recipe = recipe.clone();
    effective_recipe.output_directory = layout.root.clone();

    let units = expand::expand(&effective_recipe, global_cores, global_memory_gb)?;
    tracing::info!(unit_count = units.len(), "expanded recipe into units");

    let policy = parse_policy(policy)?;
    let prover_versions = recipe
        .aliases
        .iter()
        .filter_map(|(alias, entry)| entry.reported_version.clone().map(|v| (alias.clone(), v)))
        .collect();

    let cache_dir = layout.root.join(".cache");
    let cache = ResultCache::open(&cache_dir)?;

    let mut scheduler = Scheduler::new(policy, global_cores, global_memory_gb, cache, prover_versions);

    let started_at = Utc::now();
    let results = scheduler.run(units).await;
    let finished_at = Utc::now();

    let recipe_name = recipe_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recipe")
        .to_string();

    let batch = Batch::assemble(
        recipe_name,
        &effective_recipe,
        global_cores,
        global_memory_gb,
        started_at,
        finished_at,
        results,
    );
    let json = batch.to_json_pretty()?;

    let report_path = output.unwrap_or(&layout.report_path);
    std::fs::write(report_path, &json)?;
    println!("Wrote report to {}", report_path.display());

    println!(
        "{} units: {} succeeded, {} failed, {} served from cache",
        batch.execution_metadata.total_tasks,
        batch.execution_metadata.total_successes,
        batch.execution_metadata.total_failures,
        batch.execution_metadata.total_cache_hit
    );

    Ok(())
}

fn parse_policy(name: &str) -> Result<SchedulingPolicy, Box<dyn std::error::Error>> {
    match name {
        "fifo" => Ok(SchedulingPolicy::Fifo),
        "shortest-first" => Ok(SchedulingPolicy::ShortestFirst),
        "longest-first" => Ok(SchedulingPolicy::LongestFirst),
        other => Err(format!("unknown scheduling policy '{other}'").into()),
    }
}
