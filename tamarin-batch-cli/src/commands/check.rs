use std::path::Path;

use tamarin_batch_core::expand;
use tamarin_batch_core::preflight;
use tamarin_batch_core::recipe::Recipe;
use tamarin_batch_core::resources::HostCapacity;

pub async fn execute(recipe_path: &Path, report: bool) -> Result<(), Box<dyn std::error::Error>> {
    let recipe = Recipe::load(recipe_path)?;
    println!("Recipe loaded: {} task(s), {} alias(es)", recipe.tasks.len(), recipe.aliases.len());

    let mut probes = Vec::new();
    for (alias, entry) in &recipe.aliases {
        let probe = preflight::probe_alias(alias, entry).await;
        let status = if probe.exists {
            match probe.integrity_ok {
                Some(true) => "ok",
                Some(false) => "integrity test failed",
                None => "integrity not checked",
            }
        } else {
            "executable not found"
        };
        println!(
            "  alias '{alias}': {status}{}",
            probe
                .reported_version
                .as_ref()
                .map(|v| format!(" (version {v})"))
                .unwrap_or_default()
        );
        probes.push(probe);
    }

    let capacity = HostCapacity::probe();
    let global_cores = tamarin_batch_core::resources::resolve_limit(recipe.global_max_cores, capacity.total_cores);
    let global_memory_gb =
        tamarin_batch_core::resources::resolve_limit(recipe.global_max_memory_gb, capacity.total_memory_gb);

    let units = expand::expand(&recipe, global_cores, global_memory_gb)?;
    println!("\nExpands to {} unit(s):", units.len());
    for unit in &units {
        println!(
            "  {} -> {} ({} cores, {} GB, {}s timeout)",
            unit.unit_id,
            unit.theory_file.display(),
            unit.max_cores,
            unit.max_memory_gb,
            unit.timeout_s
        );
    }

    let issues = preflight::check_wellformedness(&recipe, &units).await;
    if issues.is_empty() {
        println!("\nNo wellformedness issues found.");
    } else {
        println!("\nWellformedness issues:");
        for issue in &issues {
            println!("  {} / {}:", issue.alias, issue.theory_file.display());
            if report {
                for warning in &issue.warnings {
                    println!("    {warning}");
                }
            } else {
                println!("    {} warning(s) (pass --report for detail)", issue.warnings.len());
            }
        }
    }

    Ok(())
}
