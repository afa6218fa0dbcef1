//! Prover-version compatibility filtering: older Tamarin builds reject
//! the `--output-*` family of flags this runner would otherwise always
//! pass, so they are elided when the target alias reports a version at
//! or below the cutoff.

/// Versions at or below this are assumed not to support `--output-*`
/// flags. Comparison is done component-wise on the dotted version, not
/// lexicographically, so `1.9.0` < `1.10.0`.
const CUTOFF: (u32, u32, u32) = (1, 10, 0);

fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}

fn supports_output_flags(version: &str) -> bool {
    match parse_version(version) {
        Some(parsed) => parsed > CUTOFF,
        // An unparseable version string is treated as modern: better to
        // risk an unsupported flag than silently drop real options for
        // every version we can't make sense of.
        None => true,
    }
}

/// Removes `--output-*` arguments, `--output=<path>`, and bare
/// `--output` (with any immediately following value) when `version`
/// predates the cutoff. Pure and total: never touches the filesystem or
/// panics.
pub fn filter_args(args: Vec<String>, version: &str) -> Vec<String> {
    if supports_output_flags(version) {
        return args;
    }

    let mut filtered = Vec::with_capacity(args.len());
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg.starts_with("--output-") || arg.starts_with("--output=") {
            continue;
        }
        if arg == "--output" {
            skip_next = true;
            continue;
        }
        filtered.push(arg);
    }
    filtered
}
