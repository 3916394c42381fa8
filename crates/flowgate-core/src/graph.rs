//! Execution-graph construction
//!
//! Invocations and the `tasks.*` references between their bindings form a
//! DAG. Nodes are partitioned into waves by longest path from a source, so
//! every invocation runs as soon as its dependencies allow (as-soon-as-
//! possible scheduling). Tie-breaking within a wave is deliberately
//! unspecified; concurrent execution is the contract.

use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Partition nodes into topological waves.
///
/// `deps` maps every node id to the ids it depends on; all referenced ids
/// must be keys. Wave `k` holds the nodes whose longest dependency chain
/// has length `k`, so for every edge `id -> dep`, `wave(dep) < wave(id)`.
///
/// On a cycle, returns the cycle path with the entry node repeated at the
/// end (e.g. `[a, b, a]`).
pub fn build_waves(
    deps: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<Vec<String>>, Vec<String>> {
    let mut depths: HashMap<&str, usize> = HashMap::with_capacity(deps.len());
    let mut stack: Vec<&str> = Vec::new();

    for id in deps.keys() {
        depth_of(id, deps, &mut depths, &mut stack)?;
    }

    let wave_count = depths.values().copied().max().map_or(0, |d| d + 1);
    let mut waves: Vec<Vec<String>> = vec![Vec::new(); wave_count];
    // BTreeMap iteration keeps wave contents deterministic.
    for id in deps.keys() {
        waves[depths[id.as_str()]].push(id.clone());
    }
    Ok(waves)
}

fn depth_of<'a>(
    id: &'a str,
    deps: &'a BTreeMap<String, BTreeSet<String>>,
    depths: &mut HashMap<&'a str, usize>,
    stack: &mut Vec<&'a str>,
) -> Result<usize, Vec<String>> {
    if let Some(depth) = depths.get(id) {
        return Ok(*depth);
    }
    if let Some(entry) = stack.iter().position(|frame| *frame == id) {
        let mut path: Vec<String> = stack[entry..].iter().map(|s| s.to_string()).collect();
        path.push(id.to_string());
        return Err(path);
    }

    stack.push(id);
    let mut depth = 0;
    if let Some(direct) = deps.get(id) {
        for dep in direct {
            depth = depth.max(depth_of(dep, deps, depths, stack)? + 1);
        }
    }
    stack.pop();

    depths.insert(id, depth);
    Ok(depth)
}
