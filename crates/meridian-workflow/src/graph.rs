use std::collections::{HashMap, HashSet};

/// Graph structure for traversal and analysis.
///
/// Nodes are step ids; an edge runs from a dependency to each of its
/// dependents.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: step_id -> list of downstream step_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: step_id -> list of upstream step_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Steps with no incoming edges.
  entry_points: Vec<String>,
  /// Steps with no outgoing edges.
  terminals: Vec<String>,
}

impl Graph {
  /// Build a graph from step ids and dependency edges.
  pub fn new(step_ids: &[String], edges: &[(String, String)]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for step_id in step_ids {
      adjacency.entry(step_id.clone()).or_default();
      reverse_adjacency.entry(step_id.clone()).or_default();
    }

    for (from, to) in edges {
      adjacency.entry(from.clone()).or_default().push(to.clone());
      reverse_adjacency
        .entry(to.clone())
        .or_default()
        .push(from.clone());
    }

    let entry_points: Vec<String> = step_ids
      .iter()
      .filter(|id| reverse_adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    let terminals: Vec<String> = step_ids
      .iter()
      .filter(|id| adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
      terminals,
    }
  }

  /// Steps with no incoming edges.
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Steps with no outgoing edges.
  pub fn terminals(&self) -> &[String] {
    &self.terminals
  }

  /// Downstream steps for a given step.
  pub fn downstream(&self, step_id: &str) -> &[String] {
    self
      .adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Upstream steps for a given step.
  pub fn upstream(&self, step_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(step_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Peel the graph into execution levels, Kahn style.
  ///
  /// Each round collects every step whose upstream steps are all placed
  /// into prior levels. When the peel gets stuck before every step is
  /// placed, the leftover steps form at least one cycle and are returned
  /// as the error value, sorted for stable reporting.
  pub fn levels(&self) -> Result<Vec<Vec<String>>, Vec<String>> {
    let mut placed: HashSet<String> = HashSet::new();
    let mut levels: Vec<Vec<String>> = Vec::new();

    while placed.len() < self.adjacency.len() {
      let mut ready: Vec<String> = self
        .adjacency
        .keys()
        .filter(|id| !placed.contains(*id))
        .filter(|id| self.upstream(id).iter().all(|up| placed.contains(up)))
        .cloned()
        .collect();

      if ready.is_empty() {
        // Stuck: everything unplaced participates in (or depends on) a cycle.
        let mut stuck: Vec<String> = self
          .adjacency
          .keys()
          .filter(|id| !placed.contains(*id))
          .cloned()
          .collect();
        stuck.sort();
        return Err(stuck);
      }

      ready.sort();
      placed.extend(ready.iter().cloned());
      levels.push(ready);
    }

    Ok(levels)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  fn edges(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
      .iter()
      .map(|(a, b)| (a.to_string(), b.to_string()))
      .collect()
  }

  #[test]
  fn diamond_levels() {
    let graph = Graph::new(
      &ids(&["fetch", "left", "right", "merge"]),
      &edges(&[
        ("fetch", "left"),
        ("fetch", "right"),
        ("left", "merge"),
        ("right", "merge"),
      ]),
    );

    let levels = graph.levels().unwrap();
    assert_eq!(levels.len(), 3);
    assert_eq!(levels[0], vec!["fetch"]);
    assert_eq!(levels[1], vec!["left", "right"]);
    assert_eq!(levels[2], vec!["merge"]);
  }

  #[test]
  fn cycle_reports_stuck_steps() {
    let graph = Graph::new(
      &ids(&["a", "b", "c"]),
      &edges(&[("a", "b"), ("b", "c"), ("c", "b")]),
    );

    let stuck = graph.levels().unwrap_err();
    assert_eq!(stuck, vec!["b", "c"]);
  }

  #[test]
  fn entry_points_and_terminals() {
    let graph = Graph::new(&ids(&["src", "mid", "out"]), &edges(&[("src", "mid"), ("mid", "out")]));
    assert_eq!(graph.entry_points(), ["src"]);
    assert_eq!(graph.terminals(), ["out"]);
    assert_eq!(graph.downstream("src"), ["mid"]);
    assert_eq!(graph.upstream("out"), ["mid"]);
  }
}
