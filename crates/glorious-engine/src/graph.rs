use std::collections::{HashMap, VecDeque};

use crate::config::UnitDef;
use crate::error::ConfigError;

/// Unit dependency graph, indexed by declaration order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
	names: Vec<String>,
	/// `edges[a]` holds the units `a` depends on.
	edges: Vec<Vec<usize>>,
	/// `reverse[a]` holds the units depending on `a`.
	reverse: Vec<Vec<usize>>,
}

impl DependencyGraph {
	/// Resolve every `depends_on` name. An unknown name is an error.
	pub fn build(units: &[UnitDef]) -> Result<Self, ConfigError> {
		let index: HashMap<&str, usize> = units
			.iter()
			.enumerate()
			.map(|(i, u)| (u.name.as_str(), i))
			.collect();

		let mut edges = vec![Vec::new(); units.len()];
		let mut reverse = vec![Vec::new(); units.len()];
		for (i, unit) in units.iter().enumerate() {
			for dep in &unit.depends_on {
				let &d = index.get(dep.as_str()).ok_or_else(|| ConfigError::UnknownDependency {
					unit: unit.name.clone(),
					dependency: dep.clone(),
				})?;
				if !edges[i].contains(&d) {
					edges[i].push(d);
					reverse[d].push(i);
				}
			}
		}

		Ok(Self {
			names: units.iter().map(|u| u.name.clone()).collect(),
			edges,
			reverse,
		})
	}

	pub fn dependencies(&self, unit: usize) -> &[usize] {
		&self.edges[unit]
	}

	/// Dependencies first; ties keep declaration order.
	pub fn topological_order(&self) -> Result<Vec<usize>, ConfigError> {
		let mut remaining: Vec<usize> = self.edges.iter().map(Vec::len).collect();
		let mut queue: VecDeque<usize> = (0..self.names.len()).filter(|&i| remaining[i] == 0).collect();
		let mut order = Vec::with_capacity(self.names.len());

		while let Some(node) = queue.pop_front() {
			order.push(node);
			for &dependent in &self.reverse[node] {
				remaining[dependent] -= 1;
				if remaining[dependent] == 0 {
					queue.push_back(dependent);
				}
			}
		}

		if order.len() != self.names.len() {
			return Err(ConfigError::CircularDependency(self.find_cycle()));
		}
		Ok(order)
	}

	/// One cycle as a name path whose last entry repeats the first.
	fn find_cycle(&self) -> Vec<String> {
		let mut visited = vec![false; self.names.len()];
		let mut on_stack = vec![false; self.names.len()];
		let mut path = Vec::new();

		for start in 0..self.names.len() {
			if !visited[start] {
				if let Some(cycle) = self.find_cycle_from(start, &mut visited, &mut on_stack, &mut path) {
					return cycle.into_iter().map(|i| self.names[i].clone()).collect();
				}
			}
		}
		Vec::new()
	}

	fn find_cycle_from(
		&self,
		node: usize,
		visited: &mut [bool],
		on_stack: &mut [bool],
		path: &mut Vec<usize>,
	) -> Option<Vec<usize>> {
		visited[node] = true;
		on_stack[node] = true;
		path.push(node);

		for &dep in &self.edges[node] {
			if !visited[dep] {
				if let Some(cycle) = self.find_cycle_from(dep, visited, on_stack, path) {
					return Some(cycle);
				}
			} else if on_stack[dep] {
				let start = path.iter().position(|&n| n == dep).unwrap_or(0);
				let mut cycle = path[start..].to_vec();
				cycle.push(dep);
				return Some(cycle);
			}
		}

		on_stack[node] = false;
		path.pop();
		None
	}
}
