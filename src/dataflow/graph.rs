//! Edge-induced dependency graph: cycles, ordering, reachability

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use crate::ir::WorkflowIr;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Adjacency over node declaration indices
///
/// Edges whose endpoints are not declared are ignored here; the compiler
/// reports them during flow wiring.
#[derive(Debug, Clone)]
pub struct DependencyGraph<'a> {
    ids: Vec<&'a str>,
    index: HashMap<&'a str, usize>,
    successors: Vec<Vec<usize>>,
}

impl<'a> DependencyGraph<'a> {
    pub fn from_ir(ir: &'a WorkflowIr) -> Self {
        let ids: Vec<&str> = ir.nodes.iter().map(|n| n.id.as_str()).collect();
        let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let mut successors = vec![Vec::new(); ids.len()];

        for edge in &ir.edges {
            let (Some(&from), Some(&to)) = (index.get(edge.from.as_str()), index.get(edge.to.as_str()))
            else {
                continue;
            };
            if !successors[from].contains(&to) {
                successors[from].push(to);
            }
        }

        Self {
            ids,
            index,
            successors,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Every cycle found, each as a closed path (`a → b → a`).
    ///
    /// A DFS with a visiting marker finds back-edges. A node on a cycle that
    /// the DFS only reached through a cross edge is then checked directly, so
    /// every node lying on some cycle appears in at least one reported path.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.len()];
        let mut path = Vec::new();
        let mut cycles: Vec<Vec<usize>> = Vec::new();

        for start in 0..self.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut path, &mut cycles);
            }
        }

        let mut covered = vec![false; self.len()];
        for cycle in &cycles {
            for &node in cycle {
                covered[node] = true;
            }
        }
        for node in 0..self.len() {
            if covered[node] {
                continue;
            }
            if let Some(cycle) = self.cycle_through(node) {
                for &member in &cycle {
                    covered[member] = true;
                }
                cycles.push(cycle);
            }
        }

        cycles
            .into_iter()
            .map(|cycle| {
                let mut named: Vec<String> = cycle.iter().map(|&i| self.ids[i].to_string()).collect();
                named.push(self.ids[cycle[0]].to_string());
                named
            })
            .collect()
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
        cycles: &mut Vec<Vec<usize>>,
    ) {
        marks[node] = Mark::Visiting;
        path.push(node);

        for &next in &self.successors[node] {
            match marks[next] {
                Mark::Unvisited => self.visit(next, marks, path, cycles),
                Mark::Visiting => {
                    if let Some(start) = path.iter().position(|&n| n == next) {
                        cycles.push(path[start..].to_vec());
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[node] = Mark::Done;
    }

    /// Shortest cycle starting and ending at `node`, if one exists
    fn cycle_through(&self, node: usize) -> Option<Vec<usize>> {
        let mut parent: Vec<Option<usize>> = vec![None; self.len()];
        let mut seen = vec![false; self.len()];
        let mut queue = VecDeque::new();

        for &next in &self.successors[node] {
            if next == node {
                return Some(vec![node]);
            }
            if !seen[next] {
                seen[next] = true;
                parent[next] = Some(node);
                queue.push_back(next);
            }
        }

        while let Some(current) = queue.pop_front() {
            for &next in &self.successors[current] {
                if next == node {
                    let mut cycle = vec![current];
                    let mut walk = current;
                    while let Some(prev) = parent[walk] {
                        if prev == node {
                            break;
                        }
                        cycle.push(prev);
                        walk = prev;
                    }
                    cycle.push(node);
                    cycle.reverse();
                    return Some(cycle);
                }
                if !seen[next] {
                    seen[next] = true;
                    parent[next] = Some(current);
                    queue.push_back(next);
                }
            }
        }

        None
    }

    /// Topological order, ties broken by declaration order.
    /// Returns the cycles instead when the graph is not acyclic.
    pub fn topological_order(&self) -> Result<Vec<&'a str>, Vec<Vec<String>>> {
        let mut in_degree = vec![0usize; self.len()];
        for targets in &self.successors {
            for &to in targets {
                in_degree[to] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(self.ids[node]);
            for &next in &self.successors[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == self.len() {
            Ok(order)
        } else {
            Err(self.find_cycles())
        }
    }

    /// Declared nodes not reachable from `start` by following edges
    pub fn unreachable_from(&self, start: &str) -> Vec<&'a str> {
        let Some(&start) = self.index.get(start) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.len()];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;

        while let Some(current) = queue.pop_front() {
            for &next in &self.successors[current] {
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }

        seen.iter()
            .enumerate()
            .filter(|(_, reached)| !**reached)
            .map(|(i, _)| self.ids[i])
            .collect()
    }
}
