//! Cycle detection.
//!
//! Three-color DFS over dependency edges, started from every indexed node so
//! that cycles without a root member are found too. Independent of evaluation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::node::{Arena, Edge, NodeId, NodeSlot};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

/// Every cycle as an ordered name list that repeats its first name at the end.
pub(crate) fn detect_cycles(arena: &Arena, nodes: &[Arc<NodeSlot>]) -> Vec<Vec<String>> {
    let mut colors: HashMap<NodeId, Color> = HashMap::new();
    let mut cycles = Vec::new();

    for start in nodes {
        if colors.contains_key(&start.id) {
            continue;
        }

        let mut path: Vec<Arc<NodeSlot>> = vec![Arc::clone(start)];
        let mut stack: Vec<(Arc<Vec<Edge>>, usize)> = vec![(start.dependencies.load_full(), 0)];
        colors.insert(start.id, Color::Gray);

        while let Some((edges, next)) = stack.last_mut() {
            let Some(edge) = edges.get(*next) else {
                if let Some(done) = path.pop() {
                    colors.insert(done.id, Color::Black);
                }
                stack.pop();
                continue;
            };
            let target = edge.target;
            *next += 1;

            match colors.get(&target) {
                None => {
                    if let Some(slot) = arena.slot(target) {
                        colors.insert(target, Color::Gray);
                        stack.push((slot.dependencies.load_full(), 0));
                        path.push(slot);
                    }
                }
                Some(Color::Gray) => {
                    if let Some(pos) = path.iter().position(|slot| slot.id == target) {
                        let mut cycle: Vec<String> = path[pos..].iter().map(|slot| slot.name.clone()).collect();
                        cycle.push(path[pos].name.clone());
                        cycles.push(cycle);
                    }
                }
                Some(Color::Black) => {}
            }
        }
    }

    cycles
}
