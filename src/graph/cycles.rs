//! Strongly connected components (Tarjan)
//!
//! Roots are visited in ascending vertex index and successors in ascending
//! order, so identical graphs always yield identical components. The DFS uses
//! an explicit call stack; graphs built from large images are deep enough to
//! overflow a recursive walk.

use crate::graph::{Graph, VertexIndex};

/// A strongly connected component, members sorted ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub members: Vec<VertexIndex>,
    /// True when the component contains a hazard cycle
    pub cyclic: bool,
}

impl Component {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Components over every valid vertex
pub fn find_components(graph: &mut Graph) -> Vec<Component> {
    let members: Vec<VertexIndex> = graph.valid_indices().collect();
    find_components_within(graph, &members)
}

/// Components of the subgraph induced by `members`
///
/// Components are returned in completion order, which is a reverse
/// topological order of the condensed graph.
pub fn find_components_within(graph: &mut Graph, members: &[VertexIndex]) -> Vec<Component> {
    let mut in_subgraph = vec![false; graph.len()];
    for &index in members {
        if graph.vertex(index).valid {
            in_subgraph[index] = true;
        }
    }

    let successors: Vec<Vec<VertexIndex>> = (0..graph.len())
        .map(|index| {
            if !in_subgraph[index] {
                return Vec::new();
            }
            graph
                .vertex(index)
                .out_edges
                .keys()
                .copied()
                .filter(|&to| in_subgraph[to])
                .collect()
        })
        .collect();

    for index in 0..graph.len() {
        let vertex = graph.vertex_mut(index);
        vertex.discovery_index = None;
        vertex.lowlink = 0;
    }

    let mut roots: Vec<VertexIndex> = members
        .iter()
        .copied()
        .filter(|&index| in_subgraph[index])
        .collect();
    roots.sort_unstable();
    roots.dedup();

    let mut next_index = 0usize;
    let mut stack: Vec<VertexIndex> = Vec::new();
    let mut on_stack = vec![false; graph.len()];
    let mut components = Vec::new();

    for root in roots {
        if graph.vertex(root).discovery_index.is_some() {
            continue;
        }

        let mut call_stack: Vec<(VertexIndex, usize)> = vec![(root, 0)];
        discover(graph, root, &mut next_index, &mut stack, &mut on_stack);

        while let Some(&(vertex, cursor)) = call_stack.last() {
            if let Some(&next) = successors[vertex].get(cursor) {
                if let Some(frame) = call_stack.last_mut() {
                    frame.1 += 1;
                }
                match graph.vertex(next).discovery_index {
                    None => {
                        discover(graph, next, &mut next_index, &mut stack, &mut on_stack);
                        call_stack.push((next, 0));
                    }
                    Some(next_discovery) if on_stack[next] => {
                        let v = graph.vertex_mut(vertex);
                        v.lowlink = v.lowlink.min(next_discovery);
                    }
                    Some(_) => {}
                }
                continue;
            }

            call_stack.pop();
            let lowlink = graph.vertex(vertex).lowlink;
            if let Some(&(parent, _)) = call_stack.last() {
                let p = graph.vertex_mut(parent);
                p.lowlink = p.lowlink.min(lowlink);
            }

            if Some(lowlink) == graph.vertex(vertex).discovery_index {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == vertex {
                        break;
                    }
                }
                component.sort_unstable();
                let cyclic = component.len() > 1
                    || graph.vertex(vertex).out_edges.contains_key(&vertex);
                components.push(Component {
                    members: component,
                    cyclic,
                });
            }
        }
    }

    components
}

fn discover(
    graph: &mut Graph,
    index: VertexIndex,
    next_index: &mut usize,
    stack: &mut Vec<VertexIndex>,
    on_stack: &mut [bool],
) {
    let vertex = graph.vertex_mut(index);
    vertex.discovery_index = Some(*next_index);
    vertex.lowlink = *next_index;
    *next_index += 1;
    stack.push(index);
    on_stack[index] = true;
}
