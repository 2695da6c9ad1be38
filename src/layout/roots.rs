use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::config::Settings;
use crate::ir::{Graph, NodeId, PinDirection, PinLink};

/// Orders nodes along the formatting direction, then top to bottom.
pub fn sort_by_direction(graph: &Graph, direction: PinDirection, a: NodeId, b: NodeId) -> Ordering {
    let (ax, ay) = graph.position(a);
    let (bx, by) = graph.position(b);
    let along = match direction {
        PinDirection::Output => ax.total_cmp(&bx),
        PinDirection::Input => bx.total_cmp(&ax),
    };
    along.then(ay.total_cmp(&by))
}

fn is_selected(nodes_to_format: &[NodeId], node: NodeId) -> bool {
    nodes_to_format.is_empty() || nodes_to_format.contains(&node)
}

/// Follows links leaving in `direction` through nodes accepted by `filter`
/// and returns the node furthest from `start`.
pub fn top_most_with_filter<F>(graph: &Graph, start: NodeId, direction: PinDirection, filter: F) -> NodeId
where
    F: Fn(NodeId) -> bool,
{
    let mut visited = BTreeSet::from([start]);
    let mut frontier = vec![start];
    let mut furthest = start;
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for node in frontier {
            for pin in graph.linked_pins(node, Some(direction)) {
                for other in graph.linked_to(pin) {
                    if filter(other.node) && visited.insert(other.node) {
                        next.push(other.node);
                    }
                }
            }
        }
        if let Some(first) = next.first() {
            furthest = *first;
        }
        frontier = next;
    }
    furthest
}

/// Picks the node a formatting pass should start from. Extra root classes
/// come first, then event nodes, then impure nodes nothing executes into.
/// The initial node wins within its group.
pub fn root_node(
    graph: &Graph,
    settings: &Settings,
    initial: NodeId,
    nodes_to_format: &[NodeId],
    direction: PinDirection,
) -> Option<NodeId> {
    if !graph.is_live(initial) || graph.is_comment(initial) {
        return None;
    }
    let opposite = direction.opposite();
    let delegate_filter = |graph: &Graph, link: &PinLink| {
        is_selected(nodes_to_format, link.node)
            && (settings.treat_delegates_as_execution_pins
                || !link.from.is_some_and(|pin| graph.is_delegate_pin(pin))
                || graph.is_pure(link.node)
                || link.from_node().is_some_and(|node| graph.is_pure(node)))
    };
    let tree = graph.node_tree_with_filter(initial, delegate_filter);

    if !tree.iter().any(|node| graph.is_impure(*node)) {
        if graph.is_knot(initial) {
            return None;
        }
        let filter = |node: NodeId| graph.is_pure(node) && is_selected(nodes_to_format, node);
        return Some(top_most_with_filter(graph, initial, PinDirection::Output, filter));
    }

    let mut extra_roots = Vec::new();
    let mut events = Vec::new();
    let mut unlinked = Vec::new();
    for node in &tree {
        let node = *node;
        if graph.is_knot(node) || graph.is_comment(node) {
            continue;
        }
        let class = graph.node(node).map(|data| data.class.as_str()).unwrap_or("");
        if settings.is_extra_root_class(class) && graph.has_execution_to(initial, node) {
            extra_roots.push(node);
            continue;
        }
        if !graph.is_impure(node) {
            continue;
        }
        if graph.is_event(node) && graph.has_execution_to(initial, node) {
            events.push(node);
            continue;
        }
        let linked_exec_inputs = graph
            .linked_pins(node, Some(opposite))
            .into_iter()
            .filter(|pin| graph.is_exec_pin(*pin))
            .count();
        if linked_exec_inputs == 0 && graph.has_execution_to(initial, node) {
            unlinked.push(node);
        }
    }

    if !extra_roots.is_empty() {
        if extra_roots.contains(&initial) {
            return Some(initial);
        }
        extra_roots.sort_by(|a, b| sort_by_direction(graph, direction, *a, *b));
        extra_roots.sort_by_key(|node| graph.pins_by_direction(*node, PinDirection::Input).len());
        return extra_roots.first().copied();
    }

    for group in [&mut events, &mut unlinked] {
        if group.is_empty() {
            continue;
        }
        if group.contains(&initial) {
            return Some(initial);
        }
        group.sort_by(|a, b| sort_by_direction(graph, direction, *a, *b));
        return group.first().copied();
    }

    let filter = |node: NodeId| is_selected(nodes_to_format, node) && (graph.is_impure(node) || graph.is_knot(node));
    let mut found = top_most_with_filter(graph, initial, opposite, filter);
    let mut visited = BTreeSet::from([found]);
    // a knot is never a root; continue along its output
    while graph.is_knot(found) {
        let next = graph
            .knot_output(found)
            .and_then(|pin| graph.linked_to(pin).first().copied())
            .map(|pin| pin.node);
        match next {
            Some(next) if visited.insert(next) => found = next,
            _ => break,
        }
    }
    (!graph.is_knot(found)).then_some(found)
}
