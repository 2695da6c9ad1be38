use std::collections::BTreeSet;

use blueprint_assist::config::{GraphType, Settings};
use blueprint_assist::layout::{
    CommentHandler, FormatterParameters, GraphFormatter, LayoutCx, NodeSizeCache, Rect, format_graph,
};
use blueprint_assist::parser::{parse_document, to_document};
use blueprint_assist::{Graph, GraphSession, Node, NodeId, NodeKind, Pin, PinId, PinKind, TickScheduler};
use proptest::prelude::*;

// ── Builders ─────────────────────────────────────────────────────────────

fn event(graph: &mut Graph, name: &str, x: f32, y: f32) -> NodeId {
    graph.add_node(
        Node::new(name, NodeKind::Event)
            .with_class("K2Node_Event")
            .at(x, y)
            .with_pin(Pin::exec_out("then")),
    )
}

fn call(graph: &mut Graph, name: &str, x: f32, y: f32) -> NodeId {
    graph.add_node(
        Node::new(name, NodeKind::Normal)
            .with_class("K2Node_CallFunction")
            .at(x, y)
            .with_pin(Pin::exec_in("exec"))
            .with_pin(Pin::exec_out("then")),
    )
}

fn call_with_input(graph: &mut Graph, name: &str, x: f32, y: f32) -> NodeId {
    graph.add_node(
        Node::new(name, NodeKind::Normal)
            .at(x, y)
            .with_pin(Pin::exec_in("exec"))
            .with_pin(Pin::exec_out("then"))
            .with_pin(Pin::param_in("value").with_data_type("float")),
    )
}

fn sequence(graph: &mut Graph, name: &str, outputs: usize) -> NodeId {
    let mut node = Node::new(name, NodeKind::Normal).with_pin(Pin::exec_in("exec"));
    for index in 0..outputs {
        node = node.with_pin(Pin::exec_out(format!("then_{index}")));
    }
    graph.add_node(node)
}

fn link(graph: &mut Graph, from: NodeId, from_pin: &str, to: NodeId, to_pin: &str) {
    let a = graph.find_pin(from, from_pin).expect("source pin");
    let b = graph.find_pin(to, to_pin).expect("target pin");
    assert!(graph.try_create_link(a, b), "link {from_pin} -> {to_pin} rejected");
}

fn pin(graph: &Graph, node: NodeId, name: &str) -> PinId {
    graph.find_pin(node, name).expect("pin")
}

fn run(graph: &mut Graph, settings: &Settings, node: NodeId, params: FormatterParameters) -> GraphFormatter {
    let sizes = NodeSizeCache::new();
    format_graph(graph, &sizes, settings, GraphType::Blueprint, node, params).expect("formatter ran")
}

fn bounds(graph: &mut Graph, settings: &Settings, node: NodeId) -> Rect {
    let sizes = NodeSizeCache::new();
    let cx = LayoutCx::new(graph, &sizes, settings);
    cx.node_bounds(node)
}

fn positions(graph: &Graph) -> Vec<(NodeId, (f32, f32))> {
    graph.node_ids().map(|node| (node, graph.position(node))).collect()
}

/// Follows `pin` through any chain of knots and returns the non-knot pins it reaches.
fn reachable_ends(graph: &Graph, pin: PinId) -> BTreeSet<PinId> {
    let mut out = BTreeSet::new();
    let mut stack: Vec<PinId> = graph.linked_to(pin).to_vec();
    let mut seen = BTreeSet::new();
    while let Some(next) = stack.pop() {
        if !seen.insert(next) {
            continue;
        }
        if graph.is_knot(next.node) {
            let through = if Some(next) == graph.knot_input(next.node) {
                graph.knot_output(next.node)
            } else {
                graph.knot_input(next.node)
            };
            if let Some(through) = through {
                stack.extend(graph.linked_to(through).iter().copied());
            }
        } else {
            out.insert(next);
        }
    }
    out
}

fn all_links(graph: &Graph) -> Vec<(PinId, PinId)> {
    let mut links = Vec::new();
    for node in graph.node_ids() {
        for output in graph.pins_by_direction(node, blueprint_assist::PinDirection::Output) {
            for input in graph.linked_to(output) {
                links.push((output, *input));
            }
        }
    }
    links
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[test]
fn linear_chain_lines_up_on_one_row() {
    let mut graph = Graph::new();
    let a = event(&mut graph, "A", 100.0, 100.0);
    let b = call(&mut graph, "B", 900.0, -300.0);
    let c = call(&mut graph, "C", -400.0, 700.0);
    link(&mut graph, a, "then", b, "exec");
    link(&mut graph, b, "then", c, "exec");

    let settings = Settings::default();
    run(&mut graph, &settings, a, FormatterParameters::default());

    let a_bounds = bounds(&mut graph, &settings, a);
    let b_bounds = bounds(&mut graph, &settings, b);
    assert_eq!(graph.position(a), (100.0, 100.0));
    assert_eq!(graph.x(b), a_bounds.right + 80.0);
    assert_eq!(graph.x(c), b_bounds.right + 80.0);
    assert_eq!(graph.y(b), graph.y(a));
    assert_eq!(graph.y(c), graph.y(a));
}

#[test]
fn fan_out_is_centered_on_branching_pins() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let split = sequence(&mut graph, "Split", 3);
    let children = [
        call(&mut graph, "B", 0.0, 0.0),
        call(&mut graph, "C", 0.0, 0.0),
        call(&mut graph, "D", 0.0, 0.0),
    ];
    link(&mut graph, root, "then", split, "exec");
    for (index, child) in children.iter().enumerate() {
        link(&mut graph, split, &format!("then_{index}"), *child, "exec");
    }

    let settings = Settings {
        center_branches: true,
        ..Settings::default()
    };
    run(&mut graph, &settings, root, FormatterParameters::default());

    let sizes = NodeSizeCache::new();
    let cx = LayoutCx::new(&mut graph, &sizes, &settings);
    let parent_pins: Vec<PinId> = (0..3)
        .map(|index| pin(&*cx.graph, split, &format!("then_{index}")))
        .collect();
    let child_pins: Vec<PinId> = children.iter().map(|child| pin(&*cx.graph, *child, "exec")).collect();
    let parent_center = cx.pins_center_y(&parent_pins);
    let child_center = cx.pins_center_y(&child_pins);
    assert!(
        (parent_center - child_center).abs() < 0.5,
        "branches centered at {child_center}, pins at {parent_center}"
    );
}

#[test]
fn formatted_nodes_do_not_overlap() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let split = sequence(&mut graph, "Split", 3);
    let b = call(&mut graph, "B", 0.0, 0.0);
    let c = call(&mut graph, "C", 0.0, 0.0);
    let d = call(&mut graph, "D", 0.0, 0.0);
    let e = call(&mut graph, "E", 0.0, 0.0);
    link(&mut graph, root, "then", split, "exec");
    link(&mut graph, split, "then_0", b, "exec");
    link(&mut graph, split, "then_1", c, "exec");
    link(&mut graph, split, "then_2", d, "exec");
    link(&mut graph, b, "then", e, "exec");

    let settings = Settings::default();
    let formatter = run(&mut graph, &settings, root, FormatterParameters::default());
    let formatted = formatter.formatted_nodes();
    assert_eq!(formatted.len(), 6);

    let sizes = NodeSizeCache::new();
    let cx = LayoutCx::new(&mut graph, &sizes, &settings);
    for (index, first) in formatted.iter().enumerate() {
        for second in &formatted[index + 1..] {
            let a = cx.node_bounds(*first);
            let b = cx.node_bounds(*second);
            assert!(
                !a.overlaps(&b),
                "{} overlaps {}",
                cx.graph.name(*first),
                cx.graph.name(*second)
            );
        }
    }
}

#[test]
fn formatting_twice_changes_nothing() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let split = sequence(&mut graph, "Split", 2);
    let b = call(&mut graph, "B", 40.0, 900.0);
    let c = call(&mut graph, "C", -70.0, -40.0);
    link(&mut graph, root, "then", split, "exec");
    link(&mut graph, split, "then_0", b, "exec");
    link(&mut graph, split, "then_1", c, "exec");

    let settings = Settings::default();
    run(&mut graph, &settings, root, FormatterParameters::default());
    let first = positions(&graph);
    run(&mut graph, &settings, root, FormatterParameters::default());
    assert_eq!(positions(&graph), first);
}

#[test]
fn cached_formatter_replays_unchanged_layout() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let b = call(&mut graph, "B", 500.0, 500.0);
    let c = call(&mut graph, "C", 900.0, -500.0);
    link(&mut graph, root, "then", b, "exec");
    link(&mut graph, b, "then", c, "exec");

    let settings = Settings {
        faster_formatting: true,
        ..Settings::default()
    };
    let mut session = GraphSession::new(graph, settings, GraphType::Blueprint);
    session.format_from_node(c, Vec::new(), None).expect("formatted");
    let first = positions(session.graph());
    session.format_from_node(c, Vec::new(), None).expect("formatted");
    assert_eq!(positions(session.graph()), first);
    assert_eq!(session.formatters().len(), 1);
}

#[test]
fn anchor_keeps_its_position() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", -250.0, 75.0);
    let b = call(&mut graph, "B", 333.0, 444.0);
    let c = call(&mut graph, "C", 10.0, -900.0);
    link(&mut graph, root, "then", b, "exec");
    link(&mut graph, b, "then", c, "exec");

    let settings = Settings::default();
    let params = FormatterParameters {
        anchor: Some(b),
        ..FormatterParameters::default()
    };
    run(&mut graph, &settings, c, params);
    assert_eq!(graph.position(b), (333.0, 444.0));
    assert_ne!(graph.position(root), (-250.0, 75.0));
}

#[test]
fn spanning_tree_is_acyclic_on_cyclic_graphs() {
    let mut graph = Graph::new();
    let a = call(&mut graph, "A", 0.0, 0.0);
    let b = call(&mut graph, "B", 300.0, 0.0);
    let c = call(&mut graph, "C", 600.0, 0.0);
    link(&mut graph, a, "then", b, "exec");
    link(&mut graph, b, "then", c, "exec");
    link(&mut graph, c, "then", a, "exec");

    let settings = Settings::default();
    let formatter = run(&mut graph, &settings, a, FormatterParameters::default());
    let GraphFormatter::Full(full) = formatter else {
        panic!("blueprint graphs use the full formatter");
    };
    let tree = full.spanning_tree();
    assert_eq!(tree.len(), 3);
    for index in tree.indices() {
        let mut seen = BTreeSet::new();
        let mut current = Some(index);
        while let Some(at) = current {
            assert!(seen.insert(tree.node(at)), "node is its own ancestor");
            current = tree.info(at).parent;
        }
    }
}

#[test]
fn far_parameter_wire_is_routed_through_knots() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let mut chain = vec![root];
    for name in ["A", "B", "C", "D", "E"] {
        let node = call_with_input(&mut graph, name, 0.0, 0.0);
        link(&mut graph, *chain.last().expect("chain"), "then", node, "exec");
        chain.push(node);
    }
    let value = graph.add_node(
        Node::new("Value", NodeKind::Normal).with_pin(Pin::param_out("out").with_data_type("float")),
    );
    let first = chain[1];
    let last = chain[5];
    link(&mut graph, value, "out", first, "value");
    link(&mut graph, value, "out", last, "value");
    let before = all_links(&graph);

    let settings = Settings {
        expand_nodes_by_height: false,
        ..Settings::default()
    };
    let formatter = run(&mut graph, &settings, root, FormatterParameters::default());
    assert!(formatter.knot_count() > 0, "expected routing knots");

    let source = pin(&graph, value, "out");
    let target = pin(&graph, last, "value");
    assert!(!graph.are_linked(source, target), "direct wire should be replaced");
    for (from, to) in before {
        assert!(
            reachable_ends(&graph, from).contains(&to),
            "{} lost its wire to {}",
            graph.pin_name(from),
            graph.pin_name(to)
        );
    }
}

#[test]
fn shared_getter_belongs_to_one_cluster() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let a = call_with_input(&mut graph, "A", 0.0, 0.0);
    let b = call_with_input(&mut graph, "B", 0.0, 0.0);
    link(&mut graph, root, "then", a, "exec");
    link(&mut graph, a, "then", b, "exec");
    let getter = graph.add_node(
        Node::new("Getter", NodeKind::Normal).with_pin(Pin::param_out("out").with_data_type("float")),
    );
    link(&mut graph, getter, "out", a, "value");
    link(&mut graph, getter, "out", b, "value");

    let settings = Settings::default();
    let formatter = run(&mut graph, &settings, root, FormatterParameters::default());
    let GraphFormatter::Full(full) = &formatter else {
        panic!("blueprint graphs use the full formatter");
    };
    let owners: Vec<NodeId> = [a, b]
        .into_iter()
        .filter(|node| {
            full.parameter_formatter(*node)
                .is_some_and(|cluster| cluster.formatted_nodes().contains(&getter))
        })
        .collect();
    assert_eq!(owners, vec![a]);

    let formatted: Vec<NodeId> = formatter
        .formatted_nodes()
        .into_iter()
        .filter(|node| !graph.is_knot(*node))
        .collect();
    assert_eq!(formatted.iter().filter(|node| **node == getter).count(), 1);
    assert_eq!(formatted.len(), 4);

    let sizes = NodeSizeCache::new();
    let cx = LayoutCx::new(&mut graph, &sizes, &settings);
    assert!(cx.node_bounds(getter).right <= cx.graph.x(a));
    for (index, first) in formatted.iter().enumerate() {
        for second in &formatted[index + 1..] {
            assert!(
                !cx.node_bounds(*first).overlaps(&cx.node_bounds(*second)),
                "{} overlaps {}",
                cx.graph.name(*first),
                cx.graph.name(*second)
            );
        }
    }
}

#[test]
fn reformatting_removes_previous_knots() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let a = call_with_input(&mut graph, "A", 0.0, 0.0);
    let b = call(&mut graph, "B", 0.0, 0.0);
    let c = call(&mut graph, "C", 0.0, 0.0);
    let d = call_with_input(&mut graph, "D", 0.0, 0.0);
    link(&mut graph, root, "then", a, "exec");
    link(&mut graph, a, "then", b, "exec");
    link(&mut graph, b, "then", c, "exec");
    link(&mut graph, c, "then", d, "exec");
    let value = graph.add_node(Node::new("Value", NodeKind::Normal).with_pin(Pin::param_out("out")));
    link(&mut graph, value, "out", a, "value");
    link(&mut graph, value, "out", d, "value");

    let settings = Settings {
        expand_nodes_by_height: false,
        ..Settings::default()
    };
    run(&mut graph, &settings, root, FormatterParameters::default());
    let knots_after_first = graph.node_ids().filter(|node| graph.is_knot(*node)).count();
    run(&mut graph, &settings, root, FormatterParameters::default());
    let knots_after_second = graph.node_ids().filter(|node| graph.is_knot(*node)).count();
    assert_eq!(knots_after_first, knots_after_second);
}

#[test]
fn pooled_knots_are_reused_across_formats() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let mut chain = vec![root];
    for name in ["A", "B", "C", "D", "E"] {
        let node = call_with_input(&mut graph, name, 0.0, 0.0);
        link(&mut graph, *chain.last().expect("chain"), "then", node, "exec");
        chain.push(node);
    }
    let value = graph.add_node(
        Node::new("Value", NodeKind::Normal).with_pin(Pin::param_out("out").with_data_type("float")),
    );
    link(&mut graph, value, "out", chain[1], "value");
    link(&mut graph, value, "out", chain[5], "value");

    let settings = Settings {
        expand_nodes_by_height: false,
        use_knot_node_pool: true,
        ..Settings::default()
    };
    let knots = |graph: &Graph| -> BTreeSet<NodeId> {
        graph.node_ids().filter(|node| graph.is_knot(*node)).collect()
    };
    run(&mut graph, &settings, root, FormatterParameters::default());
    let first = knots(&graph);
    assert!(!first.is_empty(), "expected routing knots");
    run(&mut graph, &settings, root, FormatterParameters::default());
    assert_eq!(knots(&graph), first);
}

#[test]
fn unused_pooled_knots_are_deleted() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let a = call(&mut graph, "A", 600.0, 0.0);
    let knot = graph.create_knot(400.0, 300.0, PinKind::Exec, None);
    let knot_in = graph.knot_input(knot).expect("knot input");
    let knot_out = graph.knot_output(knot).expect("knot output");
    assert!(graph.try_create_link(pin(&graph, root, "then"), knot_in));
    assert!(graph.try_create_link(knot_out, pin(&graph, a, "exec")));

    let settings = Settings {
        use_knot_node_pool: true,
        ..Settings::default()
    };
    let formatter = run(&mut graph, &settings, root, FormatterParameters::default());

    assert_eq!(formatter.knot_count(), 0);
    assert!(!graph.is_live(knot));
    assert!(graph.are_linked(pin(&graph, root, "then"), pin(&graph, a, "exec")));
}

#[test]
fn comment_box_counts_as_one_block_for_outsiders() {
    let mut graph = Graph::new();
    let x = call(&mut graph, "X", 0.0, 0.0);
    let x2 = call(&mut graph, "X2", 300.0, 0.0);
    let y = call(&mut graph, "Y", 0.0, 400.0);
    link(&mut graph, x, "then", x2, "exec");
    let comment = graph.add_node(Node::comment("M", 600.0, 200.0).at(-30.0, -66.0));
    graph.add_node_to_comment(comment, x).unwrap();
    graph.add_node_to_comment(comment, x2).unwrap();

    let settings = Settings::default();
    let sizes = NodeSizeCache::new();
    let cx = LayoutCx::new(&mut graph, &sizes, &settings);
    let mut handler = CommentHandler::new();
    handler.init(&*cx.graph, None);
    let tree: BTreeSet<NodeId> = [x, x2, y].into_iter().collect();
    let base = cx.node_bounds(x);

    let mut moved = BTreeSet::new();
    let outside = handler.relative_node_bounds(&cx, x, Some(y), base, &tree, &mut moved);
    assert_eq!(outside, base.expand(&handler.comment_bounds(&cx, comment, Some(y))));
    assert_eq!(moved, [x, x2].into_iter().collect());

    let mut moved = BTreeSet::new();
    let inside = handler.relative_node_bounds(&cx, x, Some(x2), base, &tree, &mut moved);
    assert_eq!(inside, base);
    assert!(moved.is_empty());
}

#[test]
fn comment_is_resized_around_its_members() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let b = call(&mut graph, "B", 50.0, 600.0);
    link(&mut graph, root, "then", b, "exec");
    let comment = graph.add_node(Node::comment("Note", 100.0, 100.0).at(5000.0, 5000.0));
    graph.add_node_to_comment(comment, root).unwrap();
    graph.add_node_to_comment(comment, b).unwrap();

    let settings = Settings::default();
    run(&mut graph, &settings, root, FormatterParameters::default());

    let root_bounds = bounds(&mut graph, &settings, root);
    let b_bounds = bounds(&mut graph, &settings, b);
    let box_bounds = bounds(&mut graph, &settings, comment);
    let title = graph.comment_data(comment).unwrap().title_height;
    assert_eq!(box_bounds.left, root_bounds.left - 30.0);
    assert_eq!(box_bounds.top, root_bounds.top.min(b_bounds.top) - 30.0 - title);
    assert_eq!(box_bounds.right, b_bounds.right + 30.0);
}

#[test]
fn comment_aware_layout_keeps_outsiders_clear() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let split = sequence(&mut graph, "Split", 3);
    let b = call(&mut graph, "B", 0.0, 0.0);
    let c = call(&mut graph, "C", 0.0, 0.0);
    let c2 = call(&mut graph, "C2", 0.0, 0.0);
    let d = call(&mut graph, "D", 0.0, 0.0);
    link(&mut graph, root, "then", split, "exec");
    link(&mut graph, split, "then_0", b, "exec");
    link(&mut graph, split, "then_1", c, "exec");
    link(&mut graph, split, "then_2", d, "exec");
    link(&mut graph, c, "then", c2, "exec");
    let comment = graph.add_node(Node::comment("Middle", 100.0, 100.0).at(-500.0, -500.0));
    graph.add_node_to_comment(comment, c).unwrap();
    graph.add_node_to_comment(comment, c2).unwrap();

    let settings = Settings {
        account_for_comments: true,
        ..Settings::default()
    };
    let formatter = run(&mut graph, &settings, root, FormatterParameters::default());
    let formatted: Vec<NodeId> = formatter
        .formatted_nodes()
        .into_iter()
        .filter(|node| !graph.is_knot(*node))
        .collect();
    assert_eq!(formatted.len(), 6);

    let sizes = NodeSizeCache::new();
    let cx = LayoutCx::new(&mut graph, &sizes, &settings);
    let box_bounds = cx.node_bounds(comment);
    for member in [c, c2] {
        assert!(box_bounds.contains(&cx.node_bounds(member)));
    }
    for outsider in [root, split, b, d] {
        assert!(
            !cx.node_bounds(outsider).overlaps(&box_bounds),
            "{} overlaps the comment",
            cx.graph.name(outsider)
        );
    }
    for (index, first) in formatted.iter().enumerate() {
        for second in &formatted[index + 1..] {
            assert!(
                !cx.node_bounds(*first).overlaps(&cx.node_bounds(*second)),
                "{} overlaps {}",
                cx.graph.name(*first),
                cx.graph.name(*second)
            );
        }
    }

    let first = positions(&graph);
    run(&mut graph, &settings, root, FormatterParameters::default());
    assert_eq!(positions(&graph), first);
}

#[test]
fn material_graph_uses_simple_formatter() {
    let mut graph = Graph::new();
    let output = graph.add_node(
        Node::new("Output", NodeKind::Normal)
            .at(800.0, 0.0)
            .with_pin(Pin::param_in("base")),
    );
    let texture = graph.add_node(
        Node::new("Texture", NodeKind::Normal)
            .at(0.0, 900.0)
            .with_pin(Pin::param_out("rgb")),
    );
    link(&mut graph, texture, "rgb", output, "base");

    let settings = Settings::default();
    let sizes = NodeSizeCache::new();
    let formatter = format_graph(
        &mut graph,
        &sizes,
        &settings,
        GraphType::MaterialGraph,
        texture,
        FormatterParameters::default(),
    )
    .expect("material graphs are formatted");
    assert!(matches!(formatter, GraphFormatter::Simple(_)));
    assert_eq!(formatter.root(), Some(output));
    assert_eq!(graph.position(output), (800.0, 0.0));
    assert_eq!(bounds(&mut graph, &settings, texture).right, 800.0 - 200.0);
}

#[test]
fn unknown_graph_type_is_left_alone() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let b = call(&mut graph, "B", 10.0, 10.0);
    link(&mut graph, root, "then", b, "exec");
    let sizes = NodeSizeCache::new();
    let settings = Settings::default();
    let result = format_graph(
        &mut graph,
        &sizes,
        &settings,
        GraphType::Unknown,
        root,
        FormatterParameters::default(),
    );
    assert!(result.is_none());
    assert_eq!(graph.position(b), (10.0, 10.0));
}

#[test]
fn format_all_stacks_event_trees() {
    let mut graph = Graph::new();
    let begin = event(&mut graph, "BeginPlay", 400.0, 50.0);
    let begin_call = call(&mut graph, "Print", 0.0, 0.0);
    let tick = event(&mut graph, "Tick", -900.0, 800.0);
    let tick_call = call(&mut graph, "Move", 0.0, 0.0);
    link(&mut graph, begin, "then", begin_call, "exec");
    link(&mut graph, tick, "then", tick_call, "exec");

    let mut session = GraphSession::new(graph, Settings::default(), GraphType::Blueprint);
    let trees = session.format_all();
    assert_eq!(trees.len(), 2);
    assert_eq!(trees[0].root, begin);

    let graph = session.graph();
    assert_eq!(graph.position(begin), (0.0, 0.0));
    assert_eq!(graph.x(tick), 0.0);
    let settings = session.settings().clone();
    let mut graph = session.into_graph();
    let first_bottom = bounds(&mut graph, &settings, begin)
        .expand(&bounds(&mut graph, &settings, begin_call))
        .bottom;
    assert_eq!(graph.y(tick), first_bottom + 250.0);
    assert_eq!(graph.y(tick_call), graph.y(tick));
}

#[test]
fn scheduler_formats_after_sizes_arrive() {
    let mut graph = Graph::new();
    let root = event(&mut graph, "Root", 0.0, 0.0);
    let b = call(&mut graph, "B", 0.0, 0.0);
    link(&mut graph, root, "then", b, "exec");

    let mut session = GraphSession::new(graph, Settings::default(), GraphType::Blueprint);
    let mut scheduler = TickScheduler::new();
    scheduler.tick(&mut session, 0.016);
    scheduler.tick(&mut session, 0.016);

    let c = call(session.graph_mut(), "C", 2000.0, 2000.0);
    link(session.graph_mut(), b, "then", c, "exec");
    assert!(session.on_node_added(c));

    for node in session.nodes_awaiting_size() {
        session.set_node_size(node, 200.0, 64.0);
    }
    let mut formatted = 0;
    for _ in 0..10 {
        formatted += scheduler.tick(&mut session, 0.016);
    }
    assert!(formatted >= 3);
    assert!(scheduler.is_idle());
    assert!(!session.has_pending());
    let b_right = session.graph().x(b) + 200.0;
    assert_eq!(session.graph().x(c), b_right + 80.0);
}

#[test]
fn document_survives_format_and_reparse() {
    let input = r#"{
        "graphType": "blueprint",
        "nodes": [
            { "name": "BeginPlay", "kind": "event", "x": 0, "y": 0,
              "pins": [ { "name": "then", "direction": "output", "kind": "exec" } ] },
            { "name": "Print", "x": 1200, "y": 900,
              "pins": [ { "name": "exec", "direction": "input", "kind": "exec" } ] }
        ],
        "links": [ { "from": "BeginPlay.then", "to": "Print.exec" } ]
    }"#;
    let parsed = parse_document(input).unwrap();
    let mut session = GraphSession::new(parsed.graph, Settings::default(), GraphType::Blueprint);
    let begin = session.graph().find_node("BeginPlay").unwrap();
    session.format_from_node(begin, Vec::new(), None).unwrap();

    let document = to_document(session.graph(), Some(GraphType::Blueprint), session.sizes());
    let json = serde_json::to_string(&document).unwrap();
    let reparsed = parse_document(&json).unwrap();
    let print = reparsed.graph.find_node("Print").unwrap();
    assert_eq!(reparsed.graph.position(print), (280.0, 0.0));
}

// ── Properties ───────────────────────────────────────────────────────────

fn rect_strategy() -> impl Strategy<Value = Rect> {
    (-5000.0f32..5000.0, -5000.0f32..5000.0, 0.0f32..2000.0, 0.0f32..2000.0)
        .prop_map(|(x, y, w, h)| Rect::from_point_size(x, y, w, h))
}

proptest! {
    #[test]
    fn union_contains_both_rects(a in rect_strategy(), b in rect_strategy()) {
        let union = a.expand(&b);
        prop_assert!(union.contains(&a));
        prop_assert!(union.contains(&b));
        prop_assert_eq!(a.intersects(&b), b.intersects(&a));
    }

    #[test]
    fn overlap_implies_intersection(a in rect_strategy(), b in rect_strategy()) {
        if a.overlaps(&b) {
            prop_assert!(a.intersects(&b));
        }
    }

    #[test]
    fn anchor_never_moves(
        coords in proptest::collection::vec((-3000.0f32..3000.0, -3000.0f32..3000.0), 4),
        anchor_index in 0usize..4,
    ) {
        let mut graph = Graph::new();
        let mut nodes = vec![event(&mut graph, "Root", coords[0].0, coords[0].1)];
        for (index, (x, y)) in coords.iter().enumerate().skip(1) {
            let node = call(&mut graph, &format!("N{index}"), *x, *y);
            link(&mut graph, nodes[index - 1], "then", node, "exec");
            nodes.push(node);
        }
        let anchor = nodes[anchor_index];
        let before = graph.position(anchor);
        let settings = Settings::default();
        let params = FormatterParameters {
            anchor: Some(anchor),
            ..FormatterParameters::default()
        };
        run(&mut graph, &settings, nodes[3], params);
        prop_assert_eq!(graph.position(anchor), before);
    }
}
