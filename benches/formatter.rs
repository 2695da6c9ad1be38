use blueprint_assist::config::{GraphType, Settings};
use blueprint_assist::layout::{FormatterParameters, NodeSizeCache, format_graph};
use blueprint_assist::parser::parse_document;
use blueprint_assist::{Graph, GraphSession, Node, NodeId, NodeKind, Pin};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// An event followed by `length` calls. Every `branch_every` calls a
/// two-way branch hangs a short side chain, and one value node feeds the
/// first and the last call so routing has a long wire to handle.
fn chain_graph(length: usize, branch_every: usize) -> (Graph, NodeId) {
    let mut graph = Graph::new();
    let root = graph.add_node(
        Node::new("Event", NodeKind::Event)
            .with_class("K2Node_Event")
            .with_pin(Pin::exec_out("then")),
    );
    let value = graph.add_node(Node::new("Value", NodeKind::Normal).with_pin(Pin::param_out("out")));
    let value_out = graph.find_pin(value, "out").expect("value pin");

    let mut prev = graph.find_pin(root, "then").expect("event pin");
    let mut first = None;
    let mut last = None;
    for i in 0..length {
        let node = graph.add_node(
            Node::new(format!("Call{i}"), NodeKind::Normal)
                .at((i * 37 % 400) as f32, (i * 91 % 700) as f32)
                .with_pin(Pin::exec_in("exec"))
                .with_pin(Pin::exec_out("then"))
                .with_pin(Pin::exec_out("else"))
                .with_pin(Pin::param_in("value")),
        );
        let exec = graph.find_pin(node, "exec").expect("exec pin");
        graph.try_create_link(prev, exec);
        first.get_or_insert(node);
        last = Some(node);

        if branch_every > 0 && i % branch_every == 0 {
            let side = graph.add_node(
                Node::new(format!("Side{i}"), NodeKind::Normal)
                    .with_pin(Pin::exec_in("exec"))
                    .with_pin(Pin::exec_out("then")),
            );
            let from = graph.find_pin(node, "else").expect("else pin");
            let to = graph.find_pin(side, "exec").expect("side pin");
            graph.try_create_link(from, to);
        }
        prev = graph.find_pin(node, "then").expect("then pin");
    }

    for node in [first, last].into_iter().flatten() {
        let input = graph.find_pin(node, "value").expect("value input");
        graph.try_create_link(value_out, input);
    }
    (graph, root)
}

fn document_source(length: usize) -> String {
    let mut nodes = vec![
        r#"{ "name": "Event", "kind": "event", "x": 0, "y": 0,
             "pins": [ { "name": "then", "direction": "output", "kind": "exec" } ] }"#
            .to_string(),
    ];
    let mut links = Vec::new();
    let mut prev = "Event".to_string();
    for i in 0..length {
        nodes.push(format!(
            r#"{{ "name": "Call{i}", "x": {x}, "y": {y},
                 "pins": [ {{ "name": "exec", "direction": "input", "kind": "exec" }},
                           {{ "name": "then", "direction": "output", "kind": "exec" }} ] }}"#,
            x = i * 50,
            y = i * 13 % 300,
        ));
        links.push(format!(r#"{{ "from": "{prev}.then", "to": "Call{i}.exec" }}"#));
        prev = format!("Call{i}");
    }
    format!(
        r#"{{ "graphType": "blueprint", "nodes": [{}], "links": [{}] }}"#,
        nodes.join(","),
        links.join(",")
    )
}

fn bench_format(c: &mut Criterion) {
    let mut group = c.benchmark_group("format");
    let settings = Settings::default();
    let sizes = NodeSizeCache::new();
    for (length, branch_every) in [(8, 0), (32, 4), (128, 6), (256, 3)] {
        let (graph, root) = chain_graph(length, branch_every);
        let name = format!("chain_{length}_branch_{branch_every}");
        group.bench_with_input(BenchmarkId::from_parameter(name), &graph, |b, data| {
            b.iter(|| {
                let mut graph = data.clone();
                let formatter = format_graph(
                    &mut graph,
                    &sizes,
                    &settings,
                    GraphType::Blueprint,
                    root,
                    FormatterParameters::default(),
                );
                black_box(formatter.map(|f| f.knot_count()));
            })
        });
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_replay");
    let settings = Settings {
        faster_formatting: true,
        ..Settings::default()
    };
    for length in [32, 128] {
        let (graph, root) = chain_graph(length, 4);
        let mut session = GraphSession::new(graph, settings.clone(), GraphType::Blueprint);
        session.format_from_node(root, Vec::new(), None);
        group.bench_with_input(BenchmarkId::from_parameter(length), &root, |b, root| {
            b.iter(|| black_box(session.format_from_node(*root, Vec::new(), None)))
        });
    }
    group.finish();
}

fn bench_end_to_end(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end");
    for length in [16, 96] {
        let source = document_source(length);
        group.bench_with_input(BenchmarkId::from_parameter(length), &source, |b, data| {
            b.iter(|| {
                let parsed = parse_document(black_box(data)).expect("parse failed");
                let mut session = GraphSession::new(parsed.graph, Settings::default(), GraphType::Blueprint);
                black_box(session.format_all().len());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_format, bench_replay, bench_end_to_end);
criterion_main!(benches);
