use crate::config::{GraphType, load_config};
use crate::ir::{Graph, NodeId};
use crate::layout_dump::write_layout_dump;
use crate::parser::{parse_document, to_document};
use crate::session::GraphSession;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(name = "bafmt", version, about = "Auto-layout for execution/data-flow node graphs")]
pub struct Args {
    /// Input graph document (.json) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file. Defaults to stdout if omitted.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Settings overrides (.json or .json5)
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Node to format from. Defaults to the first event node.
    #[arg(short = 'r', long = "root")]
    pub root: Option<String>,

    /// Node that keeps its position
    #[arg(short = 'a', long = "anchor")]
    pub anchor: Option<String>,

    /// Format every root tree and arrange them in columns
    #[arg(long = "all")]
    pub all: bool,

    /// Graph type, overriding the document's
    #[arg(short = 't', long = "graphType")]
    pub graph_type: Option<GraphType>,

    /// Write node rectangles and links as JSON to this path
    #[arg(long = "dumpLayout")]
    pub dump_layout: Option<PathBuf>,

    /// Log pass summaries
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let settings = load_config(args.config.as_deref())?;
    let input = read_input(args.input.as_deref())?;
    let parsed = parse_document(&input).context("failed to read graph document")?;
    let graph_type = args
        .graph_type
        .or(parsed.graph_type)
        .unwrap_or(GraphType::Blueprint);

    let mut session = GraphSession::new(parsed.graph, settings, graph_type);
    for id in session.graph().node_ids().collect::<Vec<_>>() {
        if let Some(size) = parsed.sizes.get(id) {
            session.set_node_size(id, size.width, size.height);
        }
    }

    let anchor = args
        .anchor
        .as_deref()
        .map(|name| find_named(session.graph(), name))
        .transpose()?;

    if args.all {
        let trees = session.format_all();
        info!(trees = trees.len(), "formatted every root");
    } else {
        let start = match args.root.as_deref() {
            Some(name) => find_named(session.graph(), name)?,
            None => first_event(session.graph()).context("no event node to format from, pass --root")?,
        };
        if session.format_from_node(start, Vec::new(), anchor).is_none() {
            return Err(anyhow::anyhow!(
                "nothing was formatted from `{}` ({graph_type:?} graph)",
                session.graph().name(start)
            ));
        }
    }

    if let Some(path) = args.dump_layout.as_deref() {
        let knot_count = session.formatters().knot_count();
        let cx = session.layout_cx();
        write_layout_dump(path, &cx, graph_type, knot_count)
            .with_context(|| format!("failed to write layout dump {}", path.display()))?;
    }

    let document = to_document(session.graph(), Some(graph_type), session.sizes());
    let json = serde_json::to_string_pretty(&document)?;
    write_output(&json, args.output.as_deref())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .try_init();
}

fn find_named(graph: &Graph, name: &str) -> Result<NodeId> {
    graph
        .find_node(name)
        .ok_or_else(|| anyhow::anyhow!("no node named `{name}`"))
}

/// Top-most event node, left-most on ties.
fn first_event(graph: &Graph) -> Option<NodeId> {
    graph.node_ids().filter(|node| graph.is_event(*node)).min_by(|a, b| {
        let (ax, ay) = graph.position(*a);
        let (bx, by) = graph.position(*b);
        ay.total_cmp(&by).then(ax.total_cmp(&bx))
    })
}

fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path
        && path != Path::new("-")
    {
        return std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()));
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn write_output(json: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
