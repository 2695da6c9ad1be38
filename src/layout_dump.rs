use crate::config::GraphType;
use crate::ir::PinDirection;
use crate::layout::{LayoutCx, Rect};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct LayoutDump {
    pub graph_type: String,
    pub width: f32,
    pub height: f32,
    pub knot_count: usize,
    pub nodes: Vec<NodeDump>,
    pub links: Vec<LinkDump>,
    pub comments: Vec<CommentDump>,
}

#[derive(Debug, Serialize)]
pub struct NodeDump {
    pub name: String,
    pub kind: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub measured: bool,
}

#[derive(Debug, Serialize)]
pub struct LinkDump {
    pub from: String,
    pub to: String,
    pub kind: String,
    pub points: Vec<[f32; 2]>,
}

#[derive(Debug, Serialize)]
pub struct CommentDump {
    pub name: String,
    pub members: Vec<String>,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl LayoutDump {
    pub fn from_layout(cx: &LayoutCx, graph_type: GraphType, knot_count: usize) -> Self {
        let graph = &*cx.graph;
        let mut nodes = Vec::new();
        let mut links = Vec::new();
        let mut comments = Vec::new();
        let mut extent: Option<Rect> = None;

        for id in graph.node_ids() {
            let bounds = cx.node_bounds(id);
            extent = Some(extent.map_or(bounds, |current| current.expand(&bounds)));

            if graph.is_comment(id) {
                comments.push(CommentDump {
                    name: graph.name(id).to_string(),
                    members: graph
                        .comment_members(id)
                        .into_iter()
                        .map(|member| graph.name(member).to_string())
                        .collect(),
                    x: bounds.left,
                    y: bounds.top,
                    width: bounds.width(),
                    height: bounds.height(),
                });
                continue;
            }

            nodes.push(NodeDump {
                name: graph.name(id).to_string(),
                kind: format!("{:?}", graph.kind(id).unwrap_or(crate::ir::NodeKind::Normal)),
                x: bounds.left,
                y: bounds.top,
                width: bounds.width(),
                height: bounds.height(),
                measured: !cx.sizes.is_pending(id),
            });

            for pin in graph.pins_by_direction(id, PinDirection::Output) {
                let start = cx.pin_pos(pin);
                for other in graph.linked_to(pin) {
                    let end = cx.pin_pos(*other);
                    links.push(LinkDump {
                        from: format!("{}.{}", graph.name(id), graph.pin_name(pin)),
                        to: format!("{}.{}", graph.name(other.node), graph.pin_name(*other)),
                        kind: graph
                            .pin_kind(pin)
                            .map(|kind| format!("{kind:?}"))
                            .unwrap_or_default(),
                        points: vec![[start.0, start.1], [end.0, end.1]],
                    });
                }
            }
        }

        let extent = extent.unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0));
        LayoutDump {
            graph_type: format!("{graph_type:?}"),
            width: extent.width(),
            height: extent.height(),
            knot_count,
            nodes,
            links,
            comments,
        }
    }
}

pub fn write_layout_dump(path: &Path, cx: &LayoutCx, graph_type: GraphType, knot_count: usize) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let dump = LayoutDump::from_layout(cx, graph_type, knot_count);
    serde_json::to_writer_pretty(writer, &dump)?;
    Ok(())
}
