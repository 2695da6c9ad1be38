use std::cmp::Ordering;
use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::bounds::LayoutCx;
use super::formatter::EdGraphFormatter;
use super::types::{Margin, Rect, line_rect_intersection};
use crate::config::WiringStyle;
use crate::ir::{NodeId, PinDirection, PinId, PinKind};

// ── Track geometry ──────────────────────────────────────────────────
/// Horizontal inset of a track from the pins it joins.
const TRACK_INSET: f32 = 5.0;
/// Extra inset used when testing a track height against nodes.
const TRACK_TEST_INSET: f32 = 10.0;
/// Attempts at finding a free track height below the pins.
const TRACK_HEIGHT_SEARCH_LIMIT: usize = 100;
/// Knots closer than this horizontally are merged into one.
const KNOT_MERGE_DISTANCE: f32 = 50.0;
/// Horizontal distance of looping knots from the pins they serve.
const LOOPING_KNOT_OFFSET: f32 = 20.0;
/// Wires steeper than this ratio are left without knots.
const MAX_TRACK_SLOPE: f32 = 2.75;
/// Pins closer than this vertically count as level.
const SAME_HEIGHT_TOLERANCE: f32 = 5.0;

// ── Track model ─────────────────────────────────────────────────────

/// A knot to create on a track and the pins it serves.
#[derive(Debug, Clone)]
pub struct KnotCreation {
    pub pos: (f32, f32),
    /// Pin that caused this knot; the parent pin for the first knot.
    pub main_pin: PinId,
    /// Pins wired into this knot besides the chain.
    pub pins: Vec<PinId>,
    pub created: Option<NodeId>,
}

impl KnotCreation {
    fn new(pos: (f32, f32), main_pin: PinId, pins: Vec<PinId>) -> Self {
        Self {
            pos,
            main_pin,
            pins,
            created: None,
        }
    }

    fn connections(&self) -> Vec<PinId> {
        if self.pins.is_empty() {
            vec![self.main_pin]
        } else {
            self.pins.clone()
        }
    }
}

/// A horizontal run of knots carrying wires from one parent pin.
#[derive(Debug, Clone)]
pub struct KnotTrack {
    pub parent_pin: PinId,
    pub parent_pin_pos: (f32, f32),
    pub linked_to: Vec<PinId>,
    track_height: f32,
    /// The track follows this pin's height while set.
    pub pin_to_align_to: Option<PinId>,
    pub pin_aligned_x: f32,
    pub looping: bool,
    pub creations: Vec<KnotCreation>,
}

impl KnotTrack {
    pub fn last_pin(&self) -> PinId {
        self.linked_to.last().copied().unwrap_or(self.parent_pin)
    }

    pub fn height(&self, cx: &LayoutCx) -> f32 {
        match self.pin_to_align_to {
            Some(pin) => cx.pin_y(pin),
            None => self.track_height,
        }
    }

    pub fn bounds(&self, cx: &LayoutCx) -> Rect {
        let spacing = cx.settings.knot_track_spacing;
        let y = self.height(cx);
        let last_x = cx.pin_pos(self.last_pin()).0;
        let half = (spacing - 1.0) * 0.5;
        Rect::new(
            self.parent_pin_pos.0.min(last_x) + TRACK_INSET,
            y - half,
            self.parent_pin_pos.0.max(last_x) - TRACK_INSET,
            y + half,
        )
    }

    pub fn is_exec(&self, cx: &LayoutCx) -> bool {
        cx.graph.is_exec_pin(self.last_pin())
    }

    /// Moves the track and every pending knot on it to `y`.
    fn update_height(&mut self, y: f32) {
        let delta = y - self.track_height;
        for creation in &mut self.creations {
            creation.pos.1 += delta;
        }
        self.track_height = y;
    }

    /// Pins the stored height to the aligned pin and stops following it.
    fn clear_alignment(&mut self, cx: &LayoutCx) {
        if let Some(pin) = self.pin_to_align_to.take() {
            self.update_height(cx.pin_y(pin));
        }
    }

    /// Nodes the track joins.
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::from([self.parent_pin.node]);
        out.extend(self.linked_to.iter().map(|pin| pin.node));
        out
    }

    fn width(&self, cx: &LayoutCx) -> f32 {
        self.bounds(cx).width()
    }
}

/// Tracks of one parent node ordered as a block.
struct GroupedTracks {
    parent: NodeId,
    tracks: Vec<usize>,
    looping: bool,
    width: f32,
}

fn by_bool_desc(a: bool, b: bool) -> Ordering {
    b.cmp(&a)
}

impl EdGraphFormatter {
    pub fn knot_tracks(&self) -> &[KnotTrack] {
        &self.knot_tracks
    }

    // ── Entry ───────────────────────────────────────────────────────────

    /// Replaces long or obstructed wires with tracks of knot nodes.
    pub(super) fn format_knot_nodes(&mut self, cx: &mut LayoutCx) {
        self.knot_tracks.clear();
        self.make_knot_tracks(cx);
        self.merge_nearby_knot_tracks(cx);
        self.expand_knot_tracks(cx);
        self.remove_useless_creations(cx);
        self.create_knot_tracks(cx);
        if cx.settings.add_knot_nodes_to_comments {
            self.add_knot_nodes_to_comments(cx);
        }
        debug!(tracks = self.knot_tracks.len(), knots = self.knot_nodes.len(), "routed knot tracks");
    }

    // ── Collision helpers ───────────────────────────────────────────────

    fn node_collision_between(&self, cx: &LayoutCx, start: (f32, f32), end: (f32, f32), ignored: &[NodeId]) -> bool {
        let spacing = cx.settings.knot_track_spacing;
        self.formatted_graph_nodes()
            .into_iter()
            .filter(|node| !ignored.contains(node))
            .any(|node| {
                let bounds = cx.node_bounds(node).extend_by(Margin::symmetric(0.0, spacing - 1.0));
                line_rect_intersection(&bounds, start, end)
            })
    }

    fn any_collision_between_pins(&self, cx: &LayoutCx, pin: PinId, other: PinId) -> bool {
        self.node_collision_between(cx, cx.pin_pos(pin), cx.pin_pos(other), &[pin.node, other.node])
    }

    fn does_pin_need_track(&self, cx: &LayoutCx, pin: PinId, linked: &[PinId]) -> bool {
        match linked {
            [] => false,
            [other] => self.any_collision_between_pins(cx, pin, *other),
            _ => true,
        }
    }

    fn new_track(&self, cx: &LayoutCx, parent_pin: PinId, linked_to: Vec<PinId>, track_y: f32, looping: bool) -> KnotTrack {
        let mut track = KnotTrack {
            parent_pin,
            parent_pin_pos: cx.pin_pos(parent_pin),
            linked_to,
            track_height: track_y,
            pin_to_align_to: None,
            pin_aligned_x: 0.0,
            looping,
            creations: Vec::new(),
        };
        if !looping {
            self.find_track_height(cx, &mut track);
        }
        track
    }

    /// Puts the track on one of its end pins if the line is clear, otherwise
    /// on the first free height below the last pin.
    fn find_track_height(&self, cx: &LayoutCx, track: &mut KnotTrack) {
        let bounds = track.bounds(cx);
        let start = bounds.left + TRACK_TEST_INSET;
        let end = bounds.right - TRACK_TEST_INSET;
        let ignored = [track.parent_pin.node, track.last_pin().node];
        let spacing = cx.settings.knot_track_spacing;
        let nodes = self.formatted_graph_nodes();

        for pin in [track.parent_pin, track.last_pin()] {
            let y = cx.pin_y(pin);
            if !self.node_collision_between(cx, (start, y), (end, y), &ignored) {
                track.track_height = y;
                return;
            }
        }

        let mut test = cx.pin_y(track.last_pin());
        for _ in 0..TRACK_HEIGHT_SEARCH_LIMIT {
            let mut clear = true;
            for node in &nodes {
                if ignored.contains(node) {
                    continue;
                }
                let bounds = cx.node_bounds(*node).extend_by(Margin::symmetric(0.0, spacing - 1.0));
                if line_rect_intersection(&bounds, (start, test), (end, test)) {
                    clear = false;
                    test = bounds.bottom + 1.0;
                }
            }
            if clear {
                track.track_height = test;
                return;
            }
        }
    }

    /// Aligns the track to the parent pin or last pin when a straight wire
    /// from that pin reaches the other end without hitting nodes or tracks.
    fn try_align_track_to_end_pins(&self, cx: &LayoutCx, track: &mut KnotTrack, others: &[KnotTrack]) -> bool {
        let spacing = cx.settings.knot_track_spacing;
        let parent_y = cx.pin_y(track.parent_pin);
        let last_y = cx.pin_y(track.last_pin());
        let mut prefer_parent = parent_y > last_y || cx.graph.is_exec_pin(track.parent_pin);
        let nodes = self.formatted_graph_nodes();

        for attempt in 0..2 {
            if attempt == 1 {
                prefer_parent = !prefer_parent;
            }
            let (source, other) = if prefer_parent {
                (track.parent_pin, track.last_pin())
            } else {
                (track.last_pin(), track.parent_pin)
            };
            let source_pos = cx.pin_pos(source);
            let other_pos = cx.pin_pos(other);
            let padding = if cx.graph.is_parameter_pin(other) {
                self.pin_padding
            } else {
                self.padding
            };
            let point = match cx.graph.pin_direction(source) {
                Some(PinDirection::Output) => (other_pos.0 - padding.x, source_pos.1),
                _ => (other_pos.0 + padding.x, source_pos.1),
            };

            let node_hit = nodes.iter().any(|node| {
                *node != source.node
                    && *node != other.node
                    && line_rect_intersection(
                        &cx.node_bounds(*node).extend_by(Margin::symmetric(0.0, spacing - 1.0)),
                        source_pos,
                        point,
                    )
            });
            let track_hit = others.iter().any(|existing| {
                line_rect_intersection(
                    &existing.bounds(cx).extend_by(Margin::symmetric(0.0, spacing * 0.25)),
                    source_pos,
                    point,
                )
            });

            if !node_hit && !track_hit {
                track.pin_aligned_x = point.0;
                track.update_height(source_pos.1);
                track.pin_to_align_to = Some(source);
                return true;
            }
        }
        false
    }

    // ── Track construction ──────────────────────────────────────────────

    fn make_knot_tracks(&mut self, cx: &LayoutCx) {
        let formatted: BTreeSet<NodeId> = self.formatted_graph_nodes().into_iter().collect();
        let keep = |pin: &PinId| formatted.contains(&pin.node) && self.is_selected(pin.node);

        let mut tracks = Vec::new();
        for node in &formatted {
            let mut previous = 0usize;
            for pin in cx.graph.exec_pins(*node, PinDirection::Input) {
                let linked: Vec<PinId> = cx.graph.linked_to(pin).iter().copied().filter(keep).collect();
                if linked.is_empty() {
                    continue;
                }
                let groups = match cx.settings.execution_wiring_style {
                    WiringStyle::AlwaysMerge => vec![linked],
                    _ => linked.into_iter().map(|other| vec![other]).collect(),
                };
                for group in groups {
                    let made = self.make_exec_tracks(cx, pin, group, previous > 0, &tracks);
                    previous += made.iter().filter(|track| !track.looping).count();
                    tracks.extend(made);
                }
            }
        }

        for node in &formatted {
            let mut previous = 0usize;
            for pin in cx.graph.parameter_pins(*node, PinDirection::Output) {
                let linked: Vec<PinId> = cx.graph.linked_to(pin).iter().copied().filter(keep).collect();
                if linked.is_empty() {
                    continue;
                }
                let groups = match cx.settings.parameter_wiring_style {
                    WiringStyle::AlwaysMerge => vec![linked],
                    _ => linked.into_iter().map(|other| vec![other]).collect(),
                };
                for group in groups {
                    if let Some(track) = self.make_parameter_track(cx, pin, group, previous > 0, &tracks) {
                        previous += 1;
                        tracks.push(track);
                    }
                }
            }
        }
        self.knot_tracks = tracks;
    }

    /// Tracks for an execution input fed by `linked` outputs. Outputs right
    /// of the input get a looping track above both nodes.
    fn make_exec_tracks(
        &self,
        cx: &LayoutCx,
        parent_pin: PinId,
        mut linked: Vec<PinId>,
        previous_has_track: bool,
        existing: &[KnotTrack],
    ) -> Vec<KnotTrack> {
        let spacing = cx.settings.knot_track_spacing;
        let parent_pos = cx.pin_pos(parent_pin);
        let mut out = Vec::new();

        let looping: Vec<PinId> = linked
            .iter()
            .copied()
            .filter(|pin| cx.pin_pos(*pin).0 > parent_pos.0)
            .collect();
        for other in &looping {
            let other_pos = cx.pin_pos(*other);
            let top = cx.node_bounds(other.node).top.min(cx.node_bounds(parent_pin.node).top);
            let height = top - spacing * 2.0;
            let mut track = self.new_track(cx, parent_pin, vec![*other], height, true);
            track.creations.push(KnotCreation::new(
                (parent_pos.0 + LOOPING_KNOT_OFFSET, height),
                parent_pin,
                Vec::new(),
            ));
            track.creations.push(KnotCreation::new(
                (other_pos.0 - LOOPING_KNOT_OFFSET, height),
                *other,
                vec![*other],
            ));
            out.push(track);
        }
        linked.retain(|pin| !looping.contains(pin));

        let threshold = parent_pos.0 - self.padding.x * 1.5;
        linked.retain(|pin| cx.pin_pos(*pin).0 <= threshold);

        if let Some(level) = linked.iter().copied().find(|pin| {
            (cx.pin_y(*pin) - parent_pos.1).abs() < SAME_HEIGHT_TOLERANCE
                && !self.any_collision_between_pins(cx, parent_pin, *pin)
        }) {
            linked.retain(|pin| *pin != level);
        }
        if linked.is_empty() {
            return out;
        }

        linked.sort_by(|a, b| {
            let (ax, ay) = cx.graph.position(a.node);
            let (bx, by) = cx.graph.position(b.node);
            bx.total_cmp(&ax).then(by.total_cmp(&ay))
        });

        let Some(track) = self.build_track(cx, parent_pin, linked, previous_has_track, existing, &out) else {
            return out;
        };
        out.push(track);
        out
    }

    fn make_parameter_track(
        &self,
        cx: &LayoutCx,
        parent_pin: PinId,
        mut linked: Vec<PinId>,
        previous_has_track: bool,
        existing: &[KnotTrack],
    ) -> Option<KnotTrack> {
        let parent_pos = cx.pin_pos(parent_pin);
        let threshold = parent_pos.0 + self.padding.x * 2.0;
        linked.retain(|pin| cx.pin_pos(*pin).0 >= threshold);
        if linked.is_empty() {
            return None;
        }
        linked.sort_by(|a, b| {
            let (ax, ay) = cx.graph.position(a.node);
            let (bx, by) = cx.graph.position(b.node);
            ax.total_cmp(&bx).then(by.total_cmp(&ay))
        });
        self.build_track(cx, parent_pin, linked, previous_has_track, existing, &[])
    }

    /// Shared tail of track construction: decides whether the wires need a
    /// track at all and lays out one knot per distinct column.
    fn build_track(
        &self,
        cx: &LayoutCx,
        parent_pin: PinId,
        linked: Vec<PinId>,
        previous_has_track: bool,
        existing: &[KnotTrack],
        siblings: &[KnotTrack],
    ) -> Option<KnotTrack> {
        let parent_pos = cx.pin_pos(parent_pin);
        let last_pos = cx.pin_pos(*linked.last()?);
        let distance = (parent_pos.0 - last_pos.0).abs();
        let really_far =
            distance > cx.settings.knot_node_distance_threshold && !cx.settings.expand_nodes_by_height;
        let needs_track = self.does_pin_need_track(cx, parent_pin, &linked);

        let dx = last_pos.0 - parent_pos.0;
        let dy = last_pos.1 - parent_pos.1;
        if dy.abs() / dx.abs() >= MAX_TRACK_SLOPE {
            return None;
        }
        if !(really_far || previous_has_track || needs_track) {
            return None;
        }

        let exec = cx.graph.is_exec_pin(parent_pin);
        let mut track = self.new_track(cx, parent_pin, linked, parent_pos.1, false);
        let others: Vec<KnotTrack> = existing.iter().chain(siblings).cloned().collect();
        self.try_align_track_to_end_pins(cx, &mut track, &others);

        let height = track.height(cx);
        let first_x = if exec {
            parent_pos.0 - self.padding.x
        } else {
            parent_pos.0 + self.pin_padding.x
        };
        track
            .creations
            .push(KnotCreation::new((first_x, height), parent_pin, Vec::new()));

        for other in track.linked_to.clone() {
            let other_x = cx.pin_pos(other).0;
            let knot_x = if exec {
                (other_x + self.padding.x).min(parent_pos.0 - self.padding.x)
            } else {
                (other_x - self.pin_padding.x).max(parent_pos.0 + self.pin_padding.x)
            };
            if let Some(previous) = track.creations.last_mut()
                && (knot_x - previous.pos.0).abs() < KNOT_MERGE_DISTANCE
            {
                previous.pos.0 = knot_x;
                previous.pins.push(other);
                continue;
            }
            track
                .creations
                .push(KnotCreation::new((knot_x, height), other, vec![other]));
        }
        Some(track)
    }

    // ── Track merging and spacing ───────────────────────────────────────

    /// Folds tracks sharing a parent pin and height into one.
    fn merge_nearby_knot_tracks(&mut self, cx: &LayoutCx) {
        let mergeable = |track: &KnotTrack| {
            let style = if cx.graph.is_exec_pin(track.parent_pin) {
                cx.settings.execution_wiring_style
            } else {
                cx.settings.parameter_wiring_style
            };
            style == WiringStyle::MergeWhenNear && !track.looping
        };

        let mut tracks = std::mem::take(&mut self.knot_tracks);
        let mut pending: Vec<usize> = (0..tracks.len()).filter(|i| mergeable(&tracks[*i])).collect();
        let mut removed = BTreeSet::new();

        while let Some(current) = pending.pop() {
            for other in pending.clone() {
                if tracks[other].parent_pin != tracks[current].parent_pin
                    || tracks[other].height(cx) != tracks[current].height(cx)
                {
                    continue;
                }
                let creations = tracks[other].creations.clone();
                let linked = tracks[other].linked_to.clone();
                let target = &mut tracks[current];
                for creation in creations {
                    match target
                        .creations
                        .iter_mut()
                        .find(|existing| (existing.pos.0 - creation.pos.0).abs() < KNOT_MERGE_DISTANCE)
                    {
                        Some(existing) => existing.pins.extend(creation.pins),
                        None => {
                            target.creations.push(creation);
                            target.pin_to_align_to = None;
                        }
                    }
                }
                for pin in linked {
                    if !target.linked_to.contains(&pin) {
                        target.linked_to.push(pin);
                    }
                }
                removed.insert(other);
                pending.retain(|index| *index != other);
            }
        }

        self.knot_tracks = tracks
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !removed.contains(index))
            .map(|(_, track)| track)
            .collect();
    }

    fn expand_order(&self, cx: &LayoutCx, a: &KnotTrack, b: &KnotTrack) -> Ordering {
        by_bool_desc(a.is_exec(cx), b.is_exec(cx))
            .then(a.looping.cmp(&b.looping))
            .then_with(|| {
                let (ha, hb) = (a.height(cx), b.height(cx));
                if a.looping && b.looping {
                    hb.total_cmp(&ha)
                } else {
                    ha.total_cmp(&hb)
                }
            })
            .then_with(|| {
                let (wa, wb) = (a.width(cx), b.width(cx));
                if a.looping && b.looping {
                    wb.total_cmp(&wa)
                } else {
                    wa.total_cmp(&wb)
                }
            })
            .then_with(|| cx.pin_y(a.last_pin()).total_cmp(&cx.pin_y(b.last_pin())))
    }

    fn overlap_order(&self, cx: &LayoutCx, a: &KnotTrack, b: &KnotTrack) -> Ordering {
        a.looping
            .cmp(&b.looping)
            .then(by_bool_desc(a.is_exec(cx), b.is_exec(cx)))
            .then_with(|| {
                let (wa, wb) = (a.width(cx), b.width(cx));
                if a.looping && b.looping {
                    wb.total_cmp(&wa)
                } else {
                    wa.total_cmp(&wb)
                }
            })
            .then_with(|| cx.pin_y(a.last_pin()).total_cmp(&cx.pin_y(b.last_pin())))
    }

    /// Spreads overlapping tracks onto separate rows and pushes nodes below
    /// a track block down when the block runs into them.
    fn expand_knot_tracks(&mut self, cx: &mut LayoutCx) {
        let spacing = cx.settings.knot_track_spacing;
        let mut tracks = std::mem::take(&mut self.knot_tracks);
        for track in &mut tracks {
            if let Some(pin) = track.pin_to_align_to {
                let y = cx.pin_y(pin);
                track.update_height(y);
            }
        }

        let mut sorted: Vec<usize> = (0..tracks.len()).collect();
        sorted.sort_by(|a, b| self.expand_order(cx, &tracks[*a], &tracks[*b]));
        let mut pending = sorted.clone();
        let mut placed: BTreeSet<usize> = BTreeSet::new();

        while let Some(&current) = pending.first() {
            placed.insert(current);
            let track_y = tracks[current].height(cx);
            let lowest = track_y;

            let mut overlapping = vec![current];
            let mut block = tracks[current].bounds(cx);
            let mut found = true;
            while found {
                found = false;
                for &other in &sorted {
                    if overlapping.contains(&other) {
                        continue;
                    }
                    let other_bounds = tracks[other].bounds(cx);
                    if !block.intersects(&other_bounds) {
                        continue;
                    }
                    overlapping.push(other);
                    placed.insert(other);
                    found = true;
                    block.top = block.top.min(tracks[other].height(cx));
                    block.left = block.left.min(other_bounds.left);
                    block.right = block.right.max(other_bounds.right);
                    block.bottom = block.top + overlapping.len() as f32 * spacing;
                    tracks[current].clear_alignment(cx);
                    tracks[other].clear_alignment(cx);
                }
            }

            if overlapping.len() == 1 {
                pending.retain(|index| *index != current);
                continue;
            }

            let mut any_looping = false;
            let mut exec_tracks = Vec::new();
            let mut groups: Vec<GroupedTracks> = Vec::new();
            for &index in &overlapping {
                let track = &tracks[index];
                if cx.graph.is_exec_pin(track.parent_pin) && !track.looping {
                    exec_tracks.push(index);
                    continue;
                }
                any_looping |= track.looping;
                let parent = track.parent_pin.node;
                match groups.iter_mut().find(|group| group.parent == parent) {
                    Some(group) => group.tracks.push(index),
                    None => groups.push(GroupedTracks {
                        parent,
                        tracks: vec![index],
                        looping: false,
                        width: 0.0,
                    }),
                }
            }
            exec_tracks.sort_by(|a, b| self.overlap_order(cx, &tracks[*a], &tracks[*b]));
            for group in &mut groups {
                group.looping = group.tracks.iter().any(|index| tracks[*index].looping);
                group.width = group
                    .tracks
                    .iter()
                    .map(|index| tracks[*index].width(cx))
                    .fold(0.0, f32::max);
                group
                    .tracks
                    .sort_by(|a, b| self.overlap_order(cx, &tracks[*a], &tracks[*b]));
            }
            groups.sort_by(|a, b| a.looping.cmp(&b.looping).then(a.width.total_cmp(&b.width)));

            let order = exec_tracks
                .iter()
                .copied()
                .chain(groups.iter().flat_map(|group| group.tracks.iter().copied()));
            for (count, index) in order.enumerate() {
                tracks[index].update_height(lowest + count as f32 * spacing);
            }
            pending.retain(|index| !placed.contains(index));

            let mut expanded = block;
            expanded.bottom += if any_looping { spacing * 2.0 } else { spacing };

            let formatted = self.formatted_graph_nodes();
            let mut collision_top: Option<f32> = None;
            for node in &formatted {
                let skip = placed.iter().any(|index| {
                    let track = &tracks[*index];
                    *node == track.parent_pin.node
                        || *node == track.last_pin().node
                        || track.pin_to_align_to.is_some_and(|pin| pin.node == *node)
                });
                if skip {
                    continue;
                }
                let bounds = cx.node_bounds(*node);
                if bounds.intersects(&expanded) {
                    collision_top = Some(collision_top.map_or(bounds.top, |top| top.min(bounds.top)));
                }
            }
            let Some(collision_top) = collision_top else {
                continue;
            };

            let delta = expanded.bottom - collision_top;
            let mut moved = BTreeSet::new();
            for node in formatted {
                if cx.graph.y(node) > track_y {
                    cx.graph.translate(node, 0.0, delta);
                    moved.insert(node);
                }
            }

            for &index in &sorted {
                if placed.contains(&index) {
                    continue;
                }
                let track = &mut tracks[index];
                match track.pin_to_align_to {
                    Some(pin) => {
                        if moved.contains(&track.last_pin().node) || moved.contains(&track.parent_pin.node) {
                            let y = cx.pin_y(pin);
                            track.update_height(y);
                        }
                    }
                    None => {
                        if track.track_height > track_y {
                            let y = track.track_height + delta;
                            track.update_height(y);
                        }
                    }
                }
            }
        }
        self.knot_tracks = tracks;
    }

    /// Drops knots whose single wire already runs level with the track.
    fn remove_useless_creations(&mut self, cx: &LayoutCx) {
        for track in &mut self.knot_tracks {
            let height = track.height(cx);
            let mut kept: Vec<KnotCreation> = Vec::new();
            for creation in std::mem::take(&mut track.creations) {
                let connections = creation.connections();
                if let [only] = connections.as_slice()
                    && cx.pin_y(*only) == height
                {
                    if let Some(last) = kept.last_mut()
                        && !creation.pins.is_empty()
                    {
                        last.pins.push(*only);
                    }
                    continue;
                }
                kept.push(creation);
            }
            track.creations = kept;
        }
    }

    // ── Knot creation ───────────────────────────────────────────────────

    fn spawn_knot(&mut self, cx: &mut LayoutCx, like: PinId, pos: (f32, f32)) -> NodeId {
        let (kind, data_type) = cx
            .graph
            .pin(like)
            .map(|pin| (pin.kind, pin.data_type.clone()))
            .unwrap_or((PinKind::Exec, None));
        if cx.settings.use_knot_node_pool {
            let graph = &*cx.graph;
            let reusable = self.knot_pool.iter().position(|knot| {
                graph.is_live(*knot)
                    && graph.is_knot(*knot)
                    && graph
                        .knot_input(*knot)
                        .and_then(|pin| graph.pin(pin))
                        .is_some_and(|pin| pin.kind == kind && pin.data_type == data_type)
            });
            if let Some(index) = reusable {
                let knot = self.knot_pool.swap_remove(index);
                cx.place_knot(knot, pos);
                return knot;
            }
        }
        let knot = cx.graph.create_knot(0.0, 0.0, kind, data_type);
        cx.place_knot(knot, pos);
        knot
    }

    /// Creates the knots of every track and rewires through them.
    fn create_knot_tracks(&mut self, cx: &mut LayoutCx) {
        let mut tracks = std::mem::take(&mut self.knot_tracks);
        tracks.sort_by(|a, b| {
            by_bool_desc(a.is_exec(cx), b.is_exec(cx))
                .then(a.height(cx).total_cmp(&b.height(cx)))
                .then(a.parent_pin_pos.1.total_cmp(&b.parent_pin_pos.1))
                .then(a.width(cx).total_cmp(&b.width(cx)))
        });

        for track in &mut tracks {
            let exec = cx.graph.is_exec_pin(track.parent_pin);
            if !track.looping {
                track.creations.sort_by(|a, b| {
                    if exec {
                        b.pos.0.total_cmp(&a.pos.0)
                    } else {
                        a.pos.0.total_cmp(&b.pos.0)
                    }
                });
            }

            let aligned_y = track.pin_to_align_to.map(|pin| cx.pin_y(pin));
            let last_direction = cx.graph.pin_direction(track.last_pin());
            let mut previous: Option<NodeId> = None;

            for creation in &mut track.creations {
                let pos = (creation.pos.0, aligned_y.unwrap_or(creation.pos.1));
                let knot = self.spawn_knot(cx, track.parent_pin, pos);

                let chained = match previous {
                    None => cx.graph.link_knot_to(knot, track.parent_pin),
                    Some(prev) => {
                        let pair = if last_direction == Some(PinDirection::Output) {
                            cx.graph.knot_output(knot).zip(cx.graph.knot_input(prev))
                        } else {
                            cx.graph.knot_output(prev).zip(cx.graph.knot_input(knot))
                        };
                        pair.is_some_and(|(a, b)| cx.graph.try_create_link(a, b))
                    }
                };
                if !chained {
                    // the wires it would carry stay on their original links
                    debug!(pin = %cx.graph.pin_name(track.parent_pin), "knot chain link rejected");
                    if let Err(err) = cx.graph.remove_node(knot) {
                        warn!(%err, "failed to remove unchained knot");
                    }
                    continue;
                }
                creation.created = Some(knot);
                self.knot_nodes.insert(knot);

                for pin in &creation.pins {
                    if cx.graph.link_knot_to(knot, *pin) {
                        cx.graph.break_link(track.parent_pin, *pin);
                    }
                }
                previous = Some(knot);
            }
        }
        self.knot_tracks = tracks;
    }

    /// Puts a track's knots inside every comment that holds all the nodes
    /// the track joins.
    fn add_knot_nodes_to_comments(&mut self, cx: &mut LayoutCx) {
        if self.comments.is_empty() {
            return;
        }
        let comments: Vec<(NodeId, Vec<NodeId>)> = self
            .comments
            .comments()
            .map(|(comment, members)| (comment, members.to_vec()))
            .collect();
        for track in &self.knot_tracks {
            let nodes = track.nodes();
            for (comment, members) in &comments {
                if !nodes.iter().all(|node| members.contains(node)) {
                    continue;
                }
                for knot in track.creations.iter().filter_map(|creation| creation.created) {
                    if let Err(err) = cx.graph.add_node_to_comment(*comment, knot) {
                        debug!(%err, "could not add knot to comment");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Padding, Settings};
    use crate::ir::{Graph, Node, NodeKind, Pin};
    use crate::layout::bounds::{KNOT_WIDTH, NodeSizeCache};
    use crate::layout::formatter::FormatterParameters;

    struct Fixture {
        graph: Graph,
        a: NodeId,
        b: NodeId,
        then: PinId,
        exec: PinId,
    }

    fn linked_pair(a_pos: (f32, f32), b_pos: (f32, f32)) -> Fixture {
        let mut graph = Graph::new();
        let a = graph.add_node(
            Node::new("A", NodeKind::Normal)
                .at(a_pos.0, a_pos.1)
                .with_pin(Pin::exec_out("then")),
        );
        let b = graph.add_node(
            Node::new("B", NodeKind::Normal)
                .at(b_pos.0, b_pos.1)
                .with_pin(Pin::exec_in("exec")),
        );
        let then = graph.find_pin(a, "then").unwrap();
        let exec = graph.find_pin(b, "exec").unwrap();
        assert!(graph.try_create_link(then, exec));
        Fixture {
            graph,
            a,
            b,
            then,
            exec,
        }
    }

    fn route(graph: &mut Graph, pool: Vec<NodeId>) -> EdGraphFormatter {
        let settings = Settings::default();
        let sizes = NodeSizeCache::new();
        let mut formatter = EdGraphFormatter::new(
            FormatterParameters::default(),
            Padding::new(80.0, 150.0),
            Padding::new(40.0, 25.0),
        );
        formatter.node_pool = pool;
        let mut cx = LayoutCx::new(graph, &sizes, &settings);
        formatter.format_knot_nodes(&mut cx);
        formatter
    }

    #[test]
    fn level_wire_needs_no_knots() {
        let mut f = linked_pair((0.0, 0.0), (400.0, 0.0));
        let formatter = route(&mut f.graph, vec![f.a, f.b]);
        assert!(formatter.knot_nodes().is_empty());
        assert!(f.graph.are_linked(f.then, f.exec));
    }

    #[test]
    fn obstructed_wire_routes_below_obstacle() {
        let mut f = linked_pair((0.0, 0.0), (1200.0, 0.0));
        let wall = f.graph.add_node(Node::new("Wall", NodeKind::Normal).at(500.0, 20.0));
        let formatter = route(&mut f.graph, vec![f.a, f.b, wall]);

        assert_eq!(formatter.knot_nodes().len(), 2);
        assert!(!f.graph.are_linked(f.then, f.exec));
        let wall_bottom = f.graph.y(wall) + 40.0;
        for knot in formatter.knot_nodes() {
            assert!(f.graph.is_knot(*knot));
            assert!(f.graph.y(*knot) > wall_bottom);
        }

        // the wire still runs from A to B through the knots
        let first = f.graph.linked_to(f.then)[0].node;
        assert!(formatter.knot_nodes().contains(&first));
        let last = f.graph.linked_to(f.exec)[0].node;
        assert!(formatter.knot_nodes().contains(&last));
        assert_ne!(first, last);
    }

    #[test]
    fn backwards_wire_loops_over_both_nodes() {
        let mut f = linked_pair((600.0, 0.0), (0.0, 0.0));
        let formatter = route(&mut f.graph, vec![f.b, f.a]);

        let tracks = formatter.knot_tracks();
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].looping);
        assert_eq!(formatter.knot_nodes().len(), 2);
        for knot in formatter.knot_nodes() {
            assert!(f.graph.y(*knot) < 0.0);
        }
        assert!(!f.graph.are_linked(f.then, f.exec));

        // each knot sits just inside the pin it serves
        let center_x = |graph: &Graph, knot: NodeId| graph.x(knot) + KNOT_WIDTH * 0.5;
        let near_input = f.graph.linked_to(f.exec)[0].node;
        let near_output = f.graph.linked_to(f.then)[0].node;
        assert_eq!(center_x(&f.graph, near_input), 0.0 + LOOPING_KNOT_OFFSET);
        assert_eq!(center_x(&f.graph, near_output), 800.0 - LOOPING_KNOT_OFFSET);
    }

    #[test]
    fn unchainable_knots_are_dropped() {
        let mut f = linked_pair((0.0, 0.0), (400.0, 300.0));
        let settings = Settings::default();
        let sizes = NodeSizeCache::new();
        let mut formatter = EdGraphFormatter::new(
            FormatterParameters::default(),
            Padding::new(80.0, 150.0),
            Padding::new(40.0, 25.0),
        );
        let track = {
            let cx = LayoutCx::new(&mut f.graph, &sizes, &settings);
            KnotTrack {
                parent_pin: f.then,
                parent_pin_pos: cx.pin_pos(f.then),
                linked_to: vec![f.exec],
                track_height: 300.0,
                pin_to_align_to: None,
                pin_aligned_x: 0.0,
                looping: false,
                creations: vec![
                    KnotCreation::new((250.0, 300.0), f.then, Vec::new()),
                    KnotCreation::new((380.0, 300.0), f.exec, vec![f.exec]),
                ],
            }
        };
        // the source node goes away between planning and wiring
        f.graph.remove_node(f.a).unwrap();
        formatter.knot_tracks = vec![track];

        let mut cx = LayoutCx::new(&mut f.graph, &sizes, &settings);
        formatter.create_knot_tracks(&mut cx);

        assert!(formatter.knot_nodes().is_empty());
        assert!(f.graph.linked_to(f.exec).is_empty());
        assert_eq!(f.graph.node_ids().collect::<Vec<_>>(), vec![f.b]);
        assert!(
            formatter.knot_tracks()[0]
                .creations
                .iter()
                .all(|creation| creation.created.is_none())
        );
    }
}
