use crate::ir::PinDirection;
use anyhow::Context;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Kind of graph being edited. Decides which formatter runs and with which
/// per-type settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GraphType {
    Unknown,
    Blueprint,
    SoundCue,
    BehaviorTree,
    MaterialGraph,
    NiagaraGraph,
    AnimGraph,
    ControlRigGraph,
    MetasoundGraph,
}

impl GraphType {
    /// Classifies a host graph class name.
    pub fn from_class_name(class_name: &str, settings: &Settings) -> Self {
        if settings
            .use_blueprint_formatting_for_these_graphs
            .iter()
            .any(|name| name == class_name)
        {
            return Self::Blueprint;
        }
        match class_name {
            "SoundCueGraph" => Self::SoundCue,
            "BehaviorTreeGraph" => Self::BehaviorTree,
            "MaterialGraph" => Self::MaterialGraph,
            "NiagaraGraph" => Self::NiagaraGraph,
            "AnimationGraph" | "AnimationStateMachineGraph" => Self::AnimGraph,
            "ControlRigGraph" => Self::ControlRigGraph,
            "MetasoundEditorGraph" => Self::MetasoundGraph,
            _ => class_name.parse().unwrap_or(Self::Unknown),
        }
    }
}

impl std::str::FromStr for GraphType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_ascii_lowercase().replace(['-', '_'], "");
        Ok(match normalized.as_str() {
            "blueprint" | "edgraph" => Self::Blueprint,
            "soundcue" => Self::SoundCue,
            "behaviortree" => Self::BehaviorTree,
            "material" | "materialgraph" => Self::MaterialGraph,
            "niagara" | "niagaragraph" => Self::NiagaraGraph,
            "anim" | "animgraph" => Self::AnimGraph,
            "controlrig" | "controlriggraph" => Self::ControlRigGraph,
            "metasound" | "metasoundgraph" => Self::MetasoundGraph,
            "unknown" => Self::Unknown,
            _ => return Err(format!("unknown graph type `{s}`")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoFormatting {
    Never,
    FormatAllConnected,
    FormatSingleConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WiringStyle {
    AlwaysMerge,
    MergeWhenNear,
    SingleWire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormattingStyle {
    Expanded,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterStyle {
    Helixing,
    LeftSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatAllStyle {
    Simple,
    Smart,
}

/// How root nodes are grouped into columns by format-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnStyle {
    Simple,
    NodeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatterEngine {
    /// Full per-root pipeline with parameters, knots and comments.
    Full,
    /// Single-direction tree layout.
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Padding {
    pub x: f32,
    pub y: f32,
}

impl Padding {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormatterSettings {
    pub padding: Padding,
    pub pin_padding: Padding,
    pub auto_formatting: AutoFormatting,
    pub direction: PinDirection,
    pub engine: FormatterEngine,
}

impl FormatterSettings {
    const fn simple(padding: Padding, auto_formatting: AutoFormatting, direction: PinDirection) -> Self {
        Self {
            padding,
            pin_padding: Padding::new(40.0, 25.0),
            auto_formatting,
            direction,
            engine: FormatterEngine::Simple,
        }
    }
}

/// Built-in per-graph-type settings. `Unknown` has no entry.
static DEFAULT_FORMATTERS: Lazy<BTreeMap<GraphType, FormatterSettings>> = Lazy::new(|| {
    use AutoFormatting::*;
    use PinDirection::*;
    let standard = Padding::new(80.0, 150.0);
    BTreeMap::from([
        (
            GraphType::Blueprint,
            FormatterSettings {
                padding: standard,
                pin_padding: Padding::new(40.0, 25.0),
                auto_formatting: FormatAllConnected,
                direction: Output,
                engine: FormatterEngine::Full,
            },
        ),
        (
            GraphType::BehaviorTree,
            FormatterSettings::simple(Padding::new(100.0, 100.0), FormatAllConnected, Output),
        ),
        (
            GraphType::MaterialGraph,
            FormatterSettings::simple(Padding::new(200.0, 100.0), Never, Input),
        ),
        (GraphType::NiagaraGraph, FormatterSettings::simple(standard, Never, Output)),
        (GraphType::AnimGraph, FormatterSettings::simple(standard, Never, Input)),
        (GraphType::SoundCue, FormatterSettings::simple(standard, Never, Input)),
        (GraphType::ControlRigGraph, FormatterSettings::simple(standard, Never, Output)),
        (GraphType::MetasoundGraph, FormatterSettings::simple(standard, Never, Output)),
    ])
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub formatters: BTreeMap<GraphType, FormatterSettings>,
    pub disabled_graphs: Vec<GraphType>,
    pub use_blueprint_formatting_for_these_graphs: Vec<String>,
    pub extra_root_node_types: Vec<String>,

    pub formatting_style: FormattingStyle,
    pub parameter_style: ParameterStyle,
    pub execution_wiring_style: WiringStyle,
    pub parameter_wiring_style: WiringStyle,

    pub parameter_padding: Padding,
    pub knot_track_spacing: f32,
    pub vertical_pin_spacing: f32,
    pub parameter_vertical_pin_spacing: f32,
    pub center_branches: bool,
    pub num_required_branches: usize,
    pub center_parameter_branches: bool,
    pub num_required_parameter_branches: usize,
    pub knot_node_distance_threshold: f32,
    pub helixing_height_max: f32,
    pub single_node_max_height: f32,

    pub expand_nodes_ahead_of_parameters: bool,
    pub expand_nodes_by_height: bool,
    pub expand_parameters_by_height: bool,
    pub create_knot_nodes: bool,
    pub use_knot_node_pool: bool,
    pub faster_formatting: bool,
    pub treat_delegates_as_execution_pins: bool,

    pub account_for_comments: bool,
    pub comment_node_padding: Padding,
    pub add_knot_nodes_to_comments: bool,
    pub try_to_handle_comment_nodes: bool,

    pub snap_to_grid: bool,
    pub grid_size: f32,

    pub format_all_style: FormatAllStyle,
    pub format_all_column_style: ColumnStyle,
    pub format_all_padding: Padding,
    pub auto_position_event_nodes: bool,

    pub refresh_node_size_before_formatting: bool,
    pub auto_format_delay_ticks: u32,
    /// Seconds to wait for measured node sizes before formatting anyway.
    pub size_timeout: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            formatters: DEFAULT_FORMATTERS.clone(),
            disabled_graphs: vec![GraphType::Unknown],
            use_blueprint_formatting_for_these_graphs: vec![
                "EdGraph".to_string(),
                "GameplayAbilityGraph".to_string(),
                "AnimationTransitionGraph".to_string(),
            ],
            extra_root_node_types: vec![
                "K2Node_FunctionEntry".to_string(),
                "K2Node_Tunnel".to_string(),
            ],
            formatting_style: FormattingStyle::Expanded,
            parameter_style: ParameterStyle::Helixing,
            execution_wiring_style: WiringStyle::AlwaysMerge,
            parameter_wiring_style: WiringStyle::AlwaysMerge,
            parameter_padding: Padding::new(40.0, 25.0),
            knot_track_spacing: 26.0,
            vertical_pin_spacing: 26.0,
            parameter_vertical_pin_spacing: 26.0,
            center_branches: false,
            num_required_branches: 3,
            center_parameter_branches: false,
            num_required_parameter_branches: 2,
            knot_node_distance_threshold: 800.0,
            helixing_height_max: 500.0,
            single_node_max_height: 300.0,
            expand_nodes_ahead_of_parameters: true,
            expand_nodes_by_height: true,
            expand_parameters_by_height: false,
            create_knot_nodes: true,
            use_knot_node_pool: false,
            faster_formatting: false,
            treat_delegates_as_execution_pins: false,
            account_for_comments: false,
            comment_node_padding: Padding::new(30.0, 30.0),
            add_knot_nodes_to_comments: true,
            try_to_handle_comment_nodes: true,
            snap_to_grid: false,
            grid_size: 16.0,
            format_all_style: FormatAllStyle::Simple,
            format_all_column_style: ColumnStyle::Simple,
            format_all_padding: Padding::new(800.0, 250.0),
            auto_position_event_nodes: false,
            refresh_node_size_before_formatting: true,
            auto_format_delay_ticks: 1,
            size_timeout: 3.0,
        }
    }
}

impl Settings {
    /// Settings for a graph type, `None` when formatting is disabled for it.
    pub fn formatter_settings(&self, graph_type: GraphType) -> Option<&FormatterSettings> {
        if self.disabled_graphs.contains(&graph_type) {
            return None;
        }
        self.formatters.get(&graph_type)
    }

    pub fn is_extra_root_class(&self, class: &str) -> bool {
        self.extra_root_node_types.iter().any(|name| name == class)
    }
}

// ── Config file ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormatterOverride {
    padding: Option<Padding>,
    pin_padding: Option<Padding>,
    auto_formatting: Option<AutoFormatting>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    formatters: Option<BTreeMap<GraphType, FormatterOverride>>,
    disabled_graphs: Option<Vec<GraphType>>,
    use_blueprint_formatting_for_these_graphs: Option<Vec<String>>,
    extra_root_node_types: Option<Vec<String>>,
    formatting_style: Option<FormattingStyle>,
    parameter_style: Option<ParameterStyle>,
    execution_wiring_style: Option<WiringStyle>,
    parameter_wiring_style: Option<WiringStyle>,
    parameter_padding: Option<Padding>,
    knot_track_spacing: Option<f32>,
    vertical_pin_spacing: Option<f32>,
    parameter_vertical_pin_spacing: Option<f32>,
    center_branches: Option<bool>,
    num_required_branches: Option<usize>,
    center_parameter_branches: Option<bool>,
    num_required_parameter_branches: Option<usize>,
    knot_node_distance_threshold: Option<f32>,
    helixing_height_max: Option<f32>,
    single_node_max_height: Option<f32>,
    expand_nodes_ahead_of_parameters: Option<bool>,
    expand_nodes_by_height: Option<bool>,
    expand_parameters_by_height: Option<bool>,
    create_knot_nodes: Option<bool>,
    use_knot_node_pool: Option<bool>,
    faster_formatting: Option<bool>,
    treat_delegates_as_execution_pins: Option<bool>,
    account_for_comments: Option<bool>,
    comment_node_padding: Option<Padding>,
    add_knot_nodes_to_comments: Option<bool>,
    try_to_handle_comment_nodes: Option<bool>,
    snap_to_grid: Option<bool>,
    grid_size: Option<f32>,
    format_all_style: Option<FormatAllStyle>,
    format_all_column_style: Option<ColumnStyle>,
    format_all_padding: Option<Padding>,
    auto_position_event_nodes: Option<bool>,
    refresh_node_size_before_formatting: Option<bool>,
    auto_format_delay_ticks: Option<u32>,
    size_timeout: Option<f32>,
}

macro_rules! merge {
    ($settings:ident, $file:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $file.$field {
                $settings.$field = value;
            }
        )+
    };
}

fn apply_config_file(settings: &mut Settings, parsed: ConfigFile) {
    if let Some(overrides) = parsed.formatters {
        for (graph_type, value) in overrides {
            let Some(entry) = settings.formatters.get_mut(&graph_type) else {
                continue;
            };
            if let Some(padding) = value.padding {
                entry.padding = padding;
            }
            if let Some(pin_padding) = value.pin_padding {
                entry.pin_padding = pin_padding;
            }
            if let Some(auto_formatting) = value.auto_formatting {
                entry.auto_formatting = auto_formatting;
            }
        }
    }
    merge!(
        settings,
        parsed,
        disabled_graphs,
        use_blueprint_formatting_for_these_graphs,
        extra_root_node_types,
        formatting_style,
        parameter_style,
        execution_wiring_style,
        parameter_wiring_style,
        parameter_padding,
        knot_track_spacing,
        vertical_pin_spacing,
        parameter_vertical_pin_spacing,
        center_branches,
        num_required_branches,
        center_parameter_branches,
        num_required_parameter_branches,
        knot_node_distance_threshold,
        helixing_height_max,
        single_node_max_height,
        expand_nodes_ahead_of_parameters,
        expand_nodes_by_height,
        expand_parameters_by_height,
        create_knot_nodes,
        use_knot_node_pool,
        faster_formatting,
        treat_delegates_as_execution_pins,
        account_for_comments,
        comment_node_padding,
        add_knot_nodes_to_comments,
        try_to_handle_comment_nodes,
        snap_to_grid,
        grid_size,
        format_all_style,
        format_all_column_style,
        format_all_padding,
        auto_position_event_nodes,
        refresh_node_size_before_formatting,
        auto_format_delay_ticks,
        size_timeout,
    );
}

/// Parses a settings override document. JSON5 is accepted when `json5` is set.
pub fn parse_config(contents: &str, json5: bool) -> anyhow::Result<Settings> {
    let parsed: ConfigFile = if json5 {
        json5::from_str(contents)?
    } else {
        serde_json::from_str(contents)?
    };
    let mut settings = Settings::default();
    apply_config_file(&mut settings, parsed);
    Ok(settings)
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let json5 = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json5"));
    parse_config(&contents, json5).with_context(|| format!("invalid config {}", path.display()))
}
