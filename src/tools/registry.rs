//! Static catalog of available analysis tools.

use crate::conversation::MediaKind;

use super::spec::{ParamKind, ParameterSpec, TextFormat, ToolDefinition};

/// Read-only registry of tool definitions, shared by all conversations.
///
/// Adding a tool means registering one more definition here (plus an
/// executor); orchestration code never changes.
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Build a registry from an explicit list of definitions.
    #[must_use]
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        Self { tools }
    }

    /// Build the registry with the built-in geospatial analysis catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin_tools())
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// All tools in registration order, for prompt rendering.
    #[must_use]
    pub fn list(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Build the execution plan for a tool: declared dependencies first,
    /// skipping any dependency whose output already exists in the
    /// conversation, ending with the tool itself.
    #[must_use]
    pub fn execution_plan<'a>(
        &'a self,
        tool: &'a ToolDefinition,
        conversation: &crate::conversation::Conversation,
    ) -> Vec<&'a ToolDefinition> {
        let mut plan = Vec::new();
        self.collect_plan(tool, conversation, &mut plan);
        plan
    }

    fn collect_plan<'a>(
        &'a self,
        tool: &'a ToolDefinition,
        conversation: &crate::conversation::Conversation,
        plan: &mut Vec<&'a ToolDefinition>,
    ) {
        for dep in &tool.dependencies {
            if conversation.latest_artifact_from(dep).is_some() {
                continue;
            }
            if let Some(dep_def) = self.lookup(dep) {
                if !plan.iter().any(|t| t.name == dep_def.name) {
                    self.collect_plan(dep_def, conversation, plan);
                }
            }
        }
        if !plan.iter().any(|t| t.name == tool.name) {
            plan.push(tool);
        }
    }
}

/// The built-in geospatial tool catalog.
fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "preprocess_trip_data",
            description: "Filter raw trip point data (timestamp, longitude, latitude, \
                          point type, label) by point type, time-of-day window, or \
                          bounding box, producing a cleaned CSV.",
            params: vec![
                ParameterSpec::required(
                    "source_file",
                    "the raw trip data file to process",
                    ParamKind::FileRef,
                ),
                ParameterSpec::optional(
                    "point_type",
                    "which trip points to keep: 'start' for origins, 'end' for destinations",
                    ParamKind::Enum(vec!["start", "end"]),
                ),
                ParameterSpec::optional(
                    "start_time",
                    "the start of the time-of-day window (HH:MM:SS or seconds)",
                    ParamKind::Text(Some(TextFormat::TimeOfDay)),
                ),
                ParameterSpec::optional(
                    "end_time",
                    "the end of the time-of-day window (HH:MM:SS or seconds)",
                    ParamKind::Text(Some(TextFormat::TimeOfDay)),
                ),
                ParameterSpec::optional(
                    "bbox",
                    "a geographic bounding box as min_lon,min_lat,max_lon,max_lat",
                    ParamKind::Text(Some(TextFormat::BoundingBox)),
                ),
            ],
            dependencies: vec![],
            output_kind: MediaKind::Tabular,
        },
        ToolDefinition {
            name: "kmeans_cluster",
            description: "Group geographic points into K clusters with k-means and \
                          produce a GeoJSON layer with a cluster label per point. \
                          Longitude/latitude columns are detected automatically.",
            params: vec![
                ParameterSpec::required(
                    "input_file",
                    "the point data CSV to cluster (usually the preprocessing output)",
                    ParamKind::FileRef,
                ),
                ParameterSpec::required(
                    "n_clusters",
                    "the number of clusters (k)",
                    ParamKind::Number {
                        min: Some(1.0),
                        integer: true,
                    },
                ),
            ],
            dependencies: vec!["preprocess_trip_data"],
            output_kind: MediaKind::Vector,
        },
        ToolDefinition {
            name: "render_heatmap",
            description: "Render a point-density heat map over a basemap from point \
                          data and save it as a PNG image.",
            params: vec![
                ParameterSpec::required(
                    "input_file",
                    "the point data CSV to render (usually the preprocessing output)",
                    ParamKind::FileRef,
                ),
                ParameterSpec::optional("title", "the map title", ParamKind::Text(None)),
            ],
            dependencies: vec!["preprocess_trip_data"],
            output_kind: MediaKind::Image,
        },
        ToolDefinition {
            name: "render_clusters",
            description: "Render a cluster map: points colored by their cluster label, \
                          over a basemap, saved as a PNG image.",
            params: vec![
                ParameterSpec::required(
                    "input_file",
                    "the clustered GeoJSON layer to render (the kmeans_cluster output)",
                    ParamKind::FileRef,
                ),
                ParameterSpec::optional("title", "the map title", ParamKind::Text(None)),
            ],
            dependencies: vec!["kmeans_cluster"],
            output_kind: MediaKind::Image,
        },
        ToolDefinition {
            name: "assemble_animation",
            description: "Combine previously rendered map images into an animated GIF, \
                          for example to show how hotspots move over the day.",
            params: vec![
                ParameterSpec::optional(
                    "frames",
                    "a comma-separated list of image files to animate, in order \
                     (defaults to every image rendered so far)",
                    ParamKind::Text(None),
                ),
                ParameterSpec::optional(
                    "fps",
                    "frames per second of the animation",
                    ParamKind::Number {
                        min: Some(1.0),
                        integer: true,
                    },
                ),
            ],
            dependencies: vec![],
            output_kind: MediaKind::Animation,
        },
    ]
}
