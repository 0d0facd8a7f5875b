//! Built-in geospatial tool executors.
//!
//! Filtering and clustering run in-process; map rendering and animation are
//! delegated to the external visualization collaborator, which shares the
//! output volume with the static file server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use crate::config::AgentConfig;
use crate::conversation::MediaKind;
use crate::error::ExecutionError;
use crate::pipeline::{ExecutionContext, ToolExecutor, ToolOutput};

/// Longitude column aliases recognized in input CSVs.
const LONGITUDE_ALIASES: [&str; 5] = ["longitude", "lon", "lng", "long", "x"];
/// Latitude column aliases recognized in input CSVs.
const LATITUDE_ALIASES: [&str; 3] = ["latitude", "lat", "y"];

/// Maximum k-means iterations before giving up on convergence.
const MAX_KMEANS_ITERATIONS: usize = 100;

/// Default animation frame rate.
const DEFAULT_FPS: u32 = 2;

/// Build the executor map for the built-in tool catalog.
#[must_use]
pub fn builtin_executors(config: &AgentConfig) -> HashMap<String, Arc<dyn ToolExecutor>> {
    let renderer = config
        .renderer_base_url
        .as_ref()
        .map(|base| Arc::new(RendererClient::new(base, config.request_timeout)));

    let mut executors: HashMap<String, Arc<dyn ToolExecutor>> = HashMap::new();
    executors.insert(
        "preprocess_trip_data".to_string(),
        Arc::new(PreprocessExecutor),
    );
    executors.insert("kmeans_cluster".to_string(), Arc::new(KmeansExecutor));
    executors.insert(
        "render_heatmap".to_string(),
        Arc::new(RenderExecutor {
            tool: "render_heatmap",
            endpoint: "heatmap",
            output_name: "heatmap.png",
            renderer: renderer.clone(),
        }),
    );
    executors.insert(
        "render_clusters".to_string(),
        Arc::new(RenderExecutor {
            tool: "render_clusters",
            endpoint: "clusters",
            output_name: "cluster_map.png",
            renderer: renderer.clone(),
        }),
    );
    executors.insert(
        "assemble_animation".to_string(),
        Arc::new(AnimationExecutor { renderer }),
    );
    executors
}

/// One parsed point row.
#[derive(Clone, Copy, Debug)]
struct TripPoint {
    timestamp: Option<f64>,
    longitude: f64,
    latitude: f64,
    point_type: Option<i64>,
}

/// A loaded point table: original row count plus the parsed points.
#[derive(Debug)]
struct PointTable {
    total_rows: usize,
    points: Vec<TripPoint>,
}

/// Read a point CSV, detecting longitude/latitude columns by alias.
///
/// Headerless files are accepted in the raw trip layout:
/// `timestamp,longitude,latitude,type,label`.
fn load_points(tool: &str, path: &Path, content: &str) -> Result<PointTable, ExecutionError> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let Some(first) = lines.next() else {
        return Err(ExecutionError::new(
            tool,
            format!("{} is empty", path.display()),
        ));
    };

    let first_fields: Vec<&str> = first.split(',').map(str::trim).collect();
    let headerless = first_fields
        .first()
        .is_some_and(|f| f.parse::<f64>().is_ok());

    let (lon_idx, lat_idx, ts_idx, type_idx, data_first) = if headerless {
        // Raw trip layout.
        (1, 2, Some(0), Some(3), Some(first))
    } else {
        let lower: Vec<String> = first_fields.iter().map(|f| f.to_lowercase()).collect();
        let lon = lower
            .iter()
            .position(|f| LONGITUDE_ALIASES.contains(&f.as_str()));
        let lat = lower
            .iter()
            .position(|f| LATITUDE_ALIASES.contains(&f.as_str()));
        let (Some(lon), Some(lat)) = (lon, lat) else {
            return Err(ExecutionError::new(
                tool,
                format!(
                    "could not find longitude/latitude columns in {}; available columns: {}",
                    path.display(),
                    first_fields.join(", ")
                ),
            ));
        };
        let ts = lower.iter().position(|f| f == "timestamp");
        let ty = lower.iter().position(|f| f == "type");
        (lon, lat, ts, ty, None)
    };

    let mut total_rows = 0;
    let mut points = Vec::new();
    for line in data_first.into_iter().chain(lines) {
        total_rows += 1;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let lon = fields.get(lon_idx).and_then(|f| f.parse::<f64>().ok());
        let lat = fields.get(lat_idx).and_then(|f| f.parse::<f64>().ok());
        let (Some(longitude), Some(latitude)) = (lon, lat) else {
            continue; // skip unparsable rows rather than failing the run
        };
        points.push(TripPoint {
            timestamp: ts_idx.and_then(|i| fields.get(i)).and_then(|f| f.parse().ok()),
            longitude,
            latitude,
            point_type: type_idx
                .and_then(|i| fields.get(i))
                .and_then(|f| f.parse().ok()),
        });
    }

    Ok(PointTable { total_rows, points })
}

/// Convert `HH:MM:SS`, `HH:MM`, or plain seconds into seconds-of-day.
fn time_to_seconds(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<f64>() {
        return Some(secs);
    }
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    // The first part is always hours: "8:30" means 08:30, not 8m30s.
    let mut seconds = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let value = part.parse::<f64>().ok()?;
        seconds += value * 60f64.powi(2 - i as i32);
    }
    Some(seconds)
}

/// Filters raw trip data by point type, time window, and bounding box.
pub struct PreprocessExecutor;

#[async_trait]
impl ToolExecutor for PreprocessExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<ToolOutput, ExecutionError> {
        const TOOL: &str = "preprocess_trip_data";

        let input = require_input(TOOL, ctx)?;
        let content = tokio::fs::read_to_string(&input).await.map_err(|e| {
            ExecutionError::new(TOOL, format!("could not read {}: {e}", input.display()))
        })?;
        let table = load_points(TOOL, &input, &content)?;

        // Only the two validated enum values select a filter; anything else
        // leaves the data unfiltered.
        let wanted_type = match ctx.str_param("point_type") {
            Some("start") => Some(0),
            Some("end") => Some(1),
            _ => None,
        };
        let start = ctx.str_param("start_time").and_then(time_to_seconds);
        let end = ctx.str_param("end_time").and_then(time_to_seconds);
        let bbox = ctx.str_param("bbox").map(parse_bbox).transpose()?;

        let kept: Vec<&TripPoint> = table
            .points
            .iter()
            .filter(|p| {
                wanted_type.is_none_or(|t| p.point_type == Some(t))
                    && start.is_none_or(|s| p.timestamp.is_some_and(|ts| ts >= s))
                    && end.is_none_or(|e| p.timestamp.is_some_and(|ts| ts <= e))
                    && bbox.is_none_or(|[min_lon, min_lat, max_lon, max_lat]| {
                        p.longitude >= min_lon
                            && p.longitude <= max_lon
                            && p.latitude >= min_lat
                            && p.latitude <= max_lat
                    })
            })
            .collect();

        let mut csv = String::from("timestamp,longitude,latitude,type\n");
        for p in &kept {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                p.timestamp.map_or_else(String::new, |t| t.to_string()),
                p.longitude,
                p.latitude,
                p.point_type.map_or_else(String::new, |t| t.to_string()),
            ));
        }

        let filename = filtered_name(&input);
        let out_path = ctx.output_dir().join(&filename);
        tokio::fs::write(&out_path, csv).await.map_err(|e| {
            ExecutionError::new(TOOL, format!("could not write {}: {e}", out_path.display()))
        })?;

        Ok(ToolOutput {
            artifacts: vec![ctx.artifact(&filename, MediaKind::Tabular, TOOL)],
            summary: format!(
                "filtered the data down to {} of {} points",
                kept.len(),
                table.total_rows
            ),
        })
    }
}

fn filtered_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("points");
    format!("filtered_{stem}.csv")
}

fn parse_bbox(text: &str) -> Result<[f64; 4], ExecutionError> {
    let values: Vec<f64> = text
        .split(',')
        .filter_map(|p| p.trim().parse().ok())
        .collect();
    match values.as_slice() {
        [a, b, c, d] => Ok([*a, *b, *c, *d]),
        _ => Err(ExecutionError::new(
            "preprocess_trip_data",
            "bbox must be min_lon,min_lat,max_lon,max_lat",
        )),
    }
}

/// Groups points into K clusters with Lloyd's algorithm and writes a GeoJSON
/// layer carrying a `cluster` property per point.
pub struct KmeansExecutor;

#[async_trait]
impl ToolExecutor for KmeansExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<ToolOutput, ExecutionError> {
        const TOOL: &str = "kmeans_cluster";

        let input = require_input(TOOL, ctx)?;
        let content = tokio::fs::read_to_string(&input).await.map_err(|e| {
            ExecutionError::new(TOOL, format!("could not read {}: {e}", input.display()))
        })?;
        let table = load_points(TOOL, &input, &content)?;

        let k = ctx
            .number_param("n_clusters")
            .map(|n| n as usize)
            .filter(|&n| n >= 1)
            .ok_or_else(|| ExecutionError::new(TOOL, "n_clusters must be a positive integer"))?;
        if table.points.len() < k {
            return Err(ExecutionError::new(
                TOOL,
                format!(
                    "cannot form {k} clusters from {} points",
                    table.points.len()
                ),
            ));
        }

        let assignments = kmeans(&table.points, k);

        let mut counts = vec![0usize; k];
        let features: Vec<Value> = table
            .points
            .iter()
            .zip(&assignments)
            .map(|(p, &cluster)| {
                counts[cluster] += 1;
                json!({
                    "type": "Feature",
                    "geometry": {
                        "type": "Point",
                        "coordinates": [p.longitude, p.latitude],
                    },
                    "properties": { "cluster": cluster },
                })
            })
            .collect();
        let layer = json!({ "type": "FeatureCollection", "features": features });

        let filename = "clusters.geojson";
        let out_path = ctx.output_dir().join(filename);
        let body = serde_json::to_vec(&layer)
            .map_err(|e| ExecutionError::new(TOOL, format!("could not encode GeoJSON: {e}")))?;
        tokio::fs::write(&out_path, body).await.map_err(|e| {
            ExecutionError::new(TOOL, format!("could not write {}: {e}", out_path.display()))
        })?;

        let breakdown = counts
            .iter()
            .enumerate()
            .map(|(i, c)| format!("cluster {i}: {c}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(ToolOutput {
            artifacts: vec![ctx.artifact(filename, MediaKind::Vector, TOOL)],
            summary: format!("grouped {} points into {k} clusters ({breakdown})", table.points.len()),
        })
    }
}

/// Lloyd's k-means over lon/lat, seeded from sampled points.
fn kmeans(points: &[TripPoint], k: usize) -> Vec<usize> {
    let mut rng = rand::thread_rng();
    let mut centroids: Vec<(f64, f64)> = Vec::with_capacity(k);
    let mut used = Vec::with_capacity(k);
    while centroids.len() < k {
        let idx = rng.gen_range(0..points.len());
        if !used.contains(&idx) {
            used.push(idx);
            centroids.push((points[idx].longitude, points[idx].latitude));
        }
    }

    let mut assignments = vec![0usize; points.len()];
    for _ in 0..MAX_KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let nearest = centroids
                .iter()
                .enumerate()
                .map(|(c, &(cx, cy))| {
                    let dx = p.longitude - cx;
                    let dy = p.latitude - cy;
                    (c, dx * dx + dy * dy)
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map_or(0, |(c, _)| c);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![(0.0f64, 0.0f64, 0usize); k];
        for (p, &c) in points.iter().zip(&assignments) {
            sums[c].0 += p.longitude;
            sums[c].1 += p.latitude;
            sums[c].2 += 1;
        }
        for (c, (sx, sy, n)) in sums.into_iter().enumerate() {
            if n > 0 {
                centroids[c] = (sx / n as f64, sy / n as f64);
            }
        }
    }
    assignments
}

/// HTTP client for the external visualization collaborator.
pub struct RendererClient {
    http: reqwest::Client,
    base_url: String,
}

impl RendererClient {
    /// Build a client for a renderer endpoint.
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Request a render and return the produced bytes.
    async fn render(&self, tool: &str, endpoint: &str, payload: Value) -> Result<Vec<u8>, ExecutionError> {
        let url = format!("{}/render/{endpoint}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ExecutionError::new(tool, format!("renderer unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(ExecutionError::new(
                tool,
                format!("renderer returned HTTP {}", response.status().as_u16()),
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExecutionError::new(tool, format!("renderer response truncated: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Delegates a map render (heat map or cluster map) to the visualization
/// collaborator and stores the returned image.
pub struct RenderExecutor {
    /// Registered tool name.
    pub tool: &'static str,
    /// Renderer endpoint suffix.
    pub endpoint: &'static str,
    /// Artifact filename.
    pub output_name: &'static str,
    /// Renderer client; absent when no renderer is configured.
    pub renderer: Option<Arc<RendererClient>>,
}

#[async_trait]
impl ToolExecutor for RenderExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<ToolOutput, ExecutionError> {
        let renderer = self.renderer.as_ref().ok_or_else(|| {
            ExecutionError::new(self.tool, "no visualization service is configured")
        })?;
        let input = require_input(self.tool, ctx)?;

        let payload = json!({
            "input_path": input.display().to_string(),
            "title": ctx.str_param("title"),
        });
        let bytes = renderer.render(self.tool, self.endpoint, payload).await?;

        let out_path = ctx.output_dir().join(self.output_name);
        tokio::fs::write(&out_path, bytes).await.map_err(|e| {
            ExecutionError::new(
                self.tool,
                format!("could not write {}: {e}", out_path.display()),
            )
        })?;

        Ok(ToolOutput {
            artifacts: vec![ctx.artifact(self.output_name, MediaKind::Image, self.tool)],
            summary: format!("rendered {}", self.output_name),
        })
    }
}

/// Combines previously rendered images into a GIF via the visualization
/// collaborator.
pub struct AnimationExecutor {
    /// Renderer client; absent when no renderer is configured.
    pub renderer: Option<Arc<RendererClient>>,
}

#[async_trait]
impl ToolExecutor for AnimationExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<ToolOutput, ExecutionError> {
        const TOOL: &str = "assemble_animation";

        let renderer = self
            .renderer
            .as_ref()
            .ok_or_else(|| ExecutionError::new(TOOL, "no visualization service is configured"))?;

        let frames: Vec<PathBuf> = match ctx.str_param("frames") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(|f| ctx.resolve(f))
                .collect(),
            None => ctx
                .prior_artifacts
                .iter()
                .filter(|a| a.kind == MediaKind::Image)
                .map(|a| ctx.resolve(&a.path))
                .collect(),
        };
        if frames.is_empty() {
            return Err(ExecutionError::new(
                TOOL,
                "there are no rendered images to animate yet",
            ));
        }

        let fps = ctx
            .number_param("fps")
            .map_or(DEFAULT_FPS, |f| f.max(1.0) as u32);
        let payload = json!({
            "frames": frames.iter().map(|f| f.display().to_string()).collect::<Vec<_>>(),
            "fps": fps,
        });
        let bytes = renderer.render(TOOL, "animation", payload).await?;

        let filename = "animation.gif";
        let out_path = ctx.output_dir().join(filename);
        tokio::fs::write(&out_path, bytes).await.map_err(|e| {
            ExecutionError::new(TOOL, format!("could not write {}: {e}", out_path.display()))
        })?;

        Ok(ToolOutput {
            artifacts: vec![ctx.artifact(filename, MediaKind::Animation, TOOL)],
            summary: format!("assembled {} frames into an animation at {fps} fps", frames.len()),
        })
    }
}

fn require_input(tool: &str, ctx: &ExecutionContext) -> Result<PathBuf, ExecutionError> {
    ctx.input.clone().ok_or_else(|| {
        ExecutionError::new(
            tool,
            "no input data file is available; upload one or name an earlier result",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const RAW_TRIPS: &str = "\
3600,120.10,30.20,0,a\n\
3700,120.11,30.21,1,a\n\
7200,120.30,30.40,0,b\n\
9000,121.00,31.00,0,c\n";

    fn ctx_for(dir: &Path, conv_id: &str, input: Option<PathBuf>, params: BTreeMap<String, Value>) -> ExecutionContext {
        std::fs::create_dir_all(dir.join(conv_id)).unwrap();
        ExecutionContext {
            conversation_id: conv_id.to_string(),
            output_root: dir.to_path_buf(),
            params,
            input,
            prior_artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_time_to_seconds() {
        assert_eq!(time_to_seconds("3600"), Some(3600.0));
        assert_eq!(time_to_seconds("01:00:00"), Some(3600.0));
        // Two-part times are hours:minutes, never minutes:seconds.
        assert_eq!(time_to_seconds("8:30"), Some(30600.0));
        assert_eq!(time_to_seconds("08:00"), Some(28800.0));
        assert_eq!(time_to_seconds("morning"), None);
    }

    #[test]
    fn test_load_points_headerless() {
        let table = load_points("t", Path::new("raw.csv"), RAW_TRIPS).unwrap();
        assert_eq!(table.total_rows, 4);
        assert_eq!(table.points.len(), 4);
        assert_eq!(table.points[0].point_type, Some(0));
    }

    #[test]
    fn test_load_points_header_aliases() {
        let csv = "id,lng,lat\n1,120.0,30.0\n2,121.0,31.0\n";
        let table = load_points("t", Path::new("x.csv"), csv).unwrap();
        assert_eq!(table.points.len(), 2);
        assert!((table.points[1].longitude - 121.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_points_no_coordinates() {
        let err = load_points("t", Path::new("x.csv"), "a,b\n1,2\n").unwrap_err();
        assert!(err.message.contains("longitude/latitude"));
    }

    #[tokio::test]
    async fn test_preprocess_filters_by_type_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.csv");
        tokio::fs::write(&input, RAW_TRIPS).await.unwrap();

        let mut params = BTreeMap::new();
        params.insert("point_type".to_string(), json!("start"));
        params.insert("end_time".to_string(), json!("02:00:00"));
        let ctx = ctx_for(dir.path(), "conv1", Some(input), params);

        let output = PreprocessExecutor.execute(&ctx).await.unwrap();
        assert_eq!(output.artifacts.len(), 1);
        assert!(output.summary.contains("2 of 4"));

        let written = ctx.resolve(&output.artifacts[0].path);
        let content = tokio::fs::read_to_string(written).await.unwrap();
        // Header plus the two start points within the window.
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_preprocess_unrecognized_type_applies_no_filter() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.csv");
        tokio::fs::write(&input, RAW_TRIPS).await.unwrap();

        let mut params = BTreeMap::new();
        params.insert("point_type".to_string(), json!("middle"));
        let ctx = ctx_for(dir.path(), "conv6", Some(input), params);

        let output = PreprocessExecutor.execute(&ctx).await.unwrap();
        assert!(output.summary.contains("4 of 4"), "{}", output.summary);
    }

    #[tokio::test]
    async fn test_kmeans_produces_geojson() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("points.csv");
        let mut csv = String::from("longitude,latitude\n");
        for i in 0..10 {
            csv.push_str(&format!("{},{}\n", 120.0 + f64::from(i) * 0.01, 30.0));
            csv.push_str(&format!("{},{}\n", 125.0 + f64::from(i) * 0.01, 35.0));
        }
        tokio::fs::write(&input, csv).await.unwrap();

        let mut params = BTreeMap::new();
        params.insert("n_clusters".to_string(), json!(2));
        let ctx = ctx_for(dir.path(), "conv2", Some(input), params);

        let output = KmeansExecutor.execute(&ctx).await.unwrap();
        let layer: Value = serde_json::from_slice(
            &tokio::fs::read(ctx.resolve(&output.artifacts[0].path)).await.unwrap(),
        )
        .unwrap();
        let features = layer["features"].as_array().unwrap();
        assert_eq!(features.len(), 20);

        // The two well-separated blobs end up in different clusters.
        let first = features[0]["properties"]["cluster"].as_u64().unwrap();
        let second = features[1]["properties"]["cluster"].as_u64().unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_kmeans_rejects_too_few_points() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("points.csv");
        tokio::fs::write(&input, "longitude,latitude\n120.0,30.0\n")
            .await
            .unwrap();

        let mut params = BTreeMap::new();
        params.insert("n_clusters".to_string(), json!(5));
        let ctx = ctx_for(dir.path(), "conv3", Some(input), params);

        let err = KmeansExecutor.execute(&ctx).await.unwrap_err();
        assert!(err.message.contains("cannot form 5 clusters"));
    }

    #[tokio::test]
    async fn test_render_without_renderer_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for(
            dir.path(),
            "conv4",
            Some(dir.path().join("x.csv")),
            BTreeMap::new(),
        );
        let executor = RenderExecutor {
            tool: "render_heatmap",
            endpoint: "heatmap",
            output_name: "heatmap.png",
            renderer: None,
        };
        let err = executor.execute(&ctx).await.unwrap_err();
        assert!(err.message.contains("no visualization service"));
    }

    #[tokio::test]
    async fn test_animation_requires_frames() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_for(dir.path(), "conv5", None, BTreeMap::new());
        let executor = AnimationExecutor {
            renderer: Some(Arc::new(RendererClient::new(
                "http://localhost:1",
                Duration::from_secs(1),
            ))),
        };
        let err = executor.execute(&ctx).await.unwrap_err();
        assert!(err.message.contains("no rendered images"));
    }
}
