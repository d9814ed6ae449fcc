//! Synapse graph: relationship edges between canvas nodes.
//!
//! Every unordered pair of independent nodes is scanned. A pair is linked when
//! the nodes lie within `max_dist` of each other and either share a tag that
//! is not on the generic stoplist or one is the lineage parent of the other.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use reelkit_core::config::{GraphConfig, KenBurnsConfig};
use reelkit_core::{AssetRef, FocalPoint, MediaType, Point2D, TransitionKind};

/// Full canvas record as kept by the surrounding asset store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasAsset {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub media_type: MediaType,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "unit_scale")]
    pub scale: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_stack_child: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub focal_point: Option<FocalPoint>,
    #[serde(default)]
    pub transition: Option<TransitionKind>,
    #[serde(default)]
    pub ken_burns: Option<KenBurnsConfig>,
}

fn unit_scale() -> f64 {
    1.0
}

impl CanvasAsset {
    /// The playback reference for this record.
    pub fn asset_ref(&self) -> AssetRef {
        let r = AssetRef::new(self.id.clone(), self.url.clone(), self.media_type);
        match self.transition {
            Some(kind) => r.with_transition(kind),
            None => r,
        }
    }
}

/// The lightweight projection a graph task receives. Never carries pixels,
/// captions or any other heavy field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
    pub tags: Vec<String>,
    pub is_stack_child: bool,
    pub parent_id: Option<String>,
}

impl GraphNode {
    pub fn project(asset: &CanvasAsset) -> Self {
        Self {
            id: asset.id.clone(),
            x: asset.x,
            y: asset.y,
            width: asset.width,
            height: asset.height,
            scale: asset.scale,
            tags: asset.tags.clone(),
            is_stack_child: asset.is_stack_child,
            parent_id: asset.parent_id.clone(),
        }
    }

    /// Top-left corner; pair distance is measured between origins.
    pub fn origin(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Center of the node's scaled box.
    pub fn center(&self) -> Point2D {
        Point2D::new(
            self.x + (self.width * self.scale) / 2.0,
            self.y + (self.height * self.scale) / 2.0,
        )
    }

    fn is_lineage_of(&self, other: &GraphNode) -> bool {
        self.parent_id.as_deref() == Some(other.id.as_str())
    }
}

/// One derived edge. Regenerated whenever the node set or focus changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynapseEdge {
    pub node_a: String,
    pub node_b: String,
    /// `[ax, ay, bx, by]`, the two node centers.
    pub points: [f64; 4],
    /// Stroke width.
    pub weight: f64,
    pub opacity: f64,
    /// Whether the edge touches the focused node.
    pub emphasis: bool,
    pub color: String,
    /// Stable render key, `"{node_a}-{node_b}"`.
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct GraphParams {
    pub max_dist: f64,
    pub generic_tags: HashSet<String>,
    pub focus_color: String,
    pub ambient_color: String,
}

impl GraphParams {
    pub fn from_config(config: &GraphConfig) -> Self {
        Self {
            max_dist: config.max_dist,
            generic_tags: config.generic_tags.iter().cloned().collect(),
            focus_color: config.focus_color.clone(),
            ambient_color: config.ambient_color.clone(),
        }
    }

    fn shares_specific_tag(&self, a: &GraphNode, b: &GraphNode) -> bool {
        a.tags
            .iter()
            .any(|tag| !self.generic_tags.contains(tag) && b.tags.contains(tag))
    }
}

impl Default for GraphParams {
    fn default() -> Self {
        Self::from_config(&GraphConfig::default())
    }
}

/// Build the synapse edges for `nodes`. Edges touching `focused` are drawn
/// with fixed emphasis; the rest fade with distance.
pub fn calculate_synapses(
    nodes: &[GraphNode],
    focused: Option<&str>,
    params: &GraphParams,
) -> Vec<SynapseEdge> {
    let max_dist = params.max_dist;
    let mut edges = Vec::new();

    for (i, a) in nodes.iter().enumerate() {
        if a.is_stack_child {
            continue;
        }
        for b in &nodes[i + 1..] {
            if b.is_stack_child {
                continue;
            }

            let dx = a.x - b.x;
            let dy = a.y - b.y;
            if dx.abs() > max_dist || dy.abs() > max_dist {
                continue;
            }
            let dist = a.origin().distance(&b.origin());
            if dist > max_dist {
                continue;
            }

            let linked =
                params.shares_specific_tag(a, b) || a.is_lineage_of(b) || b.is_lineage_of(a);
            if !linked {
                continue;
            }

            let emphasis = focused.is_some_and(|f| f == a.id || f == b.id);
            let (ca, cb) = (a.center(), b.center());
            let (weight, opacity, color) = if emphasis {
                (2.0, 0.8, &params.focus_color)
            } else {
                (
                    (1.5 - dist / 400.0).max(0.5),
                    (0.4 - dist / max_dist).max(0.05),
                    &params.ambient_color,
                )
            };

            edges.push(SynapseEdge {
                node_a: a.id.clone(),
                node_b: b.id.clone(),
                points: [ca.x, ca.y, cb.x, cb.y],
                weight,
                opacity,
                emphasis,
                color: color.clone(),
                key: format!("{}-{}", a.id, b.id),
            });
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, x: f64, y: f64, tags: &[&str]) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            x,
            y,
            width: 100.0,
            height: 50.0,
            scale: 1.0,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            is_stack_child: false,
            parent_id: None,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_shared_specific_tag_links_with_distance_decay() {
        let nodes = vec![node("a", 0.0, 0.0, &["beach"]), node("b", 60.0, 80.0, &["beach"])];
        let edges = calculate_synapses(&nodes, None, &GraphParams::default());
        assert_eq!(edges.len(), 1);
        let e = &edges[0];
        assert!(approx(e.weight, 1.25));
        assert!(approx(e.opacity, 0.4 - 100.0 / 800.0));
        assert!(!e.emphasis);
        assert_eq!(e.color, "#475569");
        assert_eq!(e.key, "a-b");
        assert_eq!(e.points, [50.0, 25.0, 110.0, 105.0]);
    }

    #[test]
    fn test_far_nodes_never_link() {
        // within the bounding box on both axes but over the true distance
        let nodes = vec![node("a", 0.0, 0.0, &["beach"]), node("b", 700.0, 700.0, &["beach"])];
        assert!(calculate_synapses(&nodes, None, &GraphParams::default()).is_empty());
        let nodes = vec![node("a", 0.0, 0.0, &["beach"]), node("b", 801.0, 0.0, &["beach"])];
        assert!(calculate_synapses(&nodes, None, &GraphParams::default()).is_empty());
    }

    #[test]
    fn test_generic_tags_do_not_link() {
        let nodes = vec![
            node("a", 0.0, 0.0, &["photo", "upload"]),
            node("b", 10.0, 0.0, &["photo", "upload"]),
        ];
        assert!(calculate_synapses(&nodes, None, &GraphParams::default()).is_empty());
    }

    #[test]
    fn test_lineage_links_without_tags() {
        let mut child = node("child", 10.0, 0.0, &[]);
        child.parent_id = Some("root".into());
        let nodes = vec![child, node("root", 0.0, 0.0, &[])];
        let edges = calculate_synapses(&nodes, None, &GraphParams::default());
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].key, "child-root");
    }

    #[test]
    fn test_stack_children_are_skipped() {
        let mut b = node("b", 10.0, 0.0, &["beach"]);
        b.is_stack_child = true;
        let nodes = vec![node("a", 0.0, 0.0, &["beach"]), b];
        assert!(calculate_synapses(&nodes, None, &GraphParams::default()).is_empty());
    }

    #[test]
    fn test_focused_edges_are_emphasised() {
        let nodes = vec![
            node("a", 0.0, 0.0, &["beach"]),
            node("b", 300.0, 400.0, &["beach"]),
            node("c", 0.0, 100.0, &["beach"]),
        ];
        let edges = calculate_synapses(&nodes, Some("b"), &GraphParams::default());
        assert_eq!(edges.len(), 3);
        let ab = edges.iter().find(|e| e.key == "a-b").unwrap();
        assert!(ab.emphasis);
        assert_eq!((ab.weight, ab.opacity), (2.0, 0.8));
        assert_eq!(ab.color, "#6366f1");
        let ac = edges.iter().find(|e| e.key == "a-c").unwrap();
        assert!(!ac.emphasis);
        // the far unfocused edge clamps at the floor values
        let unfocused = calculate_synapses(&nodes, None, &GraphParams::default());
        let ab = unfocused.iter().find(|e| e.key == "a-b").unwrap();
        assert_eq!((ab.weight, ab.opacity), (0.5, 0.05));
    }

    #[test]
    fn test_projection_drops_heavy_fields() {
        let asset: CanvasAsset = serde_json::from_str(
            r#"{"id":"n1","url":"local://n1","x":1,"y":2,"width":30,"height":40,
                "tags":["dune"],"parentId":"n0","caption":"long text","transition":"swirl"}"#,
        )
        .unwrap();
        let n = GraphNode::project(&asset);
        assert_eq!(n.scale, 1.0);
        assert_eq!(n.parent_id.as_deref(), Some("n0"));
        assert_eq!(asset.asset_ref().transition(), Some(TransitionKind::Swirl));
    }
}
