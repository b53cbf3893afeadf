//! Stage graph
//!
//! Nodes live in an arena and refer to their upstream nodes by index. A node
//! can only name upstream nodes that already exist, so the graph is acyclic
//! by construction and the arena order is a topological order.
//!
//! Fingerprints are computed when a node is added:
//! hash(stage label, pipeline version, upstream fingerprints, stage config).

use super::stage::StageKind;
use crate::config::GeneratorConfig;
use crate::models::{PipelineRequest, PIPELINE_VERSION};
use dissforge_common::Fingerprint;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    #[error("stage {0} added twice")]
    DuplicateStage(StageKind),

    #[error("stage {stage} depends on {missing}, which is not in the graph yet")]
    MissingUpstream { stage: StageKind, missing: StageKind },

    #[error("stage {0} is not in the graph")]
    UnknownStage(StageKind),

    #[error("stage config for {stage} is not serializable: {message}")]
    Config { stage: StageKind, message: String },
}

#[derive(Debug, Clone)]
pub struct StageNode {
    pub kind: StageKind,
    pub fingerprint: Fingerprint,
    pub upstream: Vec<NodeId>,
    pub config: Value,
}

#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    nodes: Vec<StageNode>,
    by_kind: HashMap<StageKind, NodeId>,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full generation graph for one request
    pub fn plan(request: &PipelineRequest, config: &GeneratorConfig) -> Result<Self, GraphError> {
        let options = request.options();
        let mut graph = StageGraph::new();

        graph.add(
            StageKind::Scrape,
            &[],
            json!({
                "source_url": request.source_url(),
                "max_comments": config.reddit.max_comments,
            }),
        )?;
        graph.add(
            StageKind::Analyze,
            &[StageKind::Scrape],
            json!({
                "model": config.ollama.model,
                "temperature": config.ollama.analysis_temperature,
                "max_tokens": config.ollama.analysis_max_tokens,
            }),
        )?;
        graph.add(
            StageKind::Generate,
            &[StageKind::Analyze],
            json!({
                "model": config.ollama.model,
                "temperature": config.ollama.generate_temperature,
                "max_tokens": config.ollama.generate_max_tokens,
                "options": to_value(StageKind::Generate, options)?,
            }),
        )?;
        graph.add(
            StageKind::Refine,
            &[StageKind::Generate],
            json!({
                "model": config.ollama.model,
                "temperature": config.ollama.refine_temperature,
                "max_tokens": config.ollama.refine_max_tokens,
                "options": to_value(StageKind::Refine, options)?,
            }),
        )?;
        graph.add(
            StageKind::Synthesize,
            &[StageKind::Refine],
            json!({
                "program": config.tts.program,
                "args": config.tts.args,
                "voice": config.tts.voice,
                "rate": config.tts.rate,
                "line_pause_ms": config.tts.line_pause_ms,
                "sample_rate": config.sample_rate,
            }),
        )?;
        graph.add(
            StageKind::BeatLoad,
            &[],
            json!({
                "beat_id": request.beat_id(),
                "sample_rate": config.sample_rate,
            }),
        )?;
        graph.add(
            StageKind::BeatGrid,
            &[StageKind::BeatLoad],
            to_value(StageKind::BeatGrid, &config.analyzer)?,
        )?;
        graph.add(
            StageKind::Align,
            &[StageKind::Refine, StageKind::Synthesize, StageKind::BeatGrid],
            to_value(StageKind::Align, &config.aligner)?,
        )?;
        graph.add(
            StageKind::Master,
            &[StageKind::Align, StageKind::BeatLoad],
            json!({
                "mastering": to_value(StageKind::Master, &config.mastering)?,
                "source": request.fingerprint(),
            }),
        )?;

        Ok(graph)
    }

    /// Append a node whose upstream stages are already present
    pub fn add(&mut self, kind: StageKind, upstream: &[StageKind], config: Value) -> Result<NodeId, GraphError> {
        if self.by_kind.contains_key(&kind) {
            return Err(GraphError::DuplicateStage(kind));
        }

        let upstream_ids = upstream
            .iter()
            .map(|u| {
                self.by_kind.get(u).copied().ok_or(GraphError::MissingUpstream {
                    stage: kind,
                    missing: *u,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = Fingerprint::builder().field(kind.label()).field(PIPELINE_VERSION);
        for id in &upstream_ids {
            builder = builder.fingerprint(&self.nodes[id.0].fingerprint);
        }
        let fingerprint = builder.json(&config).finish();

        let id = NodeId(self.nodes.len());
        self.nodes.push(StageNode {
            kind,
            fingerprint,
            upstream: upstream_ids,
            config,
        });
        self.by_kind.insert(kind, id);
        Ok(id)
    }

    pub fn node(&self, kind: StageKind) -> Result<&StageNode, GraphError> {
        self.by_kind
            .get(&kind)
            .map(|id| &self.nodes[id.0])
            .ok_or(GraphError::UnknownStage(kind))
    }

    pub fn fingerprint(&self, kind: StageKind) -> Result<Fingerprint, GraphError> {
        Ok(self.node(kind)?.fingerprint)
    }

    /// Fingerprints of the direct upstream artifacts of `kind`
    pub fn upstream_fingerprints(&self, kind: StageKind) -> Result<BTreeSet<Fingerprint>, GraphError> {
        Ok(self
            .node(kind)?
            .upstream
            .iter()
            .map(|id| self.nodes[id.0].fingerprint)
            .collect())
    }

}

fn to_value<T: serde::Serialize>(stage: StageKind, value: &T) -> Result<Value, GraphError> {
    serde_json::to_value(value).map_err(|e| GraphError::Config {
        stage,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationOptions, LyricStyle};

    const POST: &str = "https://www.reddit.com/r/rust/comments/abc123/title";

    fn request(beat: &str, options: GenerationOptions) -> PipelineRequest {
        PipelineRequest::new(POST, Some(beat), options).unwrap()
    }

    #[test]
    fn test_plan_is_deterministic() {
        let config = GeneratorConfig::default();
        let a = StageGraph::plan(&request("a.wav", GenerationOptions::default()), &config).unwrap();
        let b = StageGraph::plan(&request("a.wav", GenerationOptions::default()), &config).unwrap();
        for kind in StageKind::ALL {
            assert_eq!(a.fingerprint(kind).unwrap(), b.fingerprint(kind).unwrap());
        }
        assert_eq!(a.nodes.len(), StageKind::ALL.len());
    }

    #[test]
    fn test_options_change_text_stages_only_from_generation_on() {
        let config = GeneratorConfig::default();
        let a = StageGraph::plan(&request("a.wav", GenerationOptions::default()), &config).unwrap();
        let b = StageGraph::plan(
            &request(
                "a.wav",
                GenerationOptions {
                    style: LyricStyle::Playful,
                    flow_complexity: 5,
                },
            ),
            &config,
        )
        .unwrap();

        for kind in [StageKind::Scrape, StageKind::Analyze, StageKind::BeatLoad, StageKind::BeatGrid] {
            assert_eq!(a.fingerprint(kind).unwrap(), b.fingerprint(kind).unwrap(), "{}", kind);
        }
        for kind in [StageKind::Generate, StageKind::Refine, StageKind::Synthesize, StageKind::Align, StageKind::Master] {
            assert_ne!(a.fingerprint(kind).unwrap(), b.fingerprint(kind).unwrap(), "{}", kind);
        }
    }

    #[test]
    fn test_beat_change_leaves_text_chain_cached() {
        let config = GeneratorConfig::default();
        let a = StageGraph::plan(&request("a.wav", GenerationOptions::default()), &config).unwrap();
        let b = StageGraph::plan(&request("b.wav", GenerationOptions::default()), &config).unwrap();
        assert_eq!(a.fingerprint(StageKind::Synthesize).unwrap(), b.fingerprint(StageKind::Synthesize).unwrap());
        assert_ne!(a.fingerprint(StageKind::BeatGrid).unwrap(), b.fingerprint(StageKind::BeatGrid).unwrap());
        assert_ne!(a.fingerprint(StageKind::Master).unwrap(), b.fingerprint(StageKind::Master).unwrap());
    }

    #[test]
    fn test_stage_config_changes_fingerprint() {
        let req = request("a.wav", GenerationOptions::default());
        let mut config = GeneratorConfig::default();
        let a = StageGraph::plan(&req, &config).unwrap();
        config.aligner.max_stretch = 1.5;
        let b = StageGraph::plan(&req, &config).unwrap();
        assert_eq!(a.fingerprint(StageKind::BeatGrid).unwrap(), b.fingerprint(StageKind::BeatGrid).unwrap());
        assert_ne!(a.fingerprint(StageKind::Align).unwrap(), b.fingerprint(StageKind::Align).unwrap());
    }

    #[test]
    fn test_edges() {
        let graph = StageGraph::plan(&request("a.wav", GenerationOptions::default()), &GeneratorConfig::default()).unwrap();
        let upstream = graph.upstream_fingerprints(StageKind::Align).unwrap();
        assert_eq!(upstream.len(), 3);
        assert!(upstream.contains(&graph.fingerprint(StageKind::BeatGrid).unwrap()));

        let master = graph.upstream_fingerprints(StageKind::Master).unwrap();
        assert!(master.contains(&graph.fingerprint(StageKind::BeatLoad).unwrap()));
        assert!(master.contains(&graph.fingerprint(StageKind::Align).unwrap()));
        assert!(graph.upstream_fingerprints(StageKind::Scrape).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_forward_reference() {
        let mut graph = StageGraph::new();
        let err = graph.add(StageKind::Analyze, &[StageKind::Scrape], json!({})).unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingUpstream {
                stage: StageKind::Analyze,
                missing: StageKind::Scrape
            }
        );
        graph.add(StageKind::Scrape, &[], json!({})).unwrap();
        assert_eq!(
            graph.add(StageKind::Scrape, &[], json!({})).unwrap_err(),
            GraphError::DuplicateStage(StageKind::Scrape)
        );
    }
}
