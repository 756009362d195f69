//! Request routing — decides which `(backend, model)` candidates serve a
//! request, in order.
//!
//! Resolution order (first rule that yields a concrete model wins the
//! primary; later rules only contribute fallbacks):
//!
//! 1. `x-backend` header pin — backend forced, client model kept, no
//!    fallbacks.
//! 2. `INFERSWITCH_BACKEND` process pin — same semantics.
//! 3. Expert routing — classifier names an expert; that expert's ordered
//!    model list becomes the candidates.
//! 4. Difficulty routing (legacy) — classifier buckets the request; the
//!    bucket indexes `difficulty_models`.
//! 5. Direct mapping — `model_providers[model]`.
//! 6. Vendor prefix — `claude-*` → anthropic, `gpt-*` → openai.
//! 7. The `fallback` block, appended last.
//!
//! While building lists, models currently on cool-down are skipped; a rule
//! whose list empties yields nothing and the next rule is consulted. Model
//! overrides are applied to the client-supplied model *before* this module
//! runs and are not re-applied to expert/difficulty selections.

use std::time::Instant;

use tracing::debug;

use crate::{
    availability::AvailabilityRegistry,
    classifier::{Classifier, ExpertDefinition},
    config::{Config, RoutingMode},
    error::GatewayError,
    types::CanonicalRequest,
};

/// One `(backend, model)` pair the pipeline may try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub backend: String,
    pub model: String,
}

/// Ordered, non-empty candidate list. Tried head-first.
pub type RouteDecision = Vec<Candidate>;

/// Everything the routing rules read.
pub struct RouteInputs<'a> {
    pub config: &'a Config,
    pub availability: &'a AvailabilityRegistry,
    pub classifier: Option<&'a dyn Classifier>,
    /// Per-request `x-backend` header, already validated against config.
    pub header_backend: Option<&'a str>,
    pub now: Instant,
}

/// Build the route for a request whose `model` is already post-override.
pub fn route(req: &CanonicalRequest, inputs: &RouteInputs) -> Result<RouteDecision, GatewayError> {
    let config = inputs.config;
    let model = req.model.as_str();

    // Rules 1 & 2: explicit pins bypass availability filtering — an operator
    // override outranks the cool-down bookkeeping.
    if let Some(backend) = inputs.header_backend {
        debug!(backend, model, "routing pinned by x-backend header");
        return Ok(vec![Candidate { backend: backend.to_string(), model: model.to_string() }]);
    }
    if let Some(backend) = &config.forced_backend {
        debug!(backend, model, "routing pinned by INFERSWITCH_BACKEND");
        return Ok(vec![Candidate { backend: backend.clone(), model: model.to_string() }]);
    }

    let mut decision: RouteDecision = Vec::new();

    match config.routing_mode() {
        RoutingMode::Expert => {
            if let Some(candidates) = expert_candidates(req, inputs) {
                decision = candidates;
            }
        }
        RoutingMode::Difficulty => {
            if let Some(candidates) = difficulty_candidates(req, inputs) {
                decision = candidates;
            }
        }
        RoutingMode::None => {}
    }

    // Rules 5 & 6: the client's own model, mapped or pattern-matched.
    if decision.is_empty() {
        if let Some(backend) = config.backend_for_model(model) {
            if inputs.availability.is_available(model, inputs.now) {
                decision.push(Candidate { backend, model: model.to_string() });
            }
        }
    }

    // Rule 7: the fallback block closes every list.
    if let Some(fallback) = &config.fallback {
        let candidate = Candidate {
            backend: fallback.provider.clone(),
            model: fallback.model.clone(),
        };
        if !decision.contains(&candidate)
            && inputs.availability.is_available(&fallback.model, inputs.now)
        {
            decision.push(candidate);
        }
    }

    if decision.is_empty() {
        return Err(GatewayError::NoRoute(model.to_string()));
    }

    debug!(
        model,
        primary_backend = %decision[0].backend,
        primary_model = %decision[0].model,
        fallbacks = decision.len() - 1,
        "route decided"
    );
    Ok(decision)
}

/// Rule 3: classify into an expert and take that expert's model ladder.
fn expert_candidates(req: &CanonicalRequest, inputs: &RouteInputs) -> Option<RouteDecision> {
    let classifier = inputs.classifier?;
    let config = inputs.config;

    let experts: Vec<ExpertDefinition> = config
        .expert_definitions
        .iter()
        .map(|(name, description)| ExpertDefinition {
            name: name.clone(),
            description: description.clone(),
        })
        .collect();
    if experts.is_empty() {
        return None;
    }

    let expert = classifier.classify_expert(req, &experts)?;
    let models = config.expert_models.get(&expert)?;
    debug!(expert = %expert, "expert classification");

    available_candidates(models, inputs)
}

/// Rule 4: classify into a difficulty bucket and take its model ladder.
fn difficulty_candidates(req: &CanonicalRequest, inputs: &RouteInputs) -> Option<RouteDecision> {
    let classifier = inputs.classifier?;
    let bucket = classifier.classify_difficulty(req);
    let models = inputs.config.difficulty_candidates(bucket)?;
    debug!(bucket, "difficulty classification");

    available_candidates(models, inputs)
}

/// Filter a model ladder down to routable, currently-available candidates.
/// Returns `None` when the filter empties the list, so the caller falls
/// through to the next rule.
fn available_candidates(models: &[String], inputs: &RouteInputs) -> Option<RouteDecision> {
    let mut out = Vec::with_capacity(models.len());
    for model in models {
        if !inputs.availability.is_available(model, inputs.now) {
            debug!(model = %model, "skipping model on cool-down");
            continue;
        }
        let Some(backend) = inputs.config.backend_for_model(model) else {
            continue;
        };
        let candidate = Candidate { backend, model: model.clone() };
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    (!out.is_empty()).then_some(out)
}
