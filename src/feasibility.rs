//! Local/remote feasibility
//!
//! Decides, per request, whether every requested mbox and view can be
//! answered from the published artifact. Names that are not local-capable,
//! or that the artifact declares remote, must go to the remote service.

use crate::artifact::RuleArtifact;
use crate::error::DecisioningError;
use crate::types::{TargetDeliveryRequest, ViewSelector};
use std::collections::BTreeSet;

/// Outcome of a feasibility check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeasibilityVerdict {
    pub all_local: bool,
    pub reason: Option<String>,
    pub global_mbox: Option<String>,
    pub remote_mboxes: Vec<String>,
    pub remote_views: Vec<String>,
}

impl FeasibilityVerdict {
    fn unavailable() -> Self {
        Self {
            all_local: false,
            reason: Some(DecisioningError::ArtifactUnavailable.to_string()),
            ..Default::default()
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.all_local && self.global_mbox.is_some()
    }
}

/// Check a request against the current artifact, if any
pub fn evaluate_feasibility(
    request: &TargetDeliveryRequest,
    artifact: Option<&RuleArtifact>,
) -> FeasibilityVerdict {
    let Some(artifact) = artifact else {
        return FeasibilityVerdict::unavailable();
    };

    let remote_mboxes = remote_mboxes(request, artifact);
    let remote_views = remote_views(request, artifact);
    let global_mbox = Some(artifact.global_mbox.clone());

    if remote_mboxes.is_empty() && remote_views.is_empty() {
        return FeasibilityVerdict {
            all_local: true,
            global_mbox,
            ..Default::default()
        };
    }

    let mut parts = Vec::new();
    if !remote_mboxes.is_empty() {
        parts.push(format!("mboxes [{}]", remote_mboxes.join(", ")));
    }
    if !remote_views.is_empty() {
        parts.push(format!("views [{}]", remote_views.join(", ")));
    }

    FeasibilityVerdict {
        all_local: false,
        reason: Some(format!("remote activities in: {}", parts.join(", "))),
        global_mbox,
        remote_mboxes,
        remote_views,
    }
}

/// Requested mbox names; a page load stands for the global mbox
fn requested_mboxes<'a>(request: &'a TargetDeliveryRequest, artifact: &'a RuleArtifact) -> Vec<&'a str> {
    let delivery = &request.request;
    let mut names = Vec::new();
    if let Some(prefetch) = &delivery.prefetch {
        if prefetch.page_load.is_some() {
            names.push(artifact.global_mbox.as_str());
        }
        names.extend(prefetch.mboxes.iter().map(|m| m.name.as_str()));
    }
    if let Some(execute) = &delivery.execute {
        if execute.page_load.is_some() {
            names.push(artifact.global_mbox.as_str());
        }
        names.extend(execute.mboxes.iter().map(|m| m.name.as_str()));
    }
    names
}

fn remote_mboxes(request: &TargetDeliveryRequest, artifact: &RuleArtifact) -> Vec<String> {
    requested_mboxes(request, artifact)
        .into_iter()
        .filter(|name| !artifact.local_mboxes.contains(*name) || artifact.remote_mboxes.contains(*name))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn remote_views(request: &TargetDeliveryRequest, artifact: &RuleArtifact) -> Vec<String> {
    let selectors: Vec<ViewSelector> = request
        .request
        .prefetch
        .iter()
        .flat_map(|p| p.views.iter().map(|v| v.selector()))
        .collect();

    // a lone nameless view stands for every view
    if selectors.len() == 1 && selectors[0] == ViewSelector::All {
        return artifact
            .remote_views
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
    }

    selectors
        .into_iter()
        .filter_map(|s| match s {
            ViewSelector::Named(name) => Some(name),
            ViewSelector::All => None,
        })
        .filter(|name| !artifact.local_views.contains(name) || artifact.remote_views.contains(name))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
