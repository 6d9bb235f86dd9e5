//! Caller-facing passes: live reconcile and synthetic replay.

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use trellis_core::{
    Integration, IntegrationKit, WorkloadKind, IMPORTED_KIND_ANNOTATION, IMPORTED_NAME_ANNOTATION, INTEGRATION_LABEL,
    PLATFORM_SELECTOR_ANNOTATION,
};
use trellis_kubehub::{is_not_found, SharedClient};

use crate::catalog::Catalog;
use crate::environment::{Environment, HookStage};
use crate::error::PipelineError;
use crate::registry::Registry;

const DEFAULT_OPERATOR_ID: &str = "trellis";

fn operator_id() -> String {
    std::env::var("TRELLIS_OPERATOR_ID").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| DEFAULT_OPERATOR_ID.to_string())
}

fn kit_annotation<'a>(kit: &'a IntegrationKit, key: &str) -> Option<&'a str> {
    kit.metadata.annotations.as_ref()?.get(key).map(|s| s.as_str())
}

/// Resolve platform and kit for the pass. The platform may legitimately be absent.
async fn new_environment(
    cancel: CancellationToken,
    client: &SharedClient,
    integration: Option<&Integration>,
    kit: Option<&IntegrationKit>,
) -> Result<Environment, PipelineError> {
    let (namespace, selected) = match (integration, kit) {
        (Some(it), _) => (it.namespace(), it.annotation(PLATFORM_SELECTOR_ANNOTATION)),
        (None, Some(k)) => (k.namespace(), kit_annotation(k, PLATFORM_SELECTOR_ANNOTATION)),
        (None, None) => return Err(PipelineError::Structural),
    };

    let platform = match client.platform_for(namespace, selected).await {
        Ok(p) => p,
        Err(e) if is_not_found(&e) => None,
        Err(e) => {
            let e = e.context(format!("looking up platform for namespace {}", namespace));
            return Err(PipelineError::Environment(e));
        }
    };

    let kit = match (kit, integration.and_then(|it| it.kit_reference().map(|r| (it, r)))) {
        (Some(k), _) => Some(k.clone()),
        (None, Some((it, r))) => {
            let ns = r.namespace.as_deref().unwrap_or(it.namespace());
            // None while the kit is still being built.
            client
                .integration_kit(ns, &r.name)
                .await
                .with_context(|| format!("getting integration kit {}/{}", ns, r.name))
                .map_err(PipelineError::Environment)?
        }
        (None, None) => None,
    };

    Ok(Environment {
        cancel,
        client: Some(client.clone()),
        operator_id: operator_id(),
        platform_profile: platform.as_ref().map(|p| p.profile()),
        platform,
        integration: integration.cloned(),
        kit,
        ..Default::default()
    })
}

/// Run the trait pipeline for an integration, or for a kit when no integration is given.
///
/// Conditions produced by the pass are written to the integration (or kit) status
/// even when the pass fails. On success the integration's `status.traits` becomes
/// its `spec.traits` merged with the executed traits, and post actions run.
pub async fn apply(
    cancel: CancellationToken,
    client: SharedClient,
    registry: &Registry,
    mut integration: Option<&mut Integration>,
    mut kit: Option<&mut IntegrationKit>,
) -> Result<Environment, PipelineError> {
    let mut env = new_environment(cancel, &client, integration.as_deref(), kit.as_deref()).await?;

    let mut catalog = Catalog::new(registry, Some(client));
    let (conditions, res) = catalog.apply(&mut env);

    for tc in &conditions {
        match (integration.as_deref_mut(), kit.as_deref_mut()) {
            (Some(it), _) => it.status.set_condition(tc.to_condition()),
            (None, Some(k)) => k.status.set_condition(tc.to_condition()),
            (None, None) => {}
        }
    }
    let traits = res?;

    if let Some(it) = integration.as_deref_mut() {
        let mut status = it.spec.traits.clone();
        status.merge(&traits);
        it.status.traits = status;
        env.integration = Some(it.clone());
    }

    let (total, errors) = env.run_hooks(HookStage::PostAction, false);
    if !errors.is_empty() {
        return Err(PipelineError::Hooks { stage: HookStage::PostAction, failed: errors.len(), total, errors });
    }

    match (integration.as_deref(), kit.as_deref()) {
        (Some(it), _) => debug!(integration = %it.name(), namespace = %it.namespace(), "applied traits to integration"),
        (None, Some(k)) => debug!(kit = %k.name(), namespace = %k.namespace(), "applied traits to integration kit"),
        (None, None) => {}
    }
    Ok(env)
}

/// Replay the pipeline for an integration imported from an existing workload.
///
/// There is no platform, so only traits that do not need one run. Returns `Ok(None)`
/// when the workload no longer carries the integration's ownership label.
pub async fn new_synthetic_environment(
    cancel: CancellationToken,
    client: SharedClient,
    registry: &Registry,
    integration: Option<&Integration>,
    kit: Option<&IntegrationKit>,
) -> Result<Option<Environment>, PipelineError> {
    if integration.is_none() && kit.is_none() {
        return Err(PipelineError::Structural);
    }
    let mut env = Environment {
        cancel,
        client: Some(client.clone()),
        operator_id: operator_id(),
        integration: integration.cloned(),
        kit: kit.cloned(),
        ..Default::default()
    };

    let mut catalog = Catalog::new(registry, Some(client.clone()));
    let (_, res) = catalog.apply(&mut env);
    res?;

    let it = integration.ok_or(PipelineError::MissingIntegration)?;
    let raw_kind = it.annotation(IMPORTED_KIND_ANNOTATION).unwrap_or_default();
    let kind: WorkloadKind = raw_kind.parse().map_err(|_| PipelineError::UnsupportedImportedKind(raw_kind.to_string()))?;
    let name = it.annotation(IMPORTED_NAME_ANNOTATION).unwrap_or_default();

    let workload = client.workload(kind, it.namespace(), name).await.map_err(PipelineError::Workload)?;
    let owner = workload.metadata.labels.as_ref().and_then(|l| l.get(INTEGRATION_LABEL)).map(|s| s.as_str());
    if owner != Some(it.name()) {
        info!(integration = %it.name(), kind = %kind, workload = %name, owner = ?owner, "imported workload no longer owned by integration");
        return Ok(None);
    }
    env.resources.add(workload);
    Ok(Some(env))
}
