//! IAM section extractors: tenancy metadata, tag namespaces, policies,
//! users + groups, dynamic groups, identity domains, compartments.

use serde_json::{json, Value};

use crate::cli_invoke::{build_array_query, build_query};
use crate::error::Result;

use super::{attach_children, collect_over_ids, ExtractorOutcome, OciCli};

/// Sequential step: fetch the tenancy's own metadata (name, description)
/// and merge it with the `id` already present from config discovery.
pub async fn capture_tenancy_metadata(cli: &dyn OciCli, tenancy_id: &str) -> Result<ExtractorOutcome> {
    let mut args = vec![
        "iam".to_string(),
        "tenancy".to_string(),
        "get".to_string(),
        "--tenancy-id".to_string(),
        tenancy_id.to_string(),
    ];
    args.extend(build_query(&["id", "name", "description", "home-region-key"]));

    match cli.invoke(args).await {
        Ok(mut value) => {
            if let Some(obj) = value.as_object_mut() {
                obj.entry("id").or_insert_with(|| Value::String(tenancy_id.to_string()));
            } else {
                value = json!({ "id": tenancy_id });
            }
            Ok(ExtractorOutcome::ok(value))
        }
        Err(e) => Ok(ExtractorOutcome {
            fragment: json!({ "id": tenancy_id }),
            exit_code: 1,
            diagnostics: vec![format!("unable to fetch tenancy metadata: {e}")],
        }),
    }
}

/// Tag-namespace extraction per §4.4's five-step algorithm:
/// 1. list namespaces under the tenancy, 2. mark `ignored`, 3. list tag
/// names then fetch each full tag definition, 4. list tag-defaults under
/// the tenancy, 5. attach the matching tag-default to each
/// `(namespace, tag)` pair or `null` if none match.
pub async fn extract_tag_namespaces(
    cli: &dyn OciCli,
    tenancy_id: &str,
    ignored_namespaces: &[String],
) -> Result<ExtractorOutcome> {
    let mut args = vec![
        "iam".to_string(),
        "tag-namespace".to_string(),
        "list".to_string(),
        "--compartment-id".to_string(),
        tenancy_id.to_string(),
    ];
    args.extend(build_array_query(&[
        "id",
        "name",
        "description",
        "is-retired",
        "defined-tags",
        "freeform-tags",
        "lifecycle-state",
    ]));

    let namespaces = match cli.invoke(args).await {
        Ok(Value::Array(items)) => items,
        Ok(_) => Vec::new(),
        Err(e) => {
            return Ok(ExtractorOutcome {
                fragment: Value::Array(vec![]),
                exit_code: 1,
                diagnostics: vec![format!("unable to list tag namespaces: {e}")],
            })
        }
    };

    let mut defaults_args = vec![
        "iam".to_string(),
        "tag-default".to_string(),
        "list".to_string(),
        "--compartment-id".to_string(),
        tenancy_id.to_string(),
    ];
    defaults_args.extend(build_array_query(&[
        "id",
        "value",
        "is-required",
        "lifecycle-state",
        "locks",
        "tag-namespace-id",
        "tag-definition-id",
    ]));

    let tag_defaults = match cli.invoke(defaults_args).await {
        Ok(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let mut namespaces = namespaces;
    let mut diagnostics = Vec::new();

    for ns in namespaces.iter_mut() {
        let name = ns.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let namespace_id = ns.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let ignored = ignored_namespaces.iter().any(|n| n == &name);
        if let Some(obj) = ns.as_object_mut() {
            obj.insert("ignored".to_string(), Value::Bool(ignored));
        }

        let mut tag_name_args = vec![
            "iam".to_string(),
            "tag".to_string(),
            "list".to_string(),
            "--tag-namespace-id".to_string(),
            namespace_id.clone(),
        ];
        tag_name_args.extend(build_array_query(&["name"]));

        let tag_names = match cli.invoke(tag_name_args).await {
            Ok(Value::Array(items)) => items,
            Ok(_) => Vec::new(),
            Err(e) => {
                diagnostics.push(format!("unable to list tag names for namespace {name}: {e}"));
                if let Some(obj) = ns.as_object_mut() {
                    obj.insert("tag-definitions".to_string(), Value::Array(vec![]));
                }
                continue;
            }
        };

        let mut tag_definitions = Vec::with_capacity(tag_names.len());
        for entry in tag_names {
            let tag_name = entry.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let mut tag_get_args = vec![
                "iam".to_string(),
                "tag".to_string(),
                "get".to_string(),
                "--tag-namespace-id".to_string(),
                namespace_id.clone(),
                "--tag-name".to_string(),
                tag_name.clone(),
            ];
            tag_get_args.extend(build_query(&[
                "name",
                "description",
                "is-cost-tracking",
                "is-retired",
                "id",
                "lifecycle-state",
                "validator",
            ]));

            let mut tag_def = match cli.invoke(tag_get_args).await {
                Ok(value) => value,
                Err(e) => {
                    diagnostics.push(format!(
                        "unable to fetch tag definition {name}.{tag_name}: {e}"
                    ));
                    continue;
                }
            };

            let tag_definition_id = tag_def.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let tag_default = tag_defaults
                .iter()
                .find(|d| {
                    d.get("tag-namespace-id").and_then(Value::as_str) == Some(namespace_id.as_str())
                        && d.get("tag-definition-id").and_then(Value::as_str) == Some(tag_definition_id.as_str())
                })
                .cloned()
                .unwrap_or(Value::Null);

            if let Some(obj) = tag_def.as_object_mut() {
                obj.insert("tag-default".to_string(), tag_default);
            }
            tag_definitions.push(tag_def);
        }

        if let Some(obj) = ns.as_object_mut() {
            obj.insert("tag-definitions".to_string(), Value::Array(tag_definitions));
        }
    }

    let exit_code = if diagnostics.is_empty() { 0 } else { 1 };
    Ok(ExtractorOutcome {
        fragment: Value::Array(namespaces),
        exit_code,
        diagnostics,
    })
}

/// Policies are listed per compartment in `ids` (which already includes
/// the tenancy).
pub async fn extract_policies(cli: &dyn OciCli, ids: &[String]) -> Result<ExtractorOutcome> {
    let (items, exit_code, diagnostics) = collect_over_ids(ids, |compartment_id| {
        let mut args = vec![
            "iam".to_string(),
            "policy".to_string(),
            "list".to_string(),
            "--compartment-id".to_string(),
            compartment_id,
        ];
        args.extend(build_array_query(&[
            "id",
            "name",
            "description",
            "statements",
            "compartment-id",
            "lifecycle-state",
        ]));
        async move {
            match cli_list(cli, args).await {
                Ok(items) => Ok(items),
                Err(e) => Err(e),
            }
        }
    })
    .await;
    Ok(ExtractorOutcome::from_array(items, exit_code, diagnostics))
}

/// Users contain nested `group-memberships` and `api-keys`.
pub async fn extract_users(cli: &dyn OciCli, tenancy_id: &str) -> Result<ExtractorOutcome> {
    let mut args = vec![
        "iam".to_string(),
        "user".to_string(),
        "list".to_string(),
        "--compartment-id".to_string(),
        tenancy_id.to_string(),
    ];
    args.extend(build_array_query(&[
        "id",
        "name",
        "description",
        "email",
        "is-mfa-activated",
        "lifecycle-state",
    ]));

    let mut users = match cli_list(cli, args).await {
        Ok(items) => items,
        Err(e) => {
            return Ok(ExtractorOutcome {
                fragment: Value::Array(vec![]),
                exit_code: 1,
                diagnostics: vec![format!("unable to list users: {e}")],
            })
        }
    };

    let (exit1, mut diagnostics) = attach_children(&mut users, "group-memberships", |user| {
        let user_id = user["id"].as_str().unwrap_or_default().to_string();
        let mut args = vec![
            "iam".to_string(),
            "group-membership".to_string(),
            "list".to_string(),
            "--user-id".to_string(),
            user_id,
        ];
        args.extend(build_array_query(&["id", "group-id", "user-id"]));
        async move { cli_list(cli, args).await }
    })
    .await;

    let (exit2, diagnostics2) = attach_children(&mut users, "api-keys", |user| {
        let user_id = user["id"].as_str().unwrap_or_default().to_string();
        let mut args = vec![
            "iam".to_string(),
            "user".to_string(),
            "api-key".to_string(),
            "list".to_string(),
            "--user-id".to_string(),
            user_id,
        ];
        args.extend(build_array_query(&["key-id", "fingerprint", "lifecycle-state", "time-created"]));
        async move { cli_list(cli, args).await }
    })
    .await;

    diagnostics.extend(diagnostics2);
    let exit_code = if exit1 != 0 || exit2 != 0 { 1 } else { 0 };
    Ok(ExtractorOutcome::from_array(users, exit_code, diagnostics))
}

/// Groups are a flat tenancy-scoped list (no nested children in this spec).
pub async fn extract_groups(cli: &dyn OciCli, tenancy_id: &str) -> Result<ExtractorOutcome> {
    let mut args = vec![
        "iam".to_string(),
        "group".to_string(),
        "list".to_string(),
        "--compartment-id".to_string(),
        tenancy_id.to_string(),
    ];
    args.extend(build_array_query(&["id", "name", "description", "lifecycle-state"]));

    match cli_list(cli, args).await {
        Ok(items) => Ok(ExtractorOutcome::ok(Value::Array(items))),
        Err(e) => Ok(ExtractorOutcome {
            fragment: Value::Array(vec![]),
            exit_code: 1,
            diagnostics: vec![format!("unable to list groups: {e}")],
        }),
    }
}

pub async fn extract_dynamic_groups(cli: &dyn OciCli, tenancy_id: &str) -> Result<ExtractorOutcome> {
    let mut args = vec![
        "iam".to_string(),
        "dynamic-group".to_string(),
        "list".to_string(),
        "--compartment-id".to_string(),
        tenancy_id.to_string(),
    ];
    args.extend(build_array_query(&["id", "name", "description", "matching-rule", "lifecycle-state"]));

    match cli_list(cli, args).await {
        Ok(items) => Ok(ExtractorOutcome::ok(Value::Array(items))),
        Err(e) => Ok(ExtractorOutcome {
            fragment: Value::Array(vec![]),
            exit_code: 1,
            diagnostics: vec![format!("unable to list dynamic groups: {e}")],
        }),
    }
}

pub async fn extract_identity_domains(cli: &dyn OciCli, tenancy_id: &str) -> Result<ExtractorOutcome> {
    let mut args = vec![
        "iam".to_string(),
        "domain".to_string(),
        "list".to_string(),
        "--compartment-id".to_string(),
        tenancy_id.to_string(),
    ];
    args.extend(build_array_query(&["id", "display-name", "url", "type", "lifecycle-state", "home-region"]));

    match cli_list(cli, args).await {
        Ok(items) => Ok(ExtractorOutcome::ok(Value::Array(items))),
        Err(e) => Ok(ExtractorOutcome {
            fragment: Value::Array(vec![]),
            exit_code: 1,
            diagnostics: vec![format!("unable to list identity domains: {e}")],
        }),
    }
}

/// Compartments use `--access-level ANY --compartment-id-in-subtree true`
/// so the whole tree is captured in one call (§4.4).
pub async fn extract_compartments(cli: &dyn OciCli, tenancy_id: &str) -> Result<ExtractorOutcome> {
    let mut args = vec![
        "iam".to_string(),
        "compartment".to_string(),
        "list".to_string(),
        "--compartment-id".to_string(),
        tenancy_id.to_string(),
        "--access-level".to_string(),
        "ANY".to_string(),
        "--compartment-id-in-subtree".to_string(),
        "true".to_string(),
    ];
    args.extend(build_array_query(&[
        "id",
        "name",
        "description",
        "compartment-id",
        "lifecycle-state",
    ]));

    match cli_list(cli, args).await {
        Ok(items) => Ok(ExtractorOutcome::ok(Value::Array(items))),
        Err(e) => Ok(ExtractorOutcome {
            fragment: Value::Array(vec![]),
            exit_code: 1,
            diagnostics: vec![format!("unable to list compartments: {e}")],
        }),
    }
}

/// Normalise a CLI list response (always an array query) into a `Vec<Value>`.
async fn cli_list(cli: &dyn OciCli, args: Vec<String>) -> std::result::Result<Vec<Value>, crate::cli_invoke::CliError> {
    match cli.invoke(args).await? {
        Value::Array(items) => Ok(items),
        _ => Ok(Vec::new()),
    }
}
