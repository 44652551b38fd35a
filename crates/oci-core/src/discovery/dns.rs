//! DNS section extractor: zones, each with `records` flattened from the
//! OCI CLI's nested `items` field (§3.2).

use serde_json::Value;

use crate::cli_invoke::build_array_query;
use crate::error::Result;

use super::{attach_children, collect_over_ids, ExtractorOutcome, OciCli};

async fn cli_list(cli: &dyn OciCli, args: Vec<String>) -> std::result::Result<Vec<Value>, crate::cli_invoke::CliError> {
    match cli.invoke(args).await? {
        Value::Array(items) => Ok(items),
        _ => Ok(Vec::new()),
    }
}

pub async fn extract_zones(cli: &dyn OciCli, compartment_ids: &[String]) -> Result<ExtractorOutcome> {
    let (mut zones, list_exit, mut diagnostics) = collect_over_ids(compartment_ids, |compartment_id| {
        let mut args = vec![
            "dns".to_string(),
            "zone".to_string(),
            "list".to_string(),
            "--compartment-id".to_string(),
            compartment_id,
        ];
        args.extend(build_array_query(&["id", "name", "zone-type", "lifecycle-state"]));
        async move { cli_list(cli, args).await }
    })
    .await;

    let (exit, mut record_diag) = attach_children(&mut zones, "records", |zone| {
        let zone_name = zone["name"].as_str().unwrap_or_default().to_string();
        let mut args = vec![
            "dns".to_string(),
            "record".to_string(),
            "rrset".to_string(),
            "list".to_string(),
            "--zone-name-or-id".to_string(),
            zone_name,
        ];
        args.extend(build_array_query(&["domain", "rtype", "rdata", "ttl"]));
        async move {
            // The CLI wraps record lists in a nested `items` envelope per
            // rrset; this flattens every rrset's `items` into one list.
            match cli.invoke(args).await? {
                Value::Array(rrsets) => Ok(rrsets
                    .into_iter()
                    .flat_map(|rrset| match rrset.get("items").cloned() {
                        Some(Value::Array(items)) => items,
                        _ => vec![rrset],
                    })
                    .collect()),
                _ => Ok(Vec::new()),
            }
        }
    })
    .await;
    diagnostics.append(&mut record_diag);

    let exit_code = if list_exit != 0 || exit != 0 { 1 } else { 0 };
    Ok(ExtractorOutcome::from_array(zones, exit_code, diagnostics))
}
